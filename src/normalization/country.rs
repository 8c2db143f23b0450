/// Stored when a movie lists no production country (or the first entry carries no code).
pub const UNKNOWN_COUNTRY: &str = "??";

/// Codes whose API spelling differs from the local `countries` reference table.
const COUNTRY_REMAPS: [(&str, &str); 2] = [("es", "sp"), ("kn", "ke")];

/// Normalize the primary production country code for storage.
///
/// Takes the first listed code, lowercases it and applies the fixed remaps. Codes that are
/// absent or blank collapse to [`UNKNOWN_COUNTRY`]. Unknown-but-present codes are passed
/// through untouched; the `movies.country` foreign key decides whether they are accepted.
pub fn normalize_country<'a, I>(codes: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let Some(first) = codes.into_iter().next() else {
        return UNKNOWN_COUNTRY.to_string();
    };
    let Some(code) = first.map(str::trim).filter(|c| !c.is_empty()) else {
        return UNKNOWN_COUNTRY.to_string();
    };
    let lowered = code.to_ascii_lowercase();
    COUNTRY_REMAPS
        .iter()
        .find(|(from, _)| *from == lowered)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(lowered)
}
