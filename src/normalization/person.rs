/// Deduplication key for a person: surname is mandatory, first name optional.
///
/// Two credits with the same key always resolve to the same surrogate ID. There is no
/// tiebreak on birth year or external ID, so namesakes are merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersonKey {
    surname: String,
    first_name: Option<String>,
}

impl PersonKey {
    /// Split a full name on the first space.
    ///
    /// `"Ana de Armas"` → first `Ana`, surname `de Armas`; `"Zendaya"` → surname only.
    /// Returns `None` for a blank name since the surname column is NOT NULL.
    pub fn from_full_name(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let key = match trimmed.split_once(' ') {
            Some((first, rest)) => Self {
                surname: rest.to_string(),
                first_name: Some(first.to_string()),
            },
            None => Self {
                surname: trimmed.to_string(),
                first_name: None,
            },
        };
        Some(key)
    }

    pub fn surname(&self) -> &str {
        &self.surname
    }

    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }
}

/// Leading four-digit year of an ISO-ish date string (`"1956-07-09"` → 1956).
///
/// `Ok(None)` when the string is absent or empty; `Err` when it is present but does not start
/// with a year, which the caller treats as a malformed payload.
pub fn leading_year(date: Option<&str>) -> Result<Option<i32>, String> {
    let Some(raw) = date.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    raw.get(0..4)
        .and_then(|y| y.parse::<i32>().ok())
        .map(Some)
        .ok_or_else(|| format!("date {raw:?} does not start with a year"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_space_only() {
        let key = PersonKey::from_full_name("  Ana de Armas ").unwrap();
        assert_eq!(key.first_name(), Some("Ana"));
        assert_eq!(key.surname(), "de Armas");
    }

    #[test]
    fn single_token_is_surname() {
        let key = PersonKey::from_full_name("Zendaya").unwrap();
        assert_eq!(key.first_name(), None);
        assert_eq!(key.surname(), "Zendaya");
    }

    #[test]
    fn absent_first_name_differs_from_present() {
        let a = PersonKey::from_full_name("Prince").unwrap();
        let b = PersonKey::from_full_name("Roger Prince").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, PersonKey::from_full_name("Prince ").unwrap());
    }

    #[test]
    fn blank_name_has_no_key() {
        assert!(PersonKey::from_full_name("   ").is_none());
    }

    #[test]
    fn leading_year_handles_absent_and_bad_dates() {
        assert_eq!(leading_year(Some("1956-07-09")), Ok(Some(1956)));
        assert_eq!(leading_year(Some("")), Ok(None));
        assert_eq!(leading_year(None), Ok(None));
        assert!(leading_year(Some("unknown")).is_err());
    }
}
