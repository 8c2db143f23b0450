pub mod country;
pub mod person;
