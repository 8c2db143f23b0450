pub mod errors;
pub mod memory_store;
pub mod people;
pub mod record_writer;
pub mod store;
pub mod tmdb;
