pub mod cli;
pub mod database_ops;
pub mod logging;
pub mod normalization;

pub mod util {
    pub mod db;
    pub mod env;
}
