pub mod models;
pub mod schedule;
