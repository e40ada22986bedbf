pub mod calendar_client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
