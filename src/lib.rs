//! Declarative calendar reconciliation: weekly schedule templates plus
//! dated overrides are expanded into a desired plan, then applied to a
//! remote calendar idempotently, event by event.

pub mod application;
pub mod domain;
pub mod infrastructure;
