pub mod matcher;
pub mod reconciler;
pub mod session;
