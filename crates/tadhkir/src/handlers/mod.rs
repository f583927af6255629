//! HTTP request handlers.

mod health;
mod lifecycle;

pub use health::{livez, readyz};
pub use lifecycle::{start, status, stop};
