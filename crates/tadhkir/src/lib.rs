//! Tadhkir - periodic reminder bot built around a single guarded gateway session.

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod fault;
pub mod gateway;
pub mod handlers;
pub mod lifecycle;
pub mod server;
pub mod session;
pub mod subscribers;

pub use lifecycle::{ControllerSettings, LifecycleController, LifecycleError, LifecycleState};
pub use subscribers::SubscriberRegistry;
