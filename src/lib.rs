//! Remote control core for a fleet of animatronic show controllers
//!
//! Pools one remote shell session per system, retries failed commands with
//! exponential backoff, probes health in the background and tracks every
//! command issued through [`service::AnimatronicService`].

pub mod config;
pub mod connection;
pub mod context;
pub mod health;
pub mod registry;
pub mod service;
pub mod transport;

pub use animatronic_shared as shared;
pub use config::Settings;
pub use context::AppContext;
