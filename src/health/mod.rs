//! Periodic health checking
//!
//! Drives [`ConnectionManager::check_health`](crate::connection::ConnectionManager::check_health)
//! on a fixed interval in the background.

pub mod monitor;

pub use monitor::{HealthMonitor, HealthMonitorHandle};
