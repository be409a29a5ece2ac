//! Business-level operations on animatronic systems

mod animatronic;
pub mod events;
pub mod history;
pub mod telemetry;

pub use animatronic::{AnimatronicService, ServiceConfig};
pub use events::ServiceEvent;
pub use history::CommandHistory;
