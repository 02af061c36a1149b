//! UI-independent plumbing shared by the console and its panels
//!
//! - Message bus between the panel and the console core
//! - Periodic task lifecycle
pub mod bus;
pub mod task_manager;

pub use bus::{ConsoleStatus, CoreToUi, Observers, UiToCore};
pub use task_manager::{PeriodicTask, TickFlow};
