pub mod command;
pub mod console;
pub mod error;
pub mod link;
pub mod session;
pub mod sim;
pub mod sync;
pub mod telemetry;

use std::sync::Arc;

/// The session as shared by the sync loop and the command handler.
pub type SharedSession = Arc<tokio::sync::Mutex<session::Session>>;

pub use command::OutputCommandHandler;
pub use console::{Console, ConsoleOptions};
pub use error::{ConnError, IoError, PublishError};
pub use link::{Connector, DeviceLink, Endpoint, LinkError};
pub use session::Session;
pub use sim::SimulatedPlc;
pub use sync::{ShadowCell, SyncLoop};
pub use telemetry::{PublishCounts, TelemetryConfig, TelemetryPayload, TelemetryPublisher};
