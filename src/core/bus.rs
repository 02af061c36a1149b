use derive_more::Display;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::protocol::shadow::IoShadow;

/// Human-readable connection / error state shown by the panel.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ConsoleStatus {
    #[display("Status: Connected")]
    Connected,
    #[display("Status: Disconnected")]
    Disconnected,
    #[display("Status: Connection Failed - {_0}")]
    ConnectionFailed(String),
    #[display("Status: Disconnect Error - {_0}")]
    DisconnectError(String),
    /// A poll cycle was skipped; the loop keeps running.
    #[display("Status: Read Error - {_0}")]
    ReadError(String),
    /// The link broke during a poll; the loop has stopped.
    #[display("Status: Connection Lost - {_0}")]
    ConnectionLost(String),
    #[display("Status: Write Error - {_0}")]
    WriteError(String),
    #[display("Status: Toggle Error - {_0}")]
    ToggleError(String),
    #[display("Status: All ON Error - {_0}")]
    AllOnError(String),
    #[display("Status: All OFF Error - {_0}")]
    AllOffError(String),
    #[display("Status: Telemetry enabled - {_0}")]
    TelemetryEnabled(String),
    #[display("Status: Telemetry disabled")]
    TelemetryDisabled,
    #[display("Status: Telemetry Error - {_0}")]
    TelemetryError(String),
}

/// Messages sent from core to the panel.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreToUi {
    /// A fresh complete I/O snapshot.
    Snapshot(Arc<IoShadow>),
    Status(ConsoleStatus),
}

/// Operator commands sent from the panel to core.
#[derive(Debug, Clone, PartialEq)]
pub enum UiToCore {
    /// Connect; missing parts fall back to the configured endpoint.
    Connect {
        host: Option<String>,
        rack: Option<u8>,
        slot: Option<u8>,
    },
    Disconnect,
    /// Channel names are validated by the console, not the panel.
    SetChannel { channel: String, value: bool },
    ToggleChannel(String),
    SetAllOutputs(bool),
    EnableTelemetry {
        enabled: bool,
        url: Option<String>,
        api_key: Option<String>,
    },
    /// Print the current snapshot.
    Show,
    /// Print telemetry statistics.
    Stats,
    Help,
    /// Graceful shutdown request.
    Quit,
}

/// Fan-out list of panel subscriptions.
///
/// Subscribers whose receiver has been dropped are pruned on the next broadcast.
#[derive(Debug, Default, Clone)]
pub struct Observers {
    senders: Arc<Mutex<Vec<Sender<CoreToUi>>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CoreToUi> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    pub fn broadcast(&self, msg: CoreToUi) {
        self.senders.lock().retain(|tx| tx.send(msg.clone()).is_ok());
    }

    pub fn status(&self, status: ConsoleStatus) {
        log::debug!("{status}");
        self.broadcast(CoreToUi::Status(status));
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.lock().is_empty()
    }
}
