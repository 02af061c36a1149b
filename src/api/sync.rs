/// I/O Sync Loop - keeps the local shadow in step with the device
///
/// Each tick reads both digital areas under the session lock, decodes them into
/// a new [`IoShadow`] and swaps it into the [`ShadowCell`] in one step, then
/// notifies the observers.
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};

use super::{error::IoError, SharedSession};
use crate::{
    core::{
        bus::{ConsoleStatus, CoreToUi, Observers},
        task_manager::{PeriodicTask, TickFlow},
    },
    protocol::{
        channel::{DigitalArea, AREA_BYTES},
        shadow::{AreaImage, IoShadow},
    },
};

/// Holder of the latest complete snapshot.
///
/// Readers get an `Arc` to an immutable shadow; a replace is a single pointer
/// swap, so no reader ever sees a mix of two polls.
#[derive(Debug, Default)]
pub struct ShadowCell {
    current: RwLock<Arc<IoShadow>>,
}

impl ShadowCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<IoShadow> {
        self.current.read().clone()
    }

    pub fn replace(&self, shadow: IoShadow) -> Arc<IoShadow> {
        let shadow = Arc::new(shadow);
        *self.current.write() = shadow.clone();
        shadow
    }
}

pub struct SyncLoop {
    session: SharedSession,
    shadow: Arc<ShadowCell>,
    observers: Observers,
}

fn to_image(area: DigitalArea, bytes: Vec<u8>) -> Result<AreaImage, IoError> {
    let found = bytes.len();
    AreaImage::try_from(bytes).map_err(|_| IoError::DeviceFault {
        reason: format!("{area} image has {found} byte(s), expected {AREA_BYTES}"),
    })
}

impl SyncLoop {
    pub fn new(session: SharedSession, shadow: Arc<ShadowCell>, observers: Observers) -> Self {
        Self {
            session,
            shadow,
            observers,
        }
    }

    /// One poll cycle. On error the shadow is left untouched.
    pub async fn poll_once(&self) -> Result<Arc<IoShadow>, IoError> {
        let (inputs, outputs) = {
            let mut session = self.session.lock().await;
            let inputs = session.read_area(DigitalArea::Inputs, 0, AREA_BYTES).await?;
            let outputs = session
                .read_area(DigitalArea::Outputs, 0, AREA_BYTES)
                .await?;
            (inputs, outputs)
        };
        let inputs = to_image(DigitalArea::Inputs, inputs)?;
        let outputs = to_image(DigitalArea::Outputs, outputs)?;

        let shadow = self.shadow.replace(IoShadow::decode(&inputs, &outputs));
        self.observers.broadcast(CoreToUi::Snapshot(shadow.clone()));
        Ok(shadow)
    }

    async fn tick(&self) -> TickFlow {
        match self.poll_once().await {
            Ok(_) => TickFlow::Continue,
            Err(IoError::NotConnected) => {
                log::debug!("Sync loop found the session disconnected");
                TickFlow::Stop
            }
            Err(err) if err.is_fatal() => {
                log::error!("Sync loop stopped: {err}");
                self.observers
                    .status(ConsoleStatus::ConnectionLost(err.to_string()));
                TickFlow::Stop
            }
            Err(err) => {
                log::warn!("Poll cycle skipped: {err}");
                self.observers.status(ConsoleStatus::ReadError(err.to_string()));
                TickFlow::Continue
            }
        }
    }

    /// Run the loop on its own periodic task.
    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("io-sync", period, move || {
            let sync = self.clone();
            async move { sync.tick().await }
        })
    }
}
