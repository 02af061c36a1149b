/// Console - the command interface a panel drives
///
/// Owns the session, the shadow, the telemetry settings and the two periodic
/// tasks. Connect starts the sync loop and the publisher; disconnect stops
/// both before it returns. Every outcome is also reported to the observers as
/// a status notification.
use flume::Receiver;
use parking_lot::RwLock;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

use super::{
    command::OutputCommandHandler,
    error::{ConnError, IoError, PublishError},
    link::{Connector, Endpoint},
    session::Session,
    sync::{ShadowCell, SyncLoop},
    telemetry::{
        validate_url, HttpPusher, PublishCounts, PublishStats, TelemetryConfig,
        TelemetryPublisher, DEFAULT_REQUEST_TIMEOUT,
    },
    SharedSession,
};
use crate::{
    core::{
        bus::{ConsoleStatus, CoreToUi, Observers},
        task_manager::PeriodicTask,
    },
    protocol::{channel::Channel, shadow::IoShadow},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runtime settings of a [`Console`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleOptions {
    pub poll_interval: Duration,
    pub telemetry: TelemetryConfig,
    pub request_timeout: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            telemetry: TelemetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct Tasks {
    sync: PeriodicTask,
    telemetry: PeriodicTask,
}

pub struct Console {
    session: SharedSession,
    commands: OutputCommandHandler,
    shadow: Arc<ShadowCell>,
    observers: Observers,
    telemetry: Arc<RwLock<TelemetryConfig>>,
    stats: Arc<PublishStats>,
    push_in_flight: Arc<AtomicBool>,
    pusher: HttpPusher,
    connected: Arc<AtomicBool>,
    poll_interval: Duration,
    tasks: Mutex<Option<Tasks>>,
}

impl Console {
    pub fn new(connector: Arc<dyn Connector>, options: ConsoleOptions) -> Self {
        let session = Session::new(connector);
        let connected = session.connected_flag();
        let session = Arc::new(Mutex::new(session));

        Self {
            commands: OutputCommandHandler::new(session.clone()),
            session,
            shadow: Arc::new(ShadowCell::new()),
            observers: Observers::new(),
            telemetry: Arc::new(RwLock::new(options.telemetry)),
            stats: Arc::new(PublishStats::default()),
            push_in_flight: Arc::new(AtomicBool::new(false)),
            pusher: HttpPusher::new(options.request_timeout),
            connected,
            poll_interval: options.poll_interval,
            tasks: Mutex::new(None),
        }
    }

    /// Receive snapshot and status notifications.
    pub fn subscribe(&self) -> Receiver<CoreToUi> {
        self.observers.subscribe()
    }

    /// Latest complete snapshot.
    pub fn snapshot(&self) -> Arc<IoShadow> {
        self.shadow.load()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.session.lock().await.endpoint().cloned()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        self.telemetry.read().clone()
    }

    pub fn telemetry_stats(&self) -> PublishCounts {
        self.stats.counts()
    }

    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnError> {
        let mut tasks = self.tasks.lock().await;
        stop_tasks(&mut tasks).await;

        let was_connected = self.is_connected();
        let result = self.session.lock().await.connect(endpoint.clone()).await;
        if let Err(err) = result {
            log::warn!("Connect to {endpoint} failed: {err}");
            // The previous link is gone; end up where an explicit disconnect would
            if was_connected {
                self.disable_telemetry();
                self.observers.status(ConsoleStatus::Disconnected);
            }
            self.observers
                .status(ConsoleStatus::ConnectionFailed(err.to_string()));
            return Err(err);
        }

        self.shadow.replace(IoShadow::default());
        self.observers.status(ConsoleStatus::Connected);

        let sync = Arc::new(SyncLoop::new(
            self.session.clone(),
            self.shadow.clone(),
            self.observers.clone(),
        ));
        let interval = self.telemetry.read().interval;
        let publisher = Arc::new(TelemetryPublisher::new(
            self.telemetry.clone(),
            self.shadow.clone(),
            endpoint,
            self.connected.clone(),
            self.pusher.clone(),
            self.push_in_flight.clone(),
            self.stats.clone(),
        ));
        *tasks = Some(Tasks {
            sync: sync.spawn(self.poll_interval),
            telemetry: publisher.spawn(interval),
        });
        Ok(())
    }

    /// Stop both periodic tasks, release the session and turn telemetry off.
    /// The console is disconnected afterwards even if the release failed.
    pub async fn disconnect(&self) -> Result<(), ConnError> {
        let mut tasks = self.tasks.lock().await;
        stop_tasks(&mut tasks).await;

        let result = self.session.lock().await.disconnect().await;
        self.disable_telemetry();

        match &result {
            Ok(()) => self.observers.status(ConsoleStatus::Disconnected),
            Err(err) => {
                log::warn!("Disconnect finished with an error: {err}");
                self.observers
                    .status(ConsoleStatus::DisconnectError(err.to_string()));
            }
        }
        result
    }

    pub async fn set_channel(&self, name: &str, value: bool) -> Result<(), IoError> {
        let result = match name.parse::<Channel>() {
            Ok(channel) => self.commands.set_channel(channel, value).await,
            Err(err) => Err(err.into()),
        };
        self.report(result, ConsoleStatus::WriteError)
    }

    pub async fn toggle_channel(&self, name: &str) -> Result<(), IoError> {
        let result = match name.parse::<Channel>() {
            Ok(channel) => self.commands.toggle_channel(channel).await,
            Err(err) => Err(err.into()),
        };
        self.report(result, ConsoleStatus::ToggleError)
    }

    pub async fn set_all_outputs(&self, value: bool) -> Result<(), IoError> {
        let result = self.commands.set_all_outputs(value).await;
        if value {
            self.report(result, ConsoleStatus::AllOnError)
        } else {
            self.report(result, ConsoleStatus::AllOffError)
        }
    }

    /// Turn telemetry on or off. Enabling validates the URL; `None` keeps the stored value.
    pub fn enable_telemetry(
        &self,
        enabled: bool,
        url: Option<String>,
        api_key: Option<String>,
    ) -> Result<(), PublishError> {
        if !enabled {
            self.disable_telemetry();
            return Ok(());
        }

        let mut config = self.telemetry.write();
        let url = url.unwrap_or_else(|| config.url.clone());
        if let Err(err) = validate_url(&url) {
            drop(config);
            self.observers
                .status(ConsoleStatus::TelemetryError(err.to_string()));
            return Err(err);
        }
        config.url = url.clone();
        if let Some(api_key) = api_key {
            config.api_key = api_key;
        }
        config.enabled = true;
        drop(config);

        log::info!("Telemetry enabled, pushing to {url}");
        self.observers.status(ConsoleStatus::TelemetryEnabled(url));
        Ok(())
    }

    /// Disconnect if connected; used on shutdown.
    pub async fn shutdown(&self) {
        if self.is_connected() || self.tasks.lock().await.is_some() {
            let _ = self.disconnect().await;
        }
    }

    fn disable_telemetry(&self) {
        let was_enabled = std::mem::replace(&mut self.telemetry.write().enabled, false);
        if was_enabled {
            log::info!("Telemetry disabled");
            self.observers.status(ConsoleStatus::TelemetryDisabled);
        }
    }

    fn report(
        &self,
        result: Result<(), IoError>,
        status: fn(String) -> ConsoleStatus,
    ) -> Result<(), IoError> {
        if let Err(err) = &result {
            log::warn!("Output command failed: {err}");
            self.observers.status(status(err.to_string()));
        }
        result
    }
}

async fn stop_tasks(tasks: &mut Option<Tasks>) {
    if let Some(Tasks { sync, telemetry }) = tasks.take() {
        log::debug!("Stopping '{}' and '{}'", sync.name(), telemetry.name());
        tokio::join!(sync.stop(), telemetry.stop());
    }
}
