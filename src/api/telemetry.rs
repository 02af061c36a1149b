/// Telemetry Publisher - best-effort push of the I/O snapshot to an HTTP collector
///
/// Each tick builds a value payload from the latest shadow and hands the POST
/// to the blocking pool. The tick itself never waits for the network, at most
/// one push is in flight, and a failed push is logged and dropped.
use chrono::{DateTime, Local, SecondsFormat};
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use url::Url;

use super::{error::PublishError, link::Endpoint, sync::ShadowCell};
use crate::{
    core::task_manager::{spawn_blocking_task, PeriodicTask, TickFlow},
    protocol::{channel::DigitalArea, shadow::IoShadow},
};

pub const DEFAULT_URL: &str = "http://192.168.74.130:8069/plc/entry";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub url: String,
    /// Sent both as bearer token and inside the body.
    pub api_key: String,
    pub interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_URL.to_string(),
            api_key: String::new(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Only absolute http(s) URLs are accepted.
pub fn validate_url(url: &str) -> Result<Url, PublishError> {
    let parsed = Url::parse(url).map_err(|err| PublishError::InvalidUrl {
        reason: format!("{url}: {err}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(PublishError::InvalidUrl {
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

/// Body of one push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub plc: Endpoint,
    pub inputs: BTreeMap<String, u8>,
    pub outputs: BTreeMap<String, u8>,
    pub timestamp: String,
    pub api_key: String,
}

impl TelemetryPayload {
    pub fn build(endpoint: &Endpoint, shadow: &IoShadow, api_key: &str, at: DateTime<Local>) -> Self {
        Self {
            plc: endpoint.clone(),
            inputs: shadow.flat_map(DigitalArea::Inputs),
            outputs: shadow.flat_map(DigitalArea::Outputs),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, false),
            api_key: api_key.to_string(),
        }
    }
}

/// Blocking HTTP client for the collector.
#[derive(Debug, Clone)]
pub struct HttpPusher {
    agent: ureq::Agent,
}

impl Default for HttpPusher {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl HttpPusher {
    pub fn new(request_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(request_timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// POST the payload; only HTTP 200 counts as success.
    pub fn push(&self, url: &str, api_key: &str, payload: &TelemetryPayload) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload).map_err(|err| PublishError::Network {
            reason: format!("failed to encode payload: {err}"),
        })?;

        let result = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {api_key}"))
            .send(body.as_slice());

        match result {
            Ok(mut resp) => {
                let status = resp.status().as_u16();
                if status == 200 {
                    return Ok(());
                }
                let body = resp.body_mut().read_to_string().unwrap_or_default();
                Err(PublishError::HttpStatus { status, body })
            }
            Err(ureq::Error::Timeout(_)) => Err(PublishError::Timeout),
            Err(ureq::Error::StatusCode(status)) => Err(PublishError::HttpStatus {
                status,
                body: String::new(),
            }),
            Err(err) => Err(PublishError::Network {
                reason: err.to_string(),
            }),
        }
    }
}

/// Counters of the publisher since it was created.
#[derive(Debug, Default)]
pub struct PublishStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishCounts {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Ticks dropped because the previous push was still running.
    pub skipped: u64,
}

impl PublishStats {
    pub fn counts(&self) -> PublishCounts {
        PublishCounts {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight flag when the push ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TelemetryPublisher {
    config: Arc<RwLock<TelemetryConfig>>,
    shadow: Arc<ShadowCell>,
    endpoint: Endpoint,
    connected: Arc<AtomicBool>,
    pusher: HttpPusher,
    in_flight: Arc<AtomicBool>,
    stats: Arc<PublishStats>,
}

impl TelemetryPublisher {
    /// `in_flight` outlives the publisher: every publisher a console creates
    /// shares it, so a push left over from an earlier session still counts.
    pub fn new(
        config: Arc<RwLock<TelemetryConfig>>,
        shadow: Arc<ShadowCell>,
        endpoint: Endpoint,
        connected: Arc<AtomicBool>,
        pusher: HttpPusher,
        in_flight: Arc<AtomicBool>,
        stats: Arc<PublishStats>,
    ) -> Self {
        Self {
            config,
            shadow,
            endpoint,
            connected,
            pusher,
            in_flight,
            stats,
        }
    }

    pub fn stats(&self) -> PublishCounts {
        self.stats.counts()
    }

    /// Start one push if enabled, connected and idle. The returned handle is
    /// only for callers that want the outcome; ticks drop it.
    pub fn try_publish(&self) -> Option<JoinHandle<Result<(), PublishError>>> {
        let config = self.config.read().clone();
        if !config.enabled || !self.connected.load(Ordering::Acquire) {
            return None;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Telemetry tick skipped, previous push still in flight");
            return None;
        }
        let guard = InFlight(self.in_flight.clone());

        let payload = TelemetryPayload::build(
            &self.endpoint,
            &self.shadow.load(),
            &config.api_key,
            Local::now(),
        );
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);

        let pusher = self.pusher.clone();
        let stats = self.stats.clone();
        Some(spawn_blocking_task(move || {
            let _guard = guard;
            let result = pusher.push(&config.url, &config.api_key, &payload);
            match &result {
                Ok(()) => {
                    stats.successes.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Telemetry pushed to {}", config.url);
                }
                Err(err) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Telemetry push to {} failed: {err}", config.url);
                }
            }
            result
        }))
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("telemetry", period, move || {
            let publisher = self.clone();
            async move {
                let _ = publisher.try_publish();
                TickFlow::Continue
            }
        })
    }
}
