use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Local;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_test::assert_ok;

use s7panel::{
    api::telemetry::{HttpPusher, TelemetryConfig},
    protocol::shadow::IoShadow,
    Console, ConsoleOptions, Endpoint, PublishError, SimulatedPlc, TelemetryPayload,
};

#[derive(Debug, Clone)]
struct Received {
    authorization: Option<String>,
    content_type: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct Collector {
    received: Arc<Mutex<Vec<Received>>>,
    status: Arc<AtomicU16>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Collector {
    fn new(status: u16, delay: Duration) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(status)),
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn count(&self) -> usize {
        self.received.lock().len()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn entry(
    State(collector): State<Collector>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    let active = collector.active.fetch_add(1, Ordering::SeqCst) + 1;
    collector.max_active.fetch_max(active, Ordering::SeqCst);
    if !collector.delay.is_zero() {
        tokio::time::sleep(collector.delay).await;
    }
    collector.received.lock().push(Received {
        authorization: header(&headers, "authorization"),
        content_type: header(&headers, "content-type"),
        body,
    });
    collector.active.fetch_sub(1, Ordering::SeqCst);

    let status = StatusCode::from_u16(collector.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, "collector says hi")
}

async fn serve(collector: Collector) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/plc/entry", post(entry))
        .with_state(collector);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

/// An address nothing listens on.
async fn dead_addr() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

fn console(plc: &SimulatedPlc, url: String, interval: Duration) -> Console {
    Console::new(
        Arc::new(plc.clone()),
        ConsoleOptions {
            poll_interval: Duration::from_millis(10),
            telemetry: TelemetryConfig {
                enabled: true,
                url,
                api_key: "PLCS71200".to_string(),
                interval,
            },
            request_timeout: Duration::from_secs(5),
        },
    )
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) -> Result<()> {
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .map_err(|_| anyhow!("timed out waiting for {what}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_carries_headers_and_snapshot() -> Result<()> {
    let collector = Collector::new(200, Duration::ZERO);
    let addr = serve(collector.clone()).await?;

    let plc = SimulatedPlc::new();
    plc.set_inputs([0b0000_0101, 0x00]);
    plc.set_outputs([0x08, 0x00]);
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(50),
    );
    console.connect(Endpoint::new("192.168.0.1", 0, 1)).await?;

    wait_until("a push with the polled inputs", || {
        collector
            .received
            .lock()
            .iter()
            .any(|r| r.body["inputs"]["I0.0"] == 1)
    })
    .await?;
    console.disconnect().await?;

    let received = collector.received.lock().clone();
    let push = received
        .iter()
        .find(|r| r.body["inputs"]["I0.0"] == 1)
        .ok_or_else(|| anyhow!("no push"))?;
    assert_eq!(push.authorization.as_deref(), Some("Bearer PLCS71200"));
    assert_eq!(push.content_type.as_deref(), Some("application/json"));
    assert_eq!(
        push.body["plc"],
        serde_json::json!({"ip": "192.168.0.1", "rack": 0, "slot": 1})
    );
    assert_eq!(push.body["inputs"]["I0.2"], 1);
    assert_eq!(push.body["inputs"]["I0.1"], 0);
    assert_eq!(push.body["outputs"]["Q0.3"], 1);
    assert_eq!(push.body["outputs"].as_object().map(|m| m.len()), Some(16));
    assert_eq!(push.body["api_key"], "PLCS71200");
    assert!(push.body["timestamp"].as_str().is_some_and(|t| t.contains('T')));

    let stats = console.telemetry_stats();
    assert!(stats.successes >= 1);
    assert_eq!(stats.failures, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_network_error_does_not_stop_next_tick() -> Result<()> {
    let addr = dead_addr().await?;
    let plc = SimulatedPlc::new();
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(30),
    );
    console.connect(Endpoint::new("192.168.0.1", 0, 1)).await?;

    wait_until("two failed pushes", || console.telemetry_stats().failures >= 2).await?;
    assert!(console.is_connected());
    assert!(console.telemetry_stats().attempts >= 2);
    console.disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_200_is_a_local_failure() -> Result<()> {
    let collector = Collector::new(500, Duration::ZERO);
    let addr = serve(collector.clone()).await?;
    let plc = SimulatedPlc::new();
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(30),
    );
    console.connect(Endpoint::new("10.0.0.1", 0, 1)).await?;

    wait_until("a rejected push", || console.telemetry_stats().failures >= 1).await?;
    assert!(console.is_connected());
    assert_ok!(console.set_channel("Q0.0", true).await);

    // Recovery on the collector side is picked up by the next tick
    collector.status.store(200, Ordering::SeqCst);
    wait_until("an accepted push", || console.telemetry_stats().successes >= 1).await?;
    console.disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_collector_never_sees_overlapping_pushes() -> Result<()> {
    let collector = Collector::new(200, Duration::from_millis(200));
    let addr = serve(collector.clone()).await?;
    let plc = SimulatedPlc::new();
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(20),
    );
    console.connect(Endpoint::new("10.0.0.1", 0, 1)).await?;

    wait_until("two completed pushes", || collector.count() >= 2).await?;
    console.disconnect().await?;

    assert_eq!(collector.max_active.load(Ordering::SeqCst), 1);
    assert!(console.telemetry_stats().skipped > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_from_previous_session_still_blocks_the_next() -> Result<()> {
    let collector = Collector::new(200, Duration::from_millis(1500));
    let addr = serve(collector.clone()).await?;
    let plc = SimulatedPlc::new();
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(50),
    );
    console.connect(Endpoint::new("10.0.0.1", 0, 1)).await?;
    wait_until("a push reaching the collector", || {
        collector.active.load(Ordering::SeqCst) >= 1
    })
    .await?;

    console.disconnect().await?;
    console.connect(Endpoint::new("10.0.0.1", 0, 1)).await?;
    console.enable_telemetry(true, None, None)?;
    let skipped = console.telemetry_stats().skipped;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(collector.max_active.load(Ordering::SeqCst), 1);
    assert!(console.telemetry_stats().skipped > skipped);
    assert_eq!(console.telemetry_stats().attempts, 1);

    console.disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_stops_publishing() -> Result<()> {
    let collector = Collector::new(200, Duration::ZERO);
    let addr = serve(collector.clone()).await?;
    let plc = SimulatedPlc::new();
    let console = console(
        &plc,
        format!("http://{addr}/plc/entry"),
        Duration::from_millis(20),
    );
    console.connect(Endpoint::new("10.0.0.1", 0, 1)).await?;
    wait_until("a push", || collector.count() >= 1).await?;

    console.disconnect().await?;
    // Let a push that was already in flight land
    tokio::time::sleep(Duration::from_millis(100)).await;
    let attempts = console.telemetry_stats().attempts;
    let pushes = collector.count();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(console.telemetry_stats().attempts, attempts);
    assert_eq!(collector.count(), pushes);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pusher_reports_status_and_timeout() -> Result<()> {
    let payload = TelemetryPayload::build(
        &Endpoint::new("10.0.0.1", 0, 1),
        &IoShadow::default(),
        "K",
        Local::now(),
    );

    let rejecting = Collector::new(403, Duration::ZERO);
    let url = format!("http://{}/plc/entry", serve(rejecting).await?);
    let pusher = HttpPusher::new(Duration::from_secs(5));
    let job = payload.clone();
    let result = tokio::task::spawn_blocking(move || pusher.push(&url, "K", &job)).await?;
    assert_eq!(
        result,
        Err(PublishError::HttpStatus {
            status: 403,
            body: "collector says hi".to_string()
        })
    );

    let slow = Collector::new(200, Duration::from_secs(2));
    let url = format!("http://{}/plc/entry", serve(slow).await?);
    let pusher = HttpPusher::new(Duration::from_millis(200));
    let result = tokio::task::spawn_blocking(move || pusher.push(&url, "K", &payload)).await?;
    assert_eq!(result, Err(PublishError::Timeout));
    Ok(())
}
