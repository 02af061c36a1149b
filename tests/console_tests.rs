use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use flume::Receiver;
use tokio_test::{assert_err, assert_ok};

use s7panel::{
    core::bus::{ConsoleStatus, CoreToUi},
    protocol::{
        channel::{Channel, DigitalArea},
        shadow::IoShadow,
    },
    Console, ConsoleOptions, Endpoint, IoError, SimulatedPlc,
};

const POLL: Duration = Duration::from_millis(10);

fn console(plc: &SimulatedPlc) -> Console {
    Console::new(
        Arc::new(plc.clone()),
        ConsoleOptions {
            poll_interval: POLL,
            ..Default::default()
        },
    )
}

fn endpoint() -> Endpoint {
    Endpoint::new("192.168.0.1", 0, 1)
}

fn channel(name: &str) -> Channel {
    name.parse().unwrap()
}

/// Wait for the next snapshot satisfying `pred`.
async fn snapshot_where(
    rx: &Receiver<CoreToUi>,
    pred: impl Fn(&IoShadow) -> bool,
) -> Result<Arc<IoShadow>> {
    let wait = async {
        loop {
            if let CoreToUi::Snapshot(shadow) = rx.recv_async().await? {
                if pred(&shadow) {
                    return Ok::<_, anyhow::Error>(shadow);
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .map_err(|_| anyhow!("no matching snapshot within 2 s"))?
}

async fn status_where(
    rx: &Receiver<CoreToUi>,
    pred: impl Fn(&ConsoleStatus) -> bool,
) -> Result<ConsoleStatus> {
    let wait = async {
        loop {
            if let CoreToUi::Status(status) = rx.recv_async().await? {
                if pred(&status) {
                    return Ok::<_, anyhow::Error>(status);
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .map_err(|_| anyhow!("no matching status within 2 s"))?
}

#[tokio::test]
async fn test_poll_reports_set_input_bits() -> Result<()> {
    let plc = SimulatedPlc::new();
    plc.set_inputs([0b0000_0101, 0x00]);
    let console = console(&plc);
    let rx = console.subscribe();

    assert_ok!(console.connect(endpoint()).await);
    assert_eq!(
        status_where(&rx, |_| true).await?,
        ConsoleStatus::Connected
    );

    let shadow = snapshot_where(&rx, |_| true).await?;
    let on: Vec<String> = shadow
        .iter()
        .filter(|(c, v)| **v && c.area() == DigitalArea::Inputs)
        .map(|(c, _)| c.to_string())
        .collect();
    assert_eq!(on, ["I0.0", "I0.2"]);
    assert_eq!(console.snapshot().len(), 32);

    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_then_toggle_output_scenario() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    console.connect(endpoint()).await?;

    console.set_channel("Q0.3", true).await?;
    assert_eq!(plc.outputs()[0], 0b0000_1000);

    console.toggle_channel("Q0.3").await?;
    assert_eq!(plc.outputs()[0], 0x00);

    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_channel_is_visible_in_next_poll_with_siblings_intact() -> Result<()> {
    let plc = SimulatedPlc::new();
    plc.set_outputs([0b1100_0001, 0x00]);
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;

    console.set_channel("Q0.4", true).await?;
    let shadow = snapshot_where(&rx, |s| s.get(&channel("Q0.4"))).await?;
    for bit in 0..8u8 {
        let expected = 0b1101_0001 & (1 << bit) != 0;
        assert_eq!(shadow.get(&channel(&format!("Q0.{bit}"))), expected);
    }

    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_all_outputs_independent_of_prior_state() -> Result<()> {
    for prior in [[0x00, 0x00], [0x5A, 0x01], [0xFF, 0xFF]] {
        let plc = SimulatedPlc::new();
        plc.set_outputs(prior);
        let console = console(&plc);
        let rx = console.subscribe();
        console.connect(endpoint()).await?;

        console.set_all_outputs(true).await?;
        assert_eq!(plc.outputs(), [0xFF, 0xFF]);
        let shadow = snapshot_where(&rx, |s| {
            Channel::all(DigitalArea::Outputs).all(|c| s.get(&c))
        })
        .await?;
        assert_eq!(
            shadow.flat_map(DigitalArea::Outputs).values().sum::<u8>(),
            16
        );

        console.set_all_outputs(false).await?;
        assert_eq!(plc.outputs(), [0x00, 0x00]);
        console.disconnect().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_disconnect_stops_all_device_traffic() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;
    snapshot_where(&rx, |_| true).await?;

    console.disconnect().await?;
    assert!(!console.is_connected());
    let reads = plc.read_count();

    tokio::time::sleep(POLL * 10).await;
    assert_eq!(plc.read_count(), reads);
    assert_eq!(plc.write_count(), 0);

    // A second disconnect is a no-op
    assert_ok!(console.disconnect().await);
    Ok(())
}

#[tokio::test]
async fn test_commands_while_disconnected_report_not_connected() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();

    assert_eq!(
        console.set_channel("Q0.0", true).await,
        Err(IoError::NotConnected)
    );
    assert_eq!(
        status_where(&rx, |_| true).await?,
        ConsoleStatus::WriteError("not connected".to_string())
    );
    assert_err!(console.toggle_channel("Q0.0").await);
    assert_eq!(
        status_where(&rx, |_| true).await?,
        ConsoleStatus::ToggleError("not connected".to_string())
    );
    assert_err!(console.set_all_outputs(false).await);
    assert!(matches!(
        status_where(&rx, |_| true).await?,
        ConsoleStatus::AllOffError(_)
    ));
    assert_eq!(plc.read_count() + plc.write_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_and_input_channels_are_rejected() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    console.connect(endpoint()).await?;

    assert!(matches!(
        console.set_channel("Q2.0", true).await,
        Err(IoError::InvalidChannel(_))
    ));
    assert!(matches!(
        console.toggle_channel("I0.1").await,
        Err(IoError::ReadOnlyArea { .. })
    ));
    assert_eq!(plc.write_count(), 0);

    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_connect_leaves_console_idle() -> Result<()> {
    let plc = SimulatedPlc::new();
    plc.refuse_connections(true);
    let console = console(&plc);
    let rx = console.subscribe();

    assert_err!(console.connect(endpoint()).await);
    assert!(matches!(
        status_where(&rx, |_| true).await?,
        ConsoleStatus::ConnectionFailed(_)
    ));
    assert!(!console.is_connected());

    tokio::time::sleep(POLL * 5).await;
    assert_eq!(plc.read_count(), 0);

    plc.refuse_connections(false);
    assert_ok!(console.connect(endpoint()).await);
    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_skipped_cycle_retries_next_tick() -> Result<()> {
    let plc = SimulatedPlc::new();
    plc.reject_reads(true);
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;

    status_where(&rx, |s| matches!(s, ConsoleStatus::ReadError(_))).await?;
    assert!(console.is_connected());

    plc.set_inputs([0x80, 0x00]);
    plc.reject_reads(false);
    snapshot_where(&rx, |s| s.get(&channel("I0.7"))).await?;

    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_broken_transport_stops_sync_loop() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;
    snapshot_where(&rx, |_| true).await?;

    plc.break_transport(true);
    status_where(&rx, |s| matches!(s, ConsoleStatus::ConnectionLost(_))).await?;
    assert!(!console.is_connected());

    let reads = plc.read_count();
    tokio::time::sleep(POLL * 10).await;
    assert_eq!(plc.read_count(), reads);

    assert_eq!(
        console.set_channel("Q0.0", true).await,
        Err(IoError::NotConnected)
    );
    Ok(())
}

#[tokio::test]
async fn test_disconnect_disables_telemetry() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;

    console.enable_telemetry(true, Some("http://127.0.0.1:9/plc/entry".into()), Some("K".into()))?;
    assert!(console.telemetry_config().enabled);
    assert!(matches!(
        status_where(&rx, |s| matches!(s, ConsoleStatus::TelemetryEnabled(_))).await?,
        ConsoleStatus::TelemetryEnabled(url) if url == "http://127.0.0.1:9/plc/entry"
    ));

    console.disconnect().await?;
    assert!(!console.telemetry_config().enabled);
    assert_eq!(console.telemetry_config().api_key, "K");
    status_where(&rx, |s| *s == ConsoleStatus::TelemetryDisabled).await?;
    status_where(&rx, |s| *s == ConsoleStatus::Disconnected).await?;

    assert_err!(console.enable_telemetry(true, Some("nope".into()), None));
    assert!(!console.telemetry_config().enabled);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_completes_when_release_fails() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;

    plc.fail_close(true);
    assert_err!(console.disconnect().await);
    assert!(!console.is_connected());
    assert!(matches!(
        status_where(&rx, |s| !matches!(s, ConsoleStatus::Connected)).await?,
        ConsoleStatus::DisconnectError(_)
    ));

    let reads = plc.read_count();
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(plc.read_count(), reads);
    Ok(())
}

#[tokio::test]
async fn test_reconnect_replaces_previous_session() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    console.connect(endpoint()).await?;
    console.connect(Endpoint::new("192.168.0.2", 0, 2)).await?;

    assert_eq!(plc.open_count(), 2);
    assert_eq!(plc.close_count(), 1);
    assert_eq!(
        console.endpoint().await,
        Some(Endpoint::new("192.168.0.2", 0, 2))
    );
    console.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_reconnect_ends_like_a_disconnect() -> Result<()> {
    let plc = SimulatedPlc::new();
    let console = console(&plc);
    let rx = console.subscribe();
    console.connect(endpoint()).await?;
    console.enable_telemetry(true, None, Some("K".into()))?;
    while rx.try_recv().is_ok() {}

    plc.refuse_connections(true);
    assert_err!(console.connect(Endpoint::new("192.168.0.2", 0, 1)).await);
    assert!(!console.is_connected());
    assert!(!console.telemetry_config().enabled);
    assert_eq!(plc.close_count(), 1);

    let statuses: Vec<ConsoleStatus> = rx
        .try_iter()
        .filter_map(|msg| match msg {
            CoreToUi::Status(status) => Some(status),
            CoreToUi::Snapshot(_) => None,
        })
        .collect();
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0], ConsoleStatus::TelemetryDisabled);
    assert_eq!(statuses[1], ConsoleStatus::Disconnected);
    assert!(matches!(statuses[2], ConsoleStatus::ConnectionFailed(_)));

    let reads = plc.read_count();
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(plc.read_count(), reads);
    Ok(())
}
