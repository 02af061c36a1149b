pub mod config;
pub mod panel;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::{io::BufRead, sync::Arc, time::Duration};

use crate::{
    api::{
        console::Console,
        link::{Connector, Endpoint},
        sim::SimulatedPlc,
    },
    core::bus::{CoreToUi, UiToCore},
    protocol::s7::S7Connector,
};
use config::ConsoleConfig;
use panel::Printer;

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

fn command() -> Command {
    Command::new("s7panel")
        .about("Operator console for S7 digital I/O")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load settings from a .toml or .json file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .help("Device IP address")
                .value_name("IP"),
        )
        .arg(
            Arg::new("rack")
                .long("rack")
                .help("CPU rack (0-7)")
                .value_name("N")
                .value_parser(clap::value_parser!(u8).range(0..=7)),
        )
        .arg(
            Arg::new("slot")
                .long("slot")
                .help("CPU slot (0-31)")
                .value_name("N")
                .value_parser(clap::value_parser!(u8).range(0..=31)),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .help("ISO-on-TCP port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .help("I/O poll period in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("connect")
                .long("connect")
                .help("Connect on startup")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Use an in-memory device instead of the network")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("telemetry")
                .long("telemetry")
                .help("Enable the telemetry push")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("telemetry-url")
                .long("telemetry-url")
                .help("Collector endpoint")
                .value_name("URL"),
        )
        .arg(
            Arg::new("telemetry-key")
                .long("telemetry-key")
                .help("Bearer credential sent to the collector")
                .value_name("KEY"),
        )
        .arg(
            Arg::new("telemetry-interval")
                .long("telemetry-interval")
                .help("Push period in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print notifications as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Build the effective configuration: file first, then flags.
pub fn resolve_config(matches: &ArgMatches) -> Result<ConsoleConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ConsoleConfig::from_file(path)?,
        None => ConsoleConfig::default(),
    };

    if let Some(host) = matches.get_one::<String>("host") {
        config.plc.host = host.clone();
    }
    if let Some(rack) = matches.get_one::<u8>("rack") {
        config.plc.rack = *rack;
    }
    if let Some(slot) = matches.get_one::<u8>("slot") {
        config.plc.slot = *slot;
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.plc.port = *port;
    }
    if let Some(ms) = matches.get_one::<u64>("poll-interval") {
        config.poll_interval_ms = *ms;
    }
    if matches.get_flag("telemetry") {
        config.telemetry.enabled = true;
    }
    if let Some(url) = matches.get_one::<String>("telemetry-url") {
        config.telemetry.url = url.clone();
    }
    if let Some(key) = matches.get_one::<String>("telemetry-key") {
        config.telemetry.api_key = key.clone();
    }
    if let Some(ms) = matches.get_one::<u64>("telemetry-interval") {
        config.telemetry.interval_ms = *ms;
    }
    Ok(config)
}

fn connector(config: &ConsoleConfig, simulate: bool) -> Arc<dyn Connector> {
    if simulate {
        log::info!("Using the simulated device");
        Arc::new(SimulatedPlc::new())
    } else {
        Arc::new(
            S7Connector::new()
                .with_port(config.plc.port)
                .with_connect_timeout(Duration::from_millis(config.plc.connect_timeout_ms))
                .with_io_timeout(Duration::from_millis(config.plc.io_timeout_ms)),
        )
    }
}

/// Read operator lines on a plain thread; a blocking stdin read must not hold up runtime shutdown.
fn spawn_stdin_reader(ui_tx: flume::Sender<UiToCore>) -> Result<()> {
    std::thread::Builder::new()
        .name("panel-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match panel::parse_command(&line) {
                    Ok(Some(cmd)) => {
                        if ui_tx.send(cmd).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => eprintln!("{err}"),
                }
            }
            let _ = ui_tx.send(UiToCore::Quit);
        })
        .context("Failed to spawn the stdin reader")?;
    Ok(())
}

async fn dispatch(console: &Console, config: &ConsoleConfig, printer: &mut Printer, cmd: UiToCore) {
    // Failures already reach the printer as status notifications
    match cmd {
        UiToCore::Connect { host, rack, slot } => {
            let endpoint = Endpoint::new(
                host.unwrap_or_else(|| config.plc.host.clone()),
                rack.unwrap_or(config.plc.rack),
                slot.unwrap_or(config.plc.slot),
            );
            let _ = console.connect(endpoint).await;
        }
        UiToCore::Disconnect => {
            let _ = console.disconnect().await;
        }
        UiToCore::SetChannel { channel, value } => {
            let _ = console.set_channel(&channel, value).await;
        }
        UiToCore::ToggleChannel(channel) => {
            let _ = console.toggle_channel(&channel).await;
        }
        UiToCore::SetAllOutputs(value) => {
            let _ = console.set_all_outputs(value).await;
        }
        UiToCore::EnableTelemetry {
            enabled,
            url,
            api_key,
        } => {
            let _ = console.enable_telemetry(enabled, url, api_key);
        }
        UiToCore::Show => printer.snapshot(console.snapshot(), true),
        UiToCore::Stats => printer.stats(&console.telemetry_stats()),
        UiToCore::Help => printer.message(panel::HELP),
        UiToCore::Quit => {}
    }
}

/// Run the operator panel until `quit`, end of input or Ctrl+C.
pub async fn run(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches)?;
    log::debug!("Effective configuration: {config:?}");

    let console = Console::new(
        connector(&config, matches.get_flag("simulate")),
        config.console_options(),
    );
    let mut printer = Printer::new(matches.get_flag("json"));
    let core_rx = console.subscribe();
    let (ui_tx, ui_rx) = flume::unbounded();
    spawn_stdin_reader(ui_tx)?;

    if matches.get_flag("connect") {
        let _ = console.connect(config.endpoint()).await;
    } else {
        printer.message("Status: Disconnected (type 'help' for commands)");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted, shutting down");
                break;
            }
            msg = core_rx.recv_async() => match msg {
                Ok(CoreToUi::Snapshot(shadow)) => printer.snapshot(shadow, false),
                Ok(CoreToUi::Status(status)) => printer.status(&status),
                Err(_) => break,
            },
            cmd = ui_rx.recv_async() => match cmd {
                Ok(UiToCore::Quit) | Err(_) => break,
                Ok(cmd) => dispatch(&console, &config, &mut printer, cmd).await,
            },
        }
    }

    console.shutdown().await;
    while let Ok(CoreToUi::Status(status)) = core_rx.try_recv() {
        printer.status(&status);
    }
    Ok(())
}
