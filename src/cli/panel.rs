/// Line-oriented operator panel on stdin/stdout
use anyhow::{anyhow, bail, Result};
use std::{fmt::Write as _, sync::Arc};

use crate::{
    api::telemetry::PublishCounts,
    core::bus::{ConsoleStatus, UiToCore},
    protocol::{bitfield, channel::DigitalArea, shadow::IoShadow},
};
use strum::IntoEnumIterator;

pub const HELP: &str = "\
Commands:
  connect [ip [rack [slot]]]   connect to the device (defaults from config)
  disconnect                   stop polling and release the device
  on <Qb.n> | off <Qb.n>       set one output
  toggle <Qb.n>                invert one output
  all on | all off             set every output
  api on [url [key]]           enable telemetry push
  api off                      disable telemetry push
  show                         print the current I/O snapshot
  stats                        print telemetry counters
  help                         this text
  quit                         disconnect and exit";

fn parse_switch(word: Option<&str>) -> Result<bool> {
    match word.map(str::to_ascii_lowercase).as_deref() {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        Some(other) => bail!("expected 'on' or 'off', got '{other}'"),
        None => bail!("expected 'on' or 'off'"),
    }
}

fn parse_number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> Result<Option<T>> {
    word.map(|w| {
        w.parse::<T>()
            .map_err(|_| anyhow!("{what} must be a number, got '{w}'"))
    })
    .transpose()
}

/// Parse one operator line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<UiToCore>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();

    let channel_arg = |word: Option<&str>| {
        word.map(str::to_string)
            .ok_or_else(|| anyhow!("'{verb}' needs a channel such as Q0.3"))
    };

    let command = match verb.as_str() {
        "connect" => UiToCore::Connect {
            host: words.next().map(str::to_string),
            rack: parse_number(words.next(), "rack")?,
            slot: parse_number(words.next(), "slot")?,
        },
        "disconnect" => UiToCore::Disconnect,
        "on" | "off" => UiToCore::SetChannel {
            channel: channel_arg(words.next())?,
            value: verb == "on",
        },
        "set" => {
            let channel = channel_arg(words.next())?;
            UiToCore::SetChannel {
                channel,
                value: parse_switch(words.next())?,
            }
        }
        "toggle" => UiToCore::ToggleChannel(channel_arg(words.next())?),
        "all" => UiToCore::SetAllOutputs(parse_switch(words.next())?),
        "api" => {
            let enabled = parse_switch(words.next())?;
            UiToCore::EnableTelemetry {
                enabled,
                url: words.next().map(str::to_string),
                api_key: words.next().map(str::to_string),
            }
        }
        "show" => UiToCore::Show,
        "stats" => UiToCore::Stats,
        "help" | "?" => UiToCore::Help,
        "quit" | "exit" => UiToCore::Quit,
        other => bail!("unknown command '{other}', type 'help'"),
    };

    if let Some(extra) = words.next() {
        bail!("unexpected argument '{extra}'");
    }
    Ok(Some(command))
}

/// Plain-text rendering, one row per area byte.
pub fn render_snapshot(shadow: &IoShadow) -> String {
    let mut out = String::new();
    for area in DigitalArea::iter() {
        let bits = bitfield::unpack(&shadow.image(area));
        for (byte, row) in bits.chunks(usize::from(bitfield::BITS_PER_BYTE)).enumerate() {
            let _ = write!(out, "{}{byte}.0-7 ", area.prefix());
            for on in row {
                out.push_str(if *on { " ON " } else { " .  " });
            }
            out.push('\n');
        }
    }
    out
}

pub fn snapshot_json(shadow: &IoShadow) -> serde_json::Value {
    serde_json::json!({
        "type": "snapshot",
        "inputs": shadow.flat_map(DigitalArea::Inputs),
        "outputs": shadow.flat_map(DigitalArea::Outputs),
    })
}

pub fn status_json(status: &ConsoleStatus) -> serde_json::Value {
    serde_json::json!({ "type": "status", "text": status.to_string() })
}

/// Prints notifications, suppressing snapshots identical to the last one shown.
#[derive(Debug, Default)]
pub struct Printer {
    json: bool,
    last: Option<Arc<IoShadow>>,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json, last: None }
    }

    pub fn snapshot(&mut self, shadow: Arc<IoShadow>, force: bool) {
        if !force && self.last.as_deref() == Some(&*shadow) {
            return;
        }
        if self.json {
            println!("{}", snapshot_json(&shadow));
        } else {
            print!("{}", render_snapshot(&shadow));
        }
        self.last = Some(shadow);
    }

    pub fn status(&self, status: &ConsoleStatus) {
        if self.json {
            println!("{}", status_json(status));
        } else {
            println!("{status}");
        }
    }

    pub fn stats(&self, counts: &PublishCounts) {
        if self.json {
            println!(
                "{}",
                serde_json::json!({ "type": "stats", "telemetry": counts })
            );
        } else {
            println!(
                "telemetry: {} attempts, {} ok, {} failed, {} skipped",
                counts.attempts, counts.successes, counts.failures, counts.skipped
            );
        }
    }

    pub fn message(&self, text: &str) {
        if self.json {
            println!("{}", serde_json::json!({ "type": "message", "text": text }));
        } else {
            println!("{text}");
        }
    }
}
