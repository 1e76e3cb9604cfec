//! `buson run`: the terminal daemon.
//!
//! Starts the link, reports link state and server commands on stderr,
//! and reads local inputs (door sensor, reset button, driver decisions,
//! GPS fixes) as lines on stdin until interrupted.

use std::path::Path;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use tracing::{info, warn};

use buson_config::FileConfig;
use buson_core::{Dispatch, Position, Terminal, TerminalEvent, install_defaults};

use crate::cli::RunArgs;
use crate::error::CliError;

const INPUT_HELP: &str = "\
local inputs:
  door open | door close     report the door state
  accept <id> | reject <id>  answer a ride request
  gps <lat> <lon> [speed]    set the current fix
  gps off                    drop the fix
  reset                      local reset to idle
  status                     print link and device state
  help                       show this list";

/// One line of local input.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalInput {
    Door { open: bool },
    Respond { request_id: String, accepted: bool },
    Fix(Position),
    NoFix,
    Reset,
    Status,
    Help,
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
pub fn parse_input(line: &str) -> Result<Option<LocalInput>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let input = match words.as_slice() {
        [] => return Ok(None),
        ["door", "open"] => LocalInput::Door { open: true },
        ["door", "close" | "closed"] => LocalInput::Door { open: false },
        ["accept", id] => LocalInput::Respond {
            request_id: (*id).to_owned(),
            accepted: true,
        },
        ["reject", id] => LocalInput::Respond {
            request_id: (*id).to_owned(),
            accepted: false,
        },
        ["gps", "off"] => LocalInput::NoFix,
        ["gps", lat, lon, rest @ ..] if rest.len() <= 1 => LocalInput::Fix(Position {
            lat: number(lat)?,
            lon: number(lon)?,
            speed: rest.first().copied().map(number).transpose()?,
            time: None,
        }),
        ["reset"] => LocalInput::Reset,
        ["status"] => LocalInput::Status,
        ["help" | "?"] => LocalInput::Help,
        _ => return Err(format!("unknown input '{}', try 'help'", line.trim())),
    };
    Ok(Some(input))
}

fn number(s: &str) -> Result<f64, String> {
    s.parse().map_err(|_| format!("not a number: '{s}'"))
}

pub async fn handle(args: RunArgs, config_path: &Path) -> Result<(), CliError> {
    let cfg = buson_config::load_config_from(config_path)?;
    if !cfg.is_complete() {
        warn!(
            path = %config_path.display(),
            "device_id or server_ip not set; waiting for the config file to be completed"
        );
    }

    let terminal = Terminal::with_timing(FileConfig::new(config_path), cfg.to_link_timing());
    if !args.no_default_handlers {
        install_defaults(terminal.dispatcher(), terminal.state());
    }
    let mut events = terminal.subscribe();
    terminal.start().await?;
    info!(path = %config_path.display(), "terminal running");

    let mut stdin = (!args.no_stdin).then(|| BufReader::new(tokio::io::stdin()).lines());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = next_line(&mut stdin) => match line {
                Some(line) => match parse_input(&line) {
                    Ok(Some(input)) => apply(&terminal, input),
                    Ok(None) => {}
                    Err(msg) => eprintln!("{msg}"),
                },
                // stdin closed: keep running until interrupted
                None => stdin = None,
            },
        }
    }

    info!("shutting down");
    terminal.stop().await;
    Ok(())
}

async fn next_line(stdin: &mut Option<Lines<BufReader<Stdin>>>) -> Option<String> {
    match stdin {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

fn report(event: &TerminalEvent) {
    match event {
        TerminalEvent::StateChanged(state) => eprintln!("link: {state}"),
        TerminalEvent::Inbound(Dispatch::Handled { event }) => eprintln!("server: {event}"),
        TerminalEvent::Inbound(Dispatch::Unhandled { event }) => {
            eprintln!("server: {event} (no handler)");
        }
        TerminalEvent::Inbound(Dispatch::Failed { event, reason }) => {
            eprintln!("server: {event} failed: {reason}");
        }
        TerminalEvent::Inbound(Dispatch::RoundTrip { .. } | Dispatch::Ignored) => {}
    }
}

fn apply(terminal: &Terminal, input: LocalInput) {
    let delivered = match input {
        LocalInput::Door { open } => {
            let state = if open { "open" } else { "close" };
            terminal.send_event("door", json!({ "state": state }))
        }
        // Status follows the server's next command, not the local answer.
        LocalInput::Respond {
            request_id,
            accepted,
        } => terminal.respond_to_ride(request_id, accepted),
        LocalInput::Fix(position) => {
            terminal.state().set_position(Some(position));
            return;
        }
        LocalInput::NoFix => {
            terminal.state().set_position(None);
            return;
        }
        LocalInput::Reset => {
            terminal.state().force_idle();
            return;
        }
        LocalInput::Status => {
            let link = terminal.link_status();
            let snap = terminal.state().snapshot();
            eprintln!(
                "link: {} | rtt: {} | status: {} | stop: {} | gps: {}",
                link.state,
                link.rtt_ms.map_or_else(|| "-".into(), |ms| format!("{ms} ms")),
                snap.status,
                snap.stop.as_deref().unwrap_or("-"),
                snap.position
                    .as_ref()
                    .map_or_else(|| "no fix".into(), |p| format!("{:.5},{:.5}", p.lat, p.lon)),
            );
            if let Some(error) = link.last_error {
                eprintln!("last error: {error}");
            }
            return;
        }
        LocalInput::Help => {
            eprintln!("{INPUT_HELP}");
            return;
        }
    };

    if !delivered {
        eprintln!("not connected, dropped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_door_inputs() {
        assert_eq!(parse_input("door open"), Ok(Some(LocalInput::Door { open: true })));
        assert_eq!(parse_input("  door   close "), Ok(Some(LocalInput::Door { open: false })));
        assert_eq!(parse_input(""), Ok(None));
    }

    #[test]
    fn parses_ride_decisions() {
        assert_eq!(
            parse_input("reject r-17"),
            Ok(Some(LocalInput::Respond {
                request_id: "r-17".into(),
                accepted: false
            }))
        );
        assert!(parse_input("accept").is_err());
    }

    #[test]
    fn parses_gps() {
        let Some(LocalInput::Fix(p)) = parse_input("gps 37.5665 126.978 32.5").unwrap() else {
            panic!("expected a fix");
        };
        assert!((p.lat - 37.5665).abs() < f64::EPSILON);
        assert_eq!(p.speed, Some(32.5));

        assert_eq!(parse_input("gps off"), Ok(Some(LocalInput::NoFix)));
        assert!(parse_input("gps north 126.9").unwrap_err().contains("north"));
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse_input("launch rockets").unwrap_err().contains("try 'help'"));
    }

    #[tokio::test]
    async fn accept_reports_decision_without_touching_status() {
        use std::time::Duration;

        use buson_core::{ConnectionState, DeviceConfig, DeviceStatus, LinkTiming};
        use futures_util::StreamExt;
        use serde_json::Value;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (frames_tx, mut frames) = tokio::sync::mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Ok(value) = serde_json::from_str(message.to_text().unwrap_or_default()) {
                    let _ = frames_tx.send(value);
                }
            }
        });

        let config = DeviceConfig {
            device_id: "BUS-1".into(),
            server_host: "127.0.0.1".into(),
            port,
            ..DeviceConfig::default()
        };
        let timing = LinkTiming {
            telemetry_interval: Duration::from_secs(60),
            ..LinkTiming::default()
        };
        let terminal = Terminal::with_timing(config, timing);
        install_defaults(terminal.dispatcher(), terminal.state());
        terminal.start().await.unwrap();

        let mut link = terminal.watch_link();
        tokio::time::timeout(
            Duration::from_secs(5),
            link.wait_for(|l| l.state == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        terminal
            .dispatcher()
            .emit("ride_request", &json!({ "stopName": "Central" }));
        apply(
            &terminal,
            LocalInput::Respond {
                request_id: "r-7".into(),
                accepted: true,
            },
        );

        let response = loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
                .await
                .unwrap()
                .unwrap();
            if frame["type"] == "ride_response" {
                break frame;
            }
        };
        assert_eq!(response["payload"]["requestId"], "r-7");
        assert_eq!(response["payload"]["decision"], "accepted");

        let snapshot = terminal.state().snapshot();
        assert_eq!(snapshot.status, DeviceStatus::RidePending);
        assert_eq!(snapshot.stop.as_deref(), Some("Central"));

        terminal.stop().await;
    }
}
