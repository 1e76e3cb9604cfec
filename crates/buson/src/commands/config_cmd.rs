//! Config subcommand handlers.

use std::path::Path;

use dialoguer::{Input, Select};

use buson_config::{Config, ConfigError};
use buson_core::{DeviceClass, Direction};

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::error::CliError;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn load_existing(path: &Path) -> Result<Config, CliError> {
    if path.exists() {
        Ok(buson_config::load_config_from(path)?)
    } else {
        Ok(Config::default())
    }
}

fn text(prompt: &str, current: &str) -> Result<String, CliError> {
    Input::<String>::new()
        .with_prompt(prompt)
        .default(current.to_owned())
        .show_default(!current.is_empty())
        .allow_empty(true)
        .interact_text()
        .map(|s| s.trim().to_owned())
        .map_err(prompt_err)
}

fn require(field: &str, value: &str) -> Result<(), CliError> {
    if value.is_empty() {
        return Err(CliError::Validation {
            field: field.into(),
            reason: "cannot be empty".into(),
        });
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, path: &Path) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let mut cfg = load_existing(path)?;
            eprintln!("buson terminal setup");
            eprintln!("   Config path: {}\n", path.display());

            cfg.device_id = text("Device ID", &cfg.device_id)?;
            require("device_id", &cfg.device_id)?;

            cfg.server_ip = text("Server IP", &cfg.server_ip)?;
            require("server_ip", &cfg.server_ip)?;

            cfg.port = Input::new()
                .with_prompt("Server port")
                .default(cfg.port)
                .interact_text()
                .map_err(prompt_err)?;

            cfg.vehicle_no = text("Vehicle number (blank if unassigned)", &cfg.vehicle_no)?;
            cfg.bus_no = text("Bus route number (blank if unassigned)", &cfg.bus_no)?;

            let directions = [Direction::Up, Direction::Down];
            let labels: Vec<String> = directions
                .iter()
                .map(|d| format!("{d} ({})", d.wire_label()))
                .collect();
            let selected = Select::new()
                .with_prompt("Direction")
                .items(&labels)
                .default(directions.iter().position(|d| *d == cfg.direction).unwrap_or(0))
                .interact()
                .map_err(prompt_err)?;
            cfg.direction = directions.get(selected).copied().unwrap_or_default();

            let classes = [DeviceClass::Vehicle, DeviceClass::Handheld, DeviceClass::StopBeacon];
            let selected = Select::new()
                .with_prompt("Device type")
                .items(&classes)
                .default(classes.iter().position(|c| *c == cfg.device_type).unwrap_or(0))
                .interact()
                .map_err(prompt_err)?;
            cfg.device_type = classes.get(selected).copied().unwrap_or_default();

            buson_config::save_config_to(&cfg, path)?;

            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("\n  Start the terminal: buson run");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            if !path.exists() {
                return Err(CliError::NoConfig {
                    path: path.display().to_string(),
                });
            }
            let cfg = buson_config::load_config_from(path)?;
            let rendered = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            print!("{rendered}");
            if !cfg.is_complete() {
                eprintln!("note: device_id and server_ip must both be set before the terminal can connect");
            }
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = load_existing(path)?;
            cfg.set(&key, &value)?;
            buson_config::save_config_to(&cfg, path)?;
            eprintln!("✓ Set {key}");
            Ok(())
        }
    }
}
