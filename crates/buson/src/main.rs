mod cli;
mod commands;
mod error;

use std::path::PathBuf;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _guard = match init_tracing(&cli.global) {
        Ok(guard) => guard,
        Err(err) => fail(err),
    };

    if let Err(err) = run(cli).await {
        fail(err);
    }
}

fn fail(err: CliError) -> ! {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    std::process::exit(code);
}

fn init_tracing(global: &GlobalOpts) -> Result<Option<WorkerGuard>, CliError> {
    let level = match global.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(path) = &global.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CliError::Validation {
            field: "log-file".into(),
            reason: format!("'{}' is not a file path", path.display()),
        })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&dir)
        .map_err(|e| CliError::Validation {
            field: "log-file".into(),
            reason: e.to_string(),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    Ok(Some(guard))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(buson_config::config_path);

    match cli.command {
        Command::Run(args) => commands::run::handle(args, &config_path).await,

        Command::Config(args) => commands::config_cmd::handle(args, &config_path),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "buson", &mut std::io::stdout());
            Ok(())
        }
    }
}
