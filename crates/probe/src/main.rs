//! waylink probe
//!
//! Connects to a display server and reports what it advertises: the global
//! list, round-trip latency, and global changes over time.

mod cli;
mod config;
mod session;

use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::{Result, bail};
use config::Config;
use std::time::{Duration, Instant};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use waylink::{Global, RegistryEvent};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())?
        .with_display(cli.display.clone())
        .with_log_level(cli.log_level.clone());

    let wire_debug =
        config::wire_debug_requested(std::env::var("WAYLAND_DEBUG").ok().as_deref());
    init_logging(&config::log_directives(&config.log_level, wire_debug))?;
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Command::Globals => cmd_globals(&config).await,
        Command::Roundtrip { count } => cmd_roundtrip(&config, count).await,
        Command::Monitor => cmd_monitor(&config).await,
    }
}

fn init_logging(directives: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn cmd_globals(config: &Config) -> Result<()> {
    let display = session::connect(config).await?;

    let registry = session::with_deadline(&display, config.timeout(), |d| {
        let registry = d.get_registry()?;
        d.roundtrip()?;
        Ok(registry)
    })
    .await?;

    let mut globals = registry.globals();
    globals.sort_by_key(|g| g.name);
    for global in &globals {
        println!("{}", format_global(global));
    }
    tracing::info!(count = globals.len(), "Listed globals");

    session::close(&display).await
}

async fn cmd_roundtrip(config: &Config, count: u32) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }

    let display = session::connect(config).await?;

    let mut samples = Vec::with_capacity(count as usize);
    for i in 0..count {
        let started = Instant::now();
        let serial =
            session::with_deadline(&display, config.timeout(), |d| d.roundtrip()).await?;
        let elapsed = started.elapsed();
        println!("roundtrip {i}: serial {serial} in {}", format_duration(elapsed));
        samples.push(elapsed);
    }

    if let Some(summary) = summarize(&samples) {
        println!("{summary}");
    }

    session::close(&display).await
}

async fn cmd_monitor(config: &Config) -> Result<()> {
    let display = session::connect(config).await?;

    let registry =
        session::with_deadline(&display, config.timeout(), |d| d.get_registry()).await?;
    registry.set_listener(|event| match event {
        RegistryEvent::Global(global) => println!("+ {}", format_global(global)),
        RegistryEvent::GlobalRemove { name } => println!("- {name:>4}"),
    });
    session::with_deadline(&display, config.timeout(), |d| d.roundtrip()).await?;

    tracing::info!("Watching for global changes, interrupt to stop");

    let mut pumping = tokio::spawn(session::pump(std::sync::Arc::clone(&display)));

    tokio::select! {
        joined = &mut pumping => {
            joined??;
            tracing::info!("Server closed the connection");
        }
        signal = session::shutdown_signal() => {
            signal?;
            session::close(&display).await?;
            pumping.await??;
        }
    }

    Ok(())
}

fn format_global(global: &Global) -> String {
    format!("{:>4}  {:<40} v{}", global.name, global.interface, global.version)
}

fn format_duration(d: Duration) -> String {
    format!("{:.3} ms", d.as_secs_f64() * 1000.0)
}

/// `min/avg/max` over round-trip samples.
fn summarize(samples: &[Duration]) -> Option<String> {
    let min = samples.iter().min()?;
    let max = samples.iter().max()?;
    let total: Duration = samples.iter().sum();
    let avg = total / u32::try_from(samples.len()).ok()?;
    Some(format!(
        "{} roundtrips: min {} / avg {} / max {}",
        samples.len(),
        format_duration(*min),
        format_duration(avg),
        format_duration(*max)
    ))
}
