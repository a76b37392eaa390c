//! Airspace monitor replay driver.
//!
//! Reads decoded network events as JSON lines from stdin and writes airspace
//! notifications and outbound commands as JSON lines to stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airspace_monitor::{
    spawn_monitor, AirspaceMonitor, AirspaceNotification, ChannelCommands, Config, DataFileReader, DataFileSnapshot,
    InboundEvent, OutboundCommand, ReloadableDataFile, StaticOwnAircraft,
};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the output stream
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("airspace_monitor=debug".parse()?))
        .init();

    tracing::info!("Starting airspace monitor...");

    let config = Config::from_env();
    // DataFileRead events re-read the file from disk
    let data_file: Arc<dyn DataFileReader> = match &config.data_file {
        Some(path) => Arc::new(ReloadableDataFile::open(path.clone())?),
        None => Arc::new(DataFileSnapshot::default()),
    };
    let (commands, command_rx) = ChannelCommands::new(config.connected);
    let monitor = AirspaceMonitor::new(
        config.settings.clone(),
        Arc::new(commands),
        Arc::new(StaticOwnAircraft::new(config.own_aircraft.clone())),
        data_file,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (handle, monitor_task) = spawn_monitor(monitor, config.intervals, shutdown_rx);
    let output_task = tokio::spawn(write_output(handle.subscribe(), command_rx, shutdown_tx.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundEvent>(&line) {
                    Ok(event) => handle.dispatch(event)?,
                    Err(err) => tracing::warn!("Skipping line {}: {}", line_no, err),
                }
            }
        }
    }

    handle.shutdown()?;
    monitor_task.await.context("Monitor loop panicked")?;
    // Loop is gone; let the writer drain and stop
    let _ = shutdown_tx.send(());
    output_task.await.context("Output writer panicked")?;

    tracing::info!("Airspace monitor stopped");
    Ok(())
}

async fn write_output(
    mut notifications: broadcast::Receiver<AirspaceNotification>,
    mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => print_json(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Output lagging, skipped {} notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(command) = commands.recv() => print_json(&command),
            _ = shutdown.recv() => break,
        }
    }
    while let Ok(notification) = notifications.try_recv() {
        print_json(&notification);
    }
    while let Ok(command) = commands.try_recv() {
        print_json(&command);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::warn!("Failed to serialize output: {}", err),
    }
}
