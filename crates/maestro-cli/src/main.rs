/*!
 * Maestro command-line front end.
 *
 * Loads configuration and the device/activity catalog from one TOML file,
 * wires the default adapters into a control service and runs one command.
 * Results are printed to stdout as JSON; logs go to stderr.
 */
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

use maestro_core::logging;
use maestro_core::prelude::*;
use maestro_devices::{available_protocols, default_adapters, CommandPayload, CommandType, DeviceCommand};
use maestro_engine::{Catalog, ControlService, InMemoryStore};

#[derive(Parser)]
#[command(name = "maestro")]
#[command(version, about = "Control home-theater devices and run activities")]
struct Cli {
    /// TOML file with configuration sections and the [[devices]] / [[activities]] catalog
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level (e.g. "debug", "maestro_devices=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices, activities and compiled-in protocols
    List,

    /// Run an activity; Ctrl-C cancels it
    Run {
        /// Activity id
        activity_id: String,
    },

    /// Send one command to a device
    Send {
        /// Device id
        device_id: String,

        /// Command name, e.g. power_on, home, app_launch
        command: String,

        /// Command argument: app or input name, text, "x,y" for tap, raw code for custom
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Query a device's status
    Status {
        /// Device id
        device_id: String,
    },
}

/// Build a command from its CLI spelling
fn parse_command(name: &str, payload: Option<&str>) -> anyhow::Result<DeviceCommand> {
    let action = CommandType::from_str(name)?;
    let mut command = DeviceCommand::new(action);

    if let Some(payload) = payload {
        let payload = match action {
            CommandType::Tap => {
                let (x, y) = payload
                    .split_once(',')
                    .ok_or_else(|| anyhow!("tap expects \"x,y\", got '{}'", payload))?;
                CommandPayload::Coordinates {
                    x: x.trim().parse().context("tap x coordinate")?,
                    y: y.trim().parse().context("tap y coordinate")?,
                }
            }
            CommandType::Custom => CommandPayload::Code(payload.to_string()),
            _ => CommandPayload::Text(payload.to_string()),
        };
        command = command.payload(payload);
    }
    Ok(command)
}

/// A token cancelled by the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Log progress events as they arrive
fn report_progress(mut events: broadcast::Receiver<ControlEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControlEvent::StepCompleted {
                    step_order,
                    device_id,
                    success,
                    ..
                }) => info!("step {} on {}: {}", step_order, device_id, if success { "ok" } else { "failed" }),
                Ok(ControlEvent::DeviceStatusChanged { device_id, is_online }) => {
                    debug!("{} is {}", device_id, if is_online { "online" } else { "offline" })
                }
                Ok(ControlEvent::ActivityCompleted { .. }) => {}
                Err(RecvError::Lagged(missed)) => debug!("Missed {} progress events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_service(config: &Config, catalog: Catalog) -> anyhow::Result<ControlService> {
    let bus_notifier = EventBusNotifier::new(SharedEventBus::new());
    report_progress(bus_notifier.subscribe()?);
    let notifier: Arc<dyn Notifier> = Arc::new(bus_notifier);

    let registry = default_adapters(&config.adapters, notifier.clone())?.build();
    let store = Arc::new(InMemoryStore::from_catalog(catalog)?);

    Ok(ControlService::new(
        store.clone(),
        store,
        Arc::new(registry),
        notifier,
        config.engine.clone(),
    ))
}

async fn run(command: Commands, service: &ControlService) -> anyhow::Result<ExitCode> {
    match command {
        Commands::List => {
            print_json(&json!({
                "protocols": available_protocols(),
                "devices": service.list_devices().await?,
                "activities": service.list_activities().await?,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { activity_id } => {
            let result = service
                .execute_activity(&Id::from(activity_id), cancel_on_ctrl_c())
                .await?;
            print_json(&result)?;
            Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Send {
            device_id,
            command,
            payload,
        } => {
            let command = parse_command(&command, payload.as_deref())?;
            let outcome = service
                .send_device_command(&Id::from(device_id.as_str()), &command, cancel_on_ctrl_c())
                .await?;
            print_json(&json!({
                "device_id": device_id,
                "command": command,
                "outcome": outcome,
            }))?;
            Ok(if outcome.accepted { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Status { device_id } => {
            let status = service.device_status(&Id::from(device_id.as_str())).await?;
            print_json(&json!({ "device_id": device_id, "status": status }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder = ConfigBuilder::new().with_environment_prefix("MAESTRO");
    if let Some(path) = &cli.config {
        builder = builder.with_config_file(path);
    }
    let config = builder.build().context("Failed to load configuration")?;

    match &cli.log_level {
        Some(level) => logging::init_with_filter(level)?,
        None => logging::init_from_config(&config.logging)?,
    }

    let catalog = match &cli.config {
        Some(path) => Catalog::load(path)
            .await
            .with_context(|| format!("Failed to load catalog from {}", path.display()))?,
        None => Catalog::default(),
    };

    let service = build_service(&config, catalog).await?;
    let outcome = run(cli.command, &service).await;
    service.shutdown().await;
    outcome
}
