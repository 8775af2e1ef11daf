//! midi-hotkeys - turn MIDI buttons and knobs into hotkeys and MQTT messages

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_hotkeys::actuators::{
    ActionDispatcher, CommandInjector, ConsoleActuator, KeystrokeActuator, MqttActuator, NativeInjector,
};
use midi_hotkeys::config::AppConfig;
use midi_hotkeys::engine::{Engine, EngineHandle, EngineSettings};
use midi_hotkeys::hotplug::{forward_to_engine, PortScanner, ScanMonitor, UsbScanner};
use midi_hotkeys::port::{print_ports, MidirBackend};

/// Trigger hotkeys and MQTT messages from a MIDI controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log actions instead of pressing keys or publishing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        print_ports(&MidirBackend::default())?;
        return Ok(());
    }

    info!("Starting midi-hotkeys {}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;
    for warning in config.warnings() {
        warn!("Config: {}", warning);
    }
    info!("✅ Configuration loaded ({} hotkeys)", config.hotkeys.len());

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (engine, handle) = Engine::new(
        EngineSettings::from_config(&config),
        MidirBackend::default(),
        actions_tx,
    );

    let mut background = Vec::new();

    let dispatcher = build_dispatcher(&config, args.dry_run, &handle, &mut background);
    background.push(dispatcher.spawn(actions_rx));

    // Port names cover every platform; USB ids let `midi.device` match
    let (hotplug_tx, hotplug_rx) = mpsc::channel(16);
    let scan_interval = config.midi.scan_interval();
    background.push(
        ScanMonitor::new(PortScanner::new(MidirBackend::default()), scan_interval).spawn(hotplug_tx.clone()),
    );
    background.push(ScanMonitor::new(UsbScanner, scan_interval).spawn(hotplug_tx));
    background.push(forward_to_engine(hotplug_rx, handle.clone()));

    engine.run(shutdown_signal()).await;

    for task in background {
        task.abort();
    }

    info!("midi-hotkeys shutdown complete");
    Ok(())
}

fn build_dispatcher(
    config: &AppConfig,
    dry_run: bool,
    engine: &EngineHandle,
    background: &mut Vec<tokio::task::JoinHandle<()>>,
) -> ActionDispatcher {
    if dry_run {
        info!("Dry run: actions are only logged");
        return ActionDispatcher::new().with(ConsoleActuator::new("dry-run"));
    }

    let mut dispatcher = ActionDispatcher::new();
    let mut typing = true;

    match config.keys.as_ref() {
        Some(keys) => {
            info!("Keys are sent through '{}'", keys.command.join(" "));
            dispatcher = dispatcher.with(KeystrokeActuator::new(CommandInjector::new(keys.command.clone())));
        }
        None => match NativeInjector::spawn() {
            Ok(injector) => dispatcher = dispatcher.with(KeystrokeActuator::new(injector)),
            Err(e) => {
                warn!("Native key injection unavailable, key actions are only logged: {:#}", e);
                typing = false;
            }
        },
    }

    if !typing {
        dispatcher = dispatcher.with(ConsoleActuator::new("console"));
    }

    if let Some(mqtt) = &config.mqtt {
        let (actuator, task) = MqttActuator::connect(mqtt, engine.clone());
        background.push(task);
        dispatcher = dispatcher.with(actuator);
    }

    dispatcher
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
