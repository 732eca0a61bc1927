//! # WASPI
//!
//! Hive telemetry gateway for a Raspberry Pi.
//!
//! Every cycle pulls one sensor report from the microcontroller over serial,
//! stores it locally, publishes it to the MQTT broker and then records the
//! accelerometer, while staying out of the way of the file-sync process.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use waspi::config::Config;
use waspi::heartbeat;
use waspi::lock::LockCoordinator;
use waspi::messenger::MqttMessenger;
use waspi::orchestrator::{
    ProgramOrchestrator, RecordingPhase, SyncAwareOrchestrator, SyncSettings, Timing,
    DEFAULT_CYCLE_PAUSE,
};
use waspi::recorder::ArecordRecorder;
use waspi::schedule::Trigger;
use waspi::sensor::SerialReceiver;
use waspi::serial::Transport;
use waspi::store::JsonlStore;

/// Config file used when neither an argument nor `WASPI_CONFIG` is given
const DEFAULT_CONFIG_PATH: &str = "config/waspi.toml";

/// Main entry point for the gateway
///
/// # Control Flow
///
/// 1. Load and validate the configuration
/// 2. Set up logging (stdout, plus a daily rolling file if configured)
/// 3. Build the serial receiver, messenger, store and recorder
/// 4. Run cycles until Ctrl+C or SIGTERM
///
/// # Errors
///
/// Returns error if the configuration is invalid or the data directory
/// cannot be created. Hardware and broker problems are never fatal.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WASPI_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let _log_guard = init_logging(&config)?;

    info!("WASPI v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path.display());

    let transport = Transport::with_tokio_serial(
        Duration::from_millis(config.serial.read_timeout_ms),
        Duration::from_millis(config.serial.frame_timeout_ms),
    );
    let receiver = SerialReceiver::new(
        transport,
        config.schema.clone(),
        config.receiver_settings(),
    );
    info!(
        "Report schema v{}: {} fields, {} bytes",
        config.schema.protocol_version,
        config.schema.fields.len(),
        config.schema.payload_width()
    );

    let messenger = MqttMessenger::new(config.mqtt_settings()?);
    let store = JsonlStore::new(&config.storage.data_dir, config.storage.max_records_per_file)?;

    let timing = Timing {
        max_serial_timeout: Duration::from_secs(config.timing.max_serial_timeout_s),
        break_duration: Duration::from_secs(config.timing.break_s),
        max_cycle_overhead: Duration::from_secs(config.timing.max_cycle_overhead_s),
        publish_timeout: Duration::from_millis(config.mqtt.timeout_ms)
            + Duration::from_secs(config.timing.max_cycle_overhead_s),
        cycle_pause: DEFAULT_CYCLE_PAUSE,
    };

    if config.heartbeat.enabled {
        let heartbeat_messenger = messenger.with_topic(config.heartbeat.topic.clone());
        let interval = Duration::from_secs(config.heartbeat.interval_s);
        tokio::spawn(heartbeat::run(Box::new(heartbeat_messenger), interval));
        info!("Heartbeat every {:?} on {}", interval, config.heartbeat.topic);
    }

    let mut orchestrator =
        ProgramOrchestrator::new(receiver, Box::new(messenger), Box::new(store), timing);

    if config.recording.enabled {
        let trigger = if config.recording.interval_s == 0 {
            Trigger::always()
        } else {
            Trigger::every(
                Duration::from_secs(config.recording.interval_s),
                chrono::Utc::now(),
            )
        };
        let recorder = ArecordRecorder::new(config.recorder_settings());
        orchestrator = orchestrator.with_recording(RecordingPhase::new(
            Box::new(recorder),
            config.recording.hwid.clone(),
            trigger,
        ));
    } else {
        warn!("Secondary recording disabled");
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    if config.lock.enabled {
        let settings = SyncSettings {
            poll_interval: Duration::from_secs(config.lock.poll_interval_s),
            max_wait: Duration::from_secs(config.lock.max_wait_s),
        };
        info!("Coordinating with file sync through {}", config.lock.path.display());
        let mut orchestrator = SyncAwareOrchestrator::new(
            orchestrator,
            LockCoordinator::new(&config.lock.path),
            settings,
        );

        tokio::select! {
            _ = orchestrator.run_forever() => {}
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    } else {
        tokio::select! {
            _ = orchestrator.run_forever() => {}
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    info!("WASPI stopped");
    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides `logging.level`. The returned guard flushes the file
/// writer and must live until exit.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("parsing log level")?;

    let (file_layer, guard) = match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "waspi.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
