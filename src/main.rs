//! Multi-camera session CLI
//!
//! Drives a session against a simulated camera rig:
//! - `multicam-sync list` - Show bound cameras
//! - `multicam-sync setup <config>...` - Apply setup documents
//! - `multicam-sync feature <serial> <path> <method> [argument]` - Run one feature command
//! - `multicam-sync capture <serial>...` - Synchronized capture

use clap::{Parser, Subcommand};
use multicam_sync::{
    capture::{CaptureRequest, CaptureSlot, ImageCount, NameTemplate, ParseNameTemplateError},
    config::{ConfigError, Settings},
    device::{AccessMode, FeatureValue, Method, SimCameraSpec, SimRig},
    metrics::{MetricsError, MetricsRegistry},
    CameraState, Session, SessionError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_SIM_CAMERAS: [&str; 2] = ["SIM0001", "SIM0002"];

#[derive(Parser)]
#[command(name = "multicam-sync")]
#[command(about = "Synchronized capture across machine-vision cameras")]
#[command(version)]
struct Cli {
    /// Serial of a simulated camera to attach (repeatable)
    #[arg(long = "sim-camera", value_name = "SERIAL", global = true)]
    sim_cameras: Vec<String>,

    /// Session settings file (TOML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List bound cameras
    List,

    /// Initialize cameras and apply setup documents
    Setup {
        /// Setup documents (TOML)
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },

    /// Run one feature command on a camera
    Feature {
        /// Camera serial
        serial: String,

        /// Dotted feature path (e.g. TLStream.StreamBufferCountMode)
        path: String,

        /// GetValue, SetValue or Execute
        method: Method,

        /// Argument for SetValue
        argument: Option<String>,

        /// Required access mode (RO, WO, RW, NA, NI)
        #[arg(short, long)]
        access: Option<AccessMode>,
    },

    /// Capture synchronized images
    Capture {
        /// Serials in start order (trigger secondaries first)
        #[arg(required = true)]
        serials: Vec<String>,

        /// Setup documents applied before capturing
        #[arg(short, long = "config")]
        configs: Vec<PathBuf>,

        /// Number of images, or "c" for continuous
        #[arg(short, long, default_value = "1")]
        images: ImageCount,

        /// Frames per camera per image
        #[arg(short, long, default_value = "1")]
        bursts: u32,

        /// Milliseconds between image starts
        #[arg(short, long, default_value = "0")]
        delay_ms: u64,

        /// Grab timeout in milliseconds (derived from frame rate if omitted)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// File name template
        #[arg(long)]
        template: Option<String>,

        /// First name counter
        #[arg(long, default_value = "0")]
        counter: u64,

        /// Print metrics after the capture
        #[arg(long)]
        print_metrics: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] ParseNameTemplateError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Multicam Sync v{}", multicam_sync::VERSION);

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    let serials = if cli.sim_cameras.is_empty() {
        DEFAULT_SIM_CAMERAS.iter().map(|s| s.to_string()).collect()
    } else {
        cli.sim_cameras
    };
    let rig = SimRig::with_cameras(serials.iter().map(SimCameraSpec::new));
    info!("Attached {} simulated cameras", serials.len());

    let metrics = Arc::new(MetricsRegistry::new()?);
    #[cfg(feature = "metrics")]
    spawn_metrics_server(&settings.metrics, Arc::clone(&metrics));

    let session = Session::open(Box::new(rig.system()), settings)?;
    metrics.observe_cameras(&session.cameras());

    match cli.command {
        Commands::List => list(&session),
        Commands::Setup { configs } => {
            for config in &configs {
                let serial = session.setup(config)?;
                println!("{}: set up from {}", serial, config.display());
                metrics.observe_cameras(&session.cameras());
            }
            list(&session);
        }
        Commands::Feature {
            serial,
            path,
            method,
            argument,
            access,
        } => {
            ensure_initialized(&session, &serial)?;
            metrics.observe_cameras(&session.cameras());
            let argument = argument.as_deref().map(FeatureValue::parse_literal);
            match session.feature_command(&serial, &path, method, access, argument)? {
                Some(value) => println!("{}.{} = {}", serial, path, value),
                None => println!("{}.{}: ok", serial, path),
            }
        }
        Commands::Capture {
            serials,
            configs,
            images,
            bursts,
            delay_ms,
            timeout_ms,
            template,
            counter,
            print_metrics,
        } => {
            for config in &configs {
                session.setup(config)?;
            }
            for serial in &serials {
                ensure_initialized(&session, serial)?;
            }
            metrics.observe_cameras(&session.cameras());
            if let Some((reference, others)) = serials.split_first() {
                for serial in others {
                    session.sync_settings(serial, reference)?;
                }
            }

            let template: NameTemplate = match template {
                Some(text) => text.parse()?,
                None => session.settings().name_template()?,
            };
            let timeout = match timeout_ms {
                Some(ms) => Duration::from_millis(ms),
                None => session.group_image_timeout(&serials)?,
            };

            let request = CaptureRequest::builder(serials)
                .images(images)
                .bursts(bursts)
                .delay(Duration::from_millis(delay_ms))
                .timeout(timeout)
                .counter(counter)
                .build()?;

            let stop = session.stop_signal();
            ctrlc::set_handler(move || stop.stop())?;

            let sink = |slot: &CaptureSlot<'_>| {
                for (result, name) in slot.frames.iter().zip(slot.names(&template)) {
                    match name {
                        Some(name) => println!("{}", name),
                        None => warn!(
                            "Image {} burst {}: no frame from {}",
                            slot.image,
                            slot.burst,
                            result.serial()
                        ),
                    }
                }
                Ok(())
            };
            let report = session.capture_with(&request, sink, |record| {
                metrics.observe_image(record);
                metrics.observe_cameras(&session.cameras());
            })?;

            info!(
                "Captured {} images: {} frames, {} empty, {} aborted{}",
                report.images.len(),
                report.frames(),
                report.empty_frames(),
                report.aborted(),
                if report.stopped { " (stopped)" } else { "" }
            );
            println!("Next counter: {}", report.next_counter);

            if print_metrics {
                print!("{}", metrics.encode()?);
            }
        }
    }

    session.shutdown()?;
    Ok(())
}

fn list(session: &Session) {
    for camera in session.cameras() {
        let offset = camera
            .clock_offset
            .map(|o| format!("{:.6} s", o))
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{:<12} {:<12} offset {:<20} {}",
            camera.serial,
            camera.state,
            offset,
            if camera.connected { "connected" } else { "unplugged" }
        );
    }
}

fn ensure_initialized(session: &Session, serial: &str) -> Result<(), SessionError> {
    let state = session.find(serial)?.lock().state();
    if state == CameraState::Found {
        let offset = session.initialize(serial)?;
        info!("{} initialized (clock offset {:.6} s)", serial, offset);
    }
    Ok(())
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(
    settings: &multicam_sync::config::MetricsSettings,
    registry: Arc<MetricsRegistry>,
) {
    use multicam_sync::metrics::{MetricsServer, MetricsServerConfig};

    if settings.port == 0 {
        return;
    }
    let server = MetricsServer::new(MetricsServerConfig::from(settings), registry);
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Metrics server runtime failed to start: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {}", e);
        }
    });
}
