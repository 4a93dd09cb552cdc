use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, process};

use clap::{ArgAction, Parser, Subcommand};
use eyre::WrapErr;

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bolt_config::Config;
use bolt_core::actuator::Actuator;
use bolt_core::display::DisplayMirror;
use bolt_core::fsm::FsmConfig;
use bolt_core::sensor::PositionSensor;
use bolt_core::server::{LockServer, ServerConfig};
use bolt_core::RequestAuth;
use bolt_hardware::FileNonceStore;
use bolt_traits::{MonotonicClock, NonceStore, Servo, StatusPanel, Watchdog};

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn humanize(err: &eyre::Report) -> String {
    use bolt_config::ConfigError;
    use bolt_core::error::{BuildError, LockError};

    if let Some(ce) = err.downcast_ref::<ConfigError>() {
        return format!(
            "What happened: Configuration was rejected ({ce}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
        );
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSecret => {
                "What happened: No shared secret configured.\nLikely causes: auth.secret is empty and skip_auth is off.\nHow to fix: Set auth.secret in the config (or enable auth.skip_auth for bench testing only).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LockError>() {
        return match le {
            LockError::Calibration(msg) => format!(
                "What happened: Bringup calibration failed ({msg}).\nLikely causes: Feedback pot disconnected, servo not moving, or travel endpoints wrong.\nHow to fix: Check the feedback wiring and the [servo] min_pos/max_pos values."
            ),
            LockError::Hardware(msg) => format!(
                "What happened: A hardware call failed ({msg}).\nLikely causes: Wrong pin numbers, missing permissions, or unpowered servo rail.\nHow to fix: Check the [pins] table and the supply transistor wiring."
            ),
            LockError::Storage(msg) => format!(
                "What happened: The nonce slot could not be used ({msg}).\nLikely causes: Unwritable path or corrupted slot file.\nHow to fix: Check auth.nonce_file, or boot once with auth.reset_nonce = true."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("bind control surface") || lower.contains("address in use") {
        return "What happened: The HTTP listener could not bind.\nLikely causes: Port already taken or privileged port without permission.\nHow to fix: Change network.port, or stop the other process holding it.".to_string();
    }

    if lower.contains("corrupt nonce slot") {
        return "What happened: The persisted nonce slot is corrupt.\nLikely causes: Interrupted write on an old build, or a foreign file at auth.nonce_file.\nHow to fix: Boot once with auth.reset_nonce = true to rewrite the slot.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Build a file sink writer with optional rotation, storing the non-blocking
/// guard in OnceLock.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file_appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb_writer)
}

/// Initialize tracing once for the whole app.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    // Prefer RUST_LOG if set; otherwise use CLI level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let console = fmt::layer().json().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    } else {
        let console = fmt::layer().pretty().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "boltd", version, about = "Networked deadbolt controller")]
struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/boltd.toml")]
    config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Log level: trace,debug,info,warn,error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Calibrate the feedback anchors and run the control loop
    Serve,
    /// Quick health check (hardware presence / sim ok)
    SelfCheck,
}

fn main() -> eyre::Result<()> {
    if let Err(e) = real_main() {
        eprintln!("{}", humanize(&e));
        process::exit(2);
    }
    Ok(())
}

fn real_main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let cfg_text = fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let cfg: Config =
        toml::from_str(&cfg_text).wrap_err_with(|| format!("parse config {:?}", cli.config))?;

    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    match cli.cmd {
        Commands::SelfCheck => self_check(&cfg),
        Commands::Serve => serve(&cfg),
    }
}

/// Probe each hardware seam once without moving the bolt far.
fn self_check(cfg: &Config) -> eyre::Result<()> {
    tracing::info!("self-check starting");

    let (mut servo, mut feedback, _panel, _watchdog) = open_hardware(cfg)?;

    use bolt_traits::AnalogInput;
    match feedback.read_raw() {
        Ok(raw) => tracing::info!(raw, "feedback read ok"),
        Err(e) => {
            tracing::error!(error = %e, "feedback read failed");
            return Err(eyre::eyre!("feedback read failed: {}", e));
        }
    }

    if let Err(e) = servo.attach() {
        tracing::error!(error = %e, "servo attach failed");
        return Err(eyre::eyre!("servo attach failed: {}", e));
    }
    if let Err(e) = servo.detach() {
        tracing::error!(error = %e, "servo detach failed");
        return Err(eyre::eyre!("servo detach failed: {}", e));
    }

    let mut store = FileNonceStore::new(&cfg.auth.nonce_file);
    match store.load() {
        Ok(nonce) => tracing::info!(nonce, "nonce slot ok"),
        Err(e) => {
            tracing::error!(error = %e, "nonce slot unreadable");
            return Err(eyre::eyre!("nonce slot unreadable: {}", e));
        }
    }

    tracing::info!("self-check ok");
    println!("OK");
    Ok(())
}

fn serve(cfg: &Config) -> eyre::Result<()> {
    if let Some(ssid) = cfg.network.ssid.as_deref() {
        // Association is the platform's job; we only serve on top of it.
        tracing::info!(ssid, "expecting platform Wi-Fi association");
    }

    let (servo, feedback, panel, watchdog) = open_hardware(cfg)?;

    let mut store = FileNonceStore::new(&cfg.auth.nonce_file);
    if cfg.auth.reset_nonce {
        store.wipe().wrap_err("wipe nonce slot")?;
        tracing::warn!("nonce slot wiped by reset_nonce");
    }
    let auth = if cfg.auth.skip_auth {
        tracing::warn!("authentication disabled by skip_auth; test configurations only");
        RequestAuth::skipping_verification(store)
    } else {
        RequestAuth::new(store, cfg.auth.secret.clone())
    };

    // Bringup: record the powered and released feedback anchors.
    let clock = MonotonicClock::new();
    let mut actuator = Actuator::new(servo);
    let mut sensor = PositionSensor::new(feedback);
    sensor
        .calibrate(
            &mut actuator,
            &clock,
            cfg.servo.min_pos,
            cfg.servo.max_pos,
            Duration::from_millis(cfg.servo.settle_powered_ms),
            Duration::from_millis(cfg.servo.settle_released_ms),
        )
        .wrap_err("bringup calibration")?;

    let listener = TcpListener::bind((cfg.network.bind_addr.as_str(), cfg.network.port))
        .wrap_err("bind control surface")?;

    let server_cfg = ServerConfig {
        fsm: FsmConfig {
            angle_tolerance_deg: cfg.servo.angle_tolerance_deg,
            move_timeout_ms: cfg.servo.move_timeout_ms,
        },
        tick_period: Duration::from_millis(cfg.servo.tick_ms),
        ..ServerConfig::default()
    };

    let mut server = LockServer::new(
        listener,
        actuator,
        sensor,
        auth,
        DisplayMirror::new(panel),
        watchdog,
        Arc::new(clock),
        server_cfg,
    )?;

    wire_calibration_button(cfg, &mut server)?;

    tracing::info!(addr = %server.local_addr()?, "lock control surface listening");
    server.run()
}

#[cfg(feature = "hardware")]
type Hardware = (
    bolt_hardware::PiServo,
    bolt_hardware::PiFeedback,
    Box<dyn StatusPanel>,
    Box<dyn Watchdog>,
);

#[cfg(not(feature = "hardware"))]
type Hardware = (
    bolt_hardware::SimServo,
    bolt_hardware::SimFeedback,
    Box<dyn StatusPanel>,
    Box<dyn Watchdog>,
);

#[cfg(feature = "hardware")]
fn open_hardware(cfg: &Config) -> eyre::Result<Hardware> {
    use bolt_hardware::{MatrixPanel, PiFeedback, PiServo, PiWatchdog};

    let servo = PiServo::try_new(cfg.pins.servo_pwm, cfg.pins.servo_supply)
        .map_err(|e| eyre::eyre!("open servo pins: {e}"))?;
    let feedback = PiFeedback::try_new(cfg.pins.feedback_adc_channel)
        .map_err(|e| eyre::eyre!("open feedback ADC: {e}"))?;
    let panel: Box<dyn StatusPanel> = Box::new(
        MatrixPanel::try_new().map_err(|e| eyre::eyre!("open status panel: {e}"))?,
    );
    let watchdog: Box<dyn Watchdog> = Box::new(
        PiWatchdog::try_new(&cfg.pins.watchdog_device)
            .map_err(|e| eyre::eyre!("open watchdog device: {e}"))?,
    );
    Ok((servo, feedback, panel, watchdog))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(cfg: &Config) -> eyre::Result<Hardware> {
    use bolt_hardware::{SimLink, SimPanel, SimWatchdog};

    let _ = cfg;
    let link = SimLink::new(0);
    SIM_LINK.get_or_init(|| link.clone());
    let panel: Box<dyn StatusPanel> = Box::new(SimPanel::default());
    let watchdog: Box<dyn Watchdog> = Box::new(SimWatchdog::default());
    Ok((link.servo(), link.feedback(), panel, watchdog))
}

#[cfg(not(feature = "hardware"))]
static SIM_LINK: OnceLock<bolt_hardware::SimLink> = OnceLock::new();

/// On hardware, watch the physical button. On the simulated bench, script the
/// two presses so the machine calibrates itself and becomes operational.
#[cfg(feature = "hardware")]
fn wire_calibration_button<M, A, S>(
    cfg: &Config,
    server: &mut LockServer<M, A, S>,
) -> eyre::Result<()>
where
    M: Servo,
    A: bolt_traits::AnalogInput,
    S: NonceStore,
{
    bolt_hardware::spawn_button_watcher(
        cfg.pins.calibrate_button,
        cfg.pins.button_active_low,
        cfg.pins.button_poll_ms,
        server.calibrate_flag(),
    )
    .map_err(|e| eyre::eyre!("watch calibration button: {e}"))
}

#[cfg(not(feature = "hardware"))]
fn wire_calibration_button<M, A, S>(
    cfg: &Config,
    server: &mut LockServer<M, A, S>,
) -> eyre::Result<()>
where
    M: Servo,
    A: bolt_traits::AnalogInput,
    S: NonceStore,
{
    use std::sync::atomic::Ordering;

    let link = SIM_LINK
        .get()
        .ok_or_else(|| eyre::eyre!("sim link not initialized"))?;
    let flag = server.calibrate_flag();

    link.set_position(cfg.servo.lock_deg);
    flag.store(true, Ordering::SeqCst);
    server.tick()?;

    link.set_position(cfg.servo.unlock_deg);
    flag.store(true, Ordering::SeqCst);
    server.tick()?;

    tracing::info!(
        lock_deg = server.fsm().lock_deg(),
        unlock_deg = server.fsm().unlock_deg(),
        "simulated calibration presses applied"
    );
    Ok(())
}
