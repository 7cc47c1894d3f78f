use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use openhand::actuator::{ActuatorLink, DynamixelBus, ServoLink, SimServo};
use openhand::config::HandConfig;
use openhand::controller::{EventCollector, InputDevice};
use openhand::dispatch::CommandDispatcher;
use openhand::hand::{FingerId, HandController, HandError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "openhand", about = "Joystick teleoperation of a Reflex SF hand")]
struct Cli {
    /// Hand config file (default: $CONFIG/openhand/hand.toml)
    config: Option<PathBuf>,

    /// Drive simulated servos instead of the serial bus
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let cli = Cli::parse();

    // Config decides where logs go, so loading it logs to stdout
    let (config_path, config) = {
        let _bootstrap = tracing::subscriber::set_default(bootstrap_subscriber(std::io::stdout));
        let config_path = cli.config.unwrap_or_else(HandConfig::default_path);
        let config = HandConfig::load_or_create(&config_path).await?;
        (config_path, config)
    };
    setup_logging_env(&config)?;
    info!("Loaded hand config from {}", config_path.display());

    let cancel = CancellationToken::new();
    let control_cancel = cancel.clone();
    let simulate = cli.simulate;
    let mut control =
        tokio::task::spawn_blocking(move || run_control(config, simulate, control_cancel));

    tokio::select! {
        result = &mut control => {
            return result.map_err(|e| eyre!("Control loop panicked: {}", e))?;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Unable to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            cancel.cancel();
        }
    }

    control
        .await
        .map_err(|e| eyre!("Control loop panicked: {}", e))?
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn bootstrap_subscriber<W>(writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish()
}

fn setup_logging_env(config: &HandConfig) -> Result<()> {
    let level = Level::from_str(&config.log_level)
        .map_err(|e| eyre!("Invalid log level {}: {}", config.log_level, e))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match &config.log_dir {
        None => builder.pretty().init(),
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| eyre!("Failed to create log directory: {}", e))?;
            let name = format!("openhand_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
            let file = File::create(dir.join(&name))
                .map_err(|e| eyre!("Failed to create log file {}: {}", name, e))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
    }
    Ok(())
}

fn run_control(config: HandConfig, simulate: bool, cancel: CancellationToken) -> Result<()> {
    let collector = EventCollector::create(Some(config.collector_settings()))
        .and_then(|collector| collector.initialize())
        .map_err(|e| eyre!("Failed to start joystick input: {}", e))?;

    if simulate {
        warn!("Simulating servos, no hardware will move");
        let links = FingerId::ALL
            .into_iter()
            .zip(&config.fingers)
            .map(|(id, finger)| SimServo::new(id.get(), finger.lower_limit))
            .collect::<Vec<_>>();
        drive(links, &config, collector, &cancel)
    } else {
        let bus = DynamixelBus::open(&config.serial_port, config.baud_rate)
            .map_err(|e| eyre!("Failed to open {}: {}", config.serial_port.display(), e))?
            .shared();
        let links = FingerId::ALL
            .into_iter()
            .map(|finger| {
                ServoLink::connect(bus.clone(), finger.get())
                    .map_err(|source| HandError::Connection { finger, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        drive(links, &config, collector, &cancel)
    }
}

fn drive<L: ActuatorLink, D: InputDevice>(
    links: Vec<L>,
    config: &HandConfig,
    mut device: D,
    cancel: &CancellationToken,
) -> Result<()> {
    let hand = HandController::initialize(links, &config.fingers, config.timing(), config.delta_ticks)?;
    hand.log_parameters();

    let mut dispatcher =
        CommandDispatcher::new(hand, device.button_count(), config.dispatcher_settings());
    dispatcher.run(&mut device, cancel);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_takes_config_path_and_simulate_flag() {
        let cli = Cli::try_parse_from(["openhand", "--simulate", "/tmp/hand.toml"]).unwrap();
        assert!(cli.simulate);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hand.toml")));

        let cli = Cli::try_parse_from(["openhand"]).unwrap();
        assert!(!cli.simulate);
        assert!(cli.config.is_none());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn config_warnings_reach_bootstrap_log() {
        let captured = Captured::default();
        let sink = captured.clone();
        let mut config = HandConfig::default();
        config.fingers[2].rotation_sign = 0;

        {
            let _guard =
                tracing::subscriber::set_default(bootstrap_subscriber(move || sink.clone()));
            config.validate().unwrap();
        }

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Finger3 rotation 0 is not -1 or +1"));
    }

    #[test]
    fn cli_rejects_unknown_options() {
        assert!(Cli::try_parse_from(["openhand", "--fast"]).is_err());
    }
}
