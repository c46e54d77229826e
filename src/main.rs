mod config;
mod content;
mod driver;
mod error;
mod hardware;
mod limits;
mod poll_client;
mod push_server;
mod queue;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use log::error;

use config::DriverConfig;
use driver::Driver;

#[derive(Parser)]
#[command(name = "flipdot-driver", about = "Polls a content server and drives a flip-dot display panel")]
struct Cli {
    /// Path to the driver's JSON configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level.to_lowercase());
    env_logger::Builder::from_env(env).format_timestamp_millis().init();
}

fn install_signal_handlers(driver: &Driver) -> Result<(), std::io::Error> {
    let running = driver.running_flag();
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // SAFETY: the registered closure only performs an atomic store, which
        // is async-signal-safe.
        unsafe {
            signal_hook::low_level::register(sig, move || {
                running.store(false, Ordering::SeqCst);
            })?;
        }
    }
    Ok(())
}

fn run() -> Result<(), error::DriverError> {
    let cli = Cli::parse();
    let config = DriverConfig::load(&cli.config)?;
    init_logging(&config.log_level);

    let mut driver = Driver::new(config)?;
    install_signal_handlers(&driver)
        .map_err(|e| error::DriverError::SignalHandlers(e.to_string()))?;

    driver.run();
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("failed to start driver: {e}");
        std::process::exit(1);
    }
}
