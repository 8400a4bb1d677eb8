use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use brickbot::brickpi::{BrickPi3, SimulatedBoard, Transport};
use brickbot::config::{BotConfig, SENSOR_STARTUP_TIMEOUT};
use brickbot::procedure::{ControlProcedure, TerminalKeys};
use brickbot::teleop::{KeyboardPilot, CONTROLS};
use brickbot::{Bot, ControlBot};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Drive a BrickPi3 robot from the keyboard
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file (ports, limits, timing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SPI device, overrides the config file
    #[arg(long)]
    spi_device: Option<String>,

    /// BrickPi3 SPI address, overrides the config file
    #[arg(long)]
    address: Option<u8>,

    /// Run against a simulated board instead of hardware
    #[arg(long)]
    simulate: bool,
}

fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("brickbot error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => BotConfig::load(path)?,
        None => BotConfig::default(),
    };
    if let Some(device) = args.spi_device {
        config.spi_device = device;
    }
    if let Some(address) = args.address {
        config.address = address;
    }

    if args.simulate {
        info!("Using simulated BrickPi3");
        return drive(SimulatedBoard::with_address(config.address), &config);
    }
    open_hardware(&config)
}

#[cfg(target_os = "linux")]
fn open_hardware(config: &BotConfig) -> Result<(), BoxError> {
    let link = brickbot::brickpi::SpiTransport::open(&config.spi_device)?;
    drive(link, config)
}

#[cfg(not(target_os = "linux"))]
fn open_hardware(_config: &BotConfig) -> Result<(), BoxError> {
    Err("BrickPi3 SPI access needs Linux; use --simulate".into())
}

fn drive<T: Transport>(link: T, config: &BotConfig) -> Result<(), BoxError> {
    let board = BrickPi3::open(link, config.address)?;
    let mut bot = Bot::new(board, config)?;
    bot.wait_for_sensors(SENSOR_STARTUP_TIMEOUT);
    info!("Battery: {:.2} V", bot.battery_voltage()?);

    let mut pilot = KeyboardPilot::new(bot, config.motion());
    info!("{}", CONTROLS);

    {
        let keys = TerminalKeys::new()?;
        let mut procedure =
            ControlProcedure::new(keys, |key| pilot.handle_key(key)).with_period(config.key_period());
        procedure.start_procedure()?;
    }

    // Dropping the pilot resets the board
    pilot.stop()?;
    Ok(())
}
