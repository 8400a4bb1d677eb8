// Board diagnostic: READ-ONLY check of a BrickPi3 and the robot's sensors
//
// Nothing is written to the motors - no movement. Sensors on the robot's
// ports are configured so they can be read.
//
// Usage: cargo run --example board_diagnostic -- [spi-device | sim]
// Example: cargo run --example board_diagnostic -- /dev/spidev0.1

use std::thread::sleep;
use std::time::Duration;

use brickbot::brickpi::{BrickPi3, BrickPiError, MotorPort, SensorType, SimulatedBoard, Transport};
use brickbot::config::{self, BotConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::SPI_DEVICE.to_string());

    println!("BrickPi3 diagnostic (read-only)");
    println!("Device: {}", device);
    println!();

    if device == "sim" {
        return diagnose(SimulatedBoard::new());
    }
    open_device(&device)
}

#[cfg(target_os = "linux")]
fn open_device(device: &str) -> Result<(), Box<dyn std::error::Error>> {
    let link = match brickbot::brickpi::SpiTransport::open(device) {
        Ok(link) => link,
        Err(e) => {
            println!("  ✗ Failed to open {}: {}", device, e);
            println!();
            println!("Troubleshooting:");
            println!("  - Enable SPI (raspi-config > Interface Options > SPI)");
            println!("  - Check the user is in the spi group");
            return Err(e.into());
        }
    };
    diagnose(link)
}

#[cfg(not(target_os = "linux"))]
fn open_device(_device: &str) -> Result<(), Box<dyn std::error::Error>> {
    Err("SPI needs Linux; pass `sim` to use the simulated board".into())
}

fn diagnose<T: Transport>(link: T) -> Result<(), Box<dyn std::error::Error>> {
    let config = BotConfig::default();

    println!("Step 1: Identifying board...");
    let mut bp = match BrickPi3::open(link, config.address) {
        Ok(bp) => bp,
        Err(e @ BrickPiError::WrongDevice { .. }) => {
            println!("  ✗ {}", e);
            return Err(e.into());
        }
        Err(e) => {
            println!("  ✗ No response at address {}: {}", config.address, e);
            return Err(e.into());
        }
    };
    println!("  ✓ Hardware {}, firmware {}", bp.hardware_version()?, bp.firmware_version()?);
    println!("  ✓ Serial {}", bp.id()?);
    println!();

    println!("Step 2: Voltages...");
    println!("  Battery: {:.2} V", bp.voltage_battery()?);
    println!("  9V:      {:.2} V", bp.voltage_9v()?);
    println!("  5V:      {:.2} V", bp.voltage_5v()?);
    println!("  3.3V:    {:.2} V", bp.voltage_3v3()?);
    println!();

    println!("Step 3: Motor encoders...");
    for port in MotorPort::ALL {
        match bp.get_motor_status(port) {
            Ok(s) => println!(
                "  Motor {:?}: position={}°, dps={}, power={}, flags=0x{:02X}",
                port, s.position, s.dps, s.power, s.flags
            ),
            Err(e) => println!("  Motor {:?}: ✗ {}", port, e),
        }
    }
    println!();

    println!("Step 4: Sensors...");
    bp.set_sensor_type(config.left_touch, SensorType::Touch)?;
    bp.set_sensor_type(config.right_touch, SensorType::Touch)?;
    bp.set_sensor_type(config.ultrasonic, config.ultrasonic_kind.sensor_type())?;
    // Give the firmware time to configure the ports
    sleep(Duration::from_millis(500));

    for (name, port) in [("Left touch", config.left_touch), ("Right touch", config.right_touch)] {
        match bp.get_touch(port) {
            Ok(pressed) => println!("  {} ({}): {}", name, port, if pressed { "pressed" } else { "released" }),
            Err(e) => println!("  {} ({}): ✗ {}", name, port, e),
        }
    }
    match bp.get_distance_cm(config.ultrasonic) {
        Ok(cm) => println!("  Ultrasonic ({}): {:.1} cm", config.ultrasonic, cm),
        Err(e) => println!("  Ultrasonic ({}): ✗ {}", config.ultrasonic, e),
    }
    println!();

    bp.reset_all()?;
    println!("Done. Board reset.");
    Ok(())
}
