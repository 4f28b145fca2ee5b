// Serial session example
//
// Walks through a full serial session with a PM-series power meter:
// port enumeration, baud capability probing, identification and
// calibration queries, a burst of power readings, and an optional
// baud-rate switch.

use clap::Parser;
use tlpm_rs::{probe_port, PowerMeter};

#[derive(Parser)]
#[command(name = "serial_session")]
#[command(about = "Basic SCPI session with a PM-series power meter")]
struct Args {
    /// Serial port to use (default: first port found)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate the instrument is currently configured for
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Switch the instrument to this baud rate after the readings
    #[arg(short, long)]
    new_baud: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let port = match &args.port {
        Some(p) => p.clone(),
        None => {
            let ports = PowerMeter::available_ports()?;
            let first = ports
                .first()
                .ok_or("no serial ports found on this system")?
                .clone();
            println!("The first serial port found is selected: {}\n", first);
            first
        }
    };

    if let Some(mask) = probe_port(&port) {
        println!("Available baud rates for port {}:", port);
        for label in mask.supported() {
            println!("Baud rate: {}", label);
        }
        println!();
    }
    println!("Important: baud rates under 9600 bit/s and over 256000 bit/s are not supported by the device.\n");

    let mut meter = PowerMeter::connect(Some(&port), Some(args.baud))?;

    println!("Power meter information: {}", meter.identity());
    println!("Power meter calibration: {}", meter.calibration_string()?);
    println!("Sensor information: {}", meter.sensor_identity()?);
    println!("Baudrate: {}", meter.baud_rate()?);
    println!("{}\n", meter.system_error()?);

    println!("Read power 10 times");
    for i in 1..=10 {
        println!("{}. {} W", i, meter.read_power()?);
    }

    if let Some(new_baud) = args.new_baud {
        println!("\nChanging the baudrate....");
        // Options: 9600, 14400, 19200, 22800, 33600, 38400, 57600, 115200,
        // 128000, 230400 - only if the serial port supports them too.
        let mut meter = meter.switch_baud(new_baud)?;
        println!("Serial port reopened with the new baudrate {}.", new_baud);
        println!("Power meter information: {}", meter.identity());
        println!("{}", meter.system_error()?);
    }

    Ok(())
}
