// Peak search example
//
// Arms a current measurement, runs the peak-detector autoset, then polls
// the status register for software-triggered results for a fixed number
// of iterations.

use std::time::Duration;

use clap::Parser;
use tlpm_rs::{AutosetConfig, PowerMeter, TriggerLoopConfig};

#[derive(Parser)]
#[command(name = "peak_search")]
#[command(about = "Peak-detector autoset followed by the software trigger loop")]
struct Args {
    /// Serial port to use (default: first port found)
    #[arg(short, long)]
    port: Option<String>,

    /// Number of register polls before giving up
    #[arg(short, long, default_value_t = 10)]
    iterations: u32,

    /// Sleep between register polls, in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut meter = PowerMeter::connect(args.port.as_deref(), None)?;
    println!("Connected to {}", meter.identity());

    meter.arm_current_measurement()?;

    println!("Running autoset...");
    meter.autoset(&AutosetConfig::default())?;

    let readings = meter.run_triggered(&TriggerLoopConfig {
        iterations: args.iterations,
        poll_interval: Duration::from_millis(args.poll_ms),
    })?;

    if readings.is_empty() {
        println!("No trigger observed in {} polls.", args.iterations);
    }
    for value in readings {
        println!("Current [A]: {}", value);
    }

    Ok(())
}
