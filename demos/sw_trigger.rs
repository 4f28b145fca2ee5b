// Software-triggered sequence example
//
// Runs the peak-detector autoset, then captures one pre-sized sequence of
// base_time * 100 samples and writes it to a delimited text file
// (timestamps in milliseconds).

use std::fs::File;
use std::time::Duration;

use clap::Parser;
use tlpm_rs::{AutosetConfig, PowerMeter};

#[derive(Parser)]
#[command(name = "sw_trigger")]
#[command(about = "Software-triggered sequence capture into a CSV file")]
struct Args {
    /// Serial port to use (default: first port found)
    #[arg(short, long)]
    port: Option<String>,

    /// Base time for the sequence; the array holds base_time * 100 samples
    #[arg(short, long, default_value_t = 10)]
    base_time: u16,

    /// Auto-trigger delay in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Output file path
    #[arg(short, long, default_value = "CurrentData.csv")]
    output: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut meter = PowerMeter::connect(args.port.as_deref(), None)?;
    println!("Connected to {}", meter.identity());

    println!("Running autoset...");
    meter.autoset(&AutosetConfig::default())?;

    let reading =
        meter.acquire_sequence(args.base_time, Duration::from_millis(args.delay_ms))?;

    if !reading.triggered {
        println!("Measurement SW trigger couldn't read any data.");
        return Ok(());
    }

    let mut file = File::create(&args.output)?;
    reading.session.write_delimited(&mut file)?;
    println!("Measurement SW trigger data ({} samples):", reading.session.len());
    println!("{}", args.output);

    Ok(())
}
