// Fast streaming example
//
// Drains the instrument's internal ring buffer at ~100 kS/s for a bounded
// wall-clock duration and writes the samples to a delimited text file,
// one `timestamp;value` line per sample (timestamps in microseconds).

use std::fs::File;
use std::time::Duration;

use clap::Parser;
use tlpm_rs::PowerMeter;

#[derive(Parser)]
#[command(name = "fast_stream")]
#[command(about = "Stream current samples at ~100kS/s into a CSV file")]
struct Args {
    /// Serial port to use (default: first port found)
    #[arg(short, long)]
    port: Option<String>,

    /// How long to stream, in seconds
    #[arg(short, long, default_value_t = 3)]
    seconds: u64,

    /// Output file path
    #[arg(short, long, default_value = "CurrentData.csv")]
    output: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut meter = PowerMeter::connect(args.port.as_deref(), None)?;
    println!("Connected to {}", meter.identity());

    let duration = Duration::from_secs(args.seconds);
    println!("Streaming for {:?}...", duration);
    let session = meter.stream_current(duration)?;

    // No flow control on the device side: if this host fell behind, the
    // ring buffer overwrote unread samples and the count below is a lower
    // bound on what the instrument produced.
    println!(
        "Collected {} samples in {:?}",
        session.len(),
        session.elapsed()
    );

    let mut file = File::create(&args.output)?;
    session.write_delimited(&mut file)?;
    println!("Measurement current data at 100kS/s:");
    println!("{}", args.output);

    Ok(())
}
