use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use floatlink::logging::init_logging_with;
use floatlink::{available_ports, load_capture, Connection, Controller, SessionEvent, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "floatlink",
    about = "Stream, capture and decode framed float samples from a serial link"
)]
struct Args {
    /// YAML settings file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Serial port (e.g., /dev/ttyACM0 or COM8)
    #[arg(long, global = true)]
    port: Option<String>,
    #[arg(long, global = true)]
    baud: Option<u32>,
    /// Per-read timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Log level (off, error, warn, info, debug, trace); defaults to FLOATLINK_LOG/RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports on this machine
    Ports,
    /// Read and decode samples continuously
    Stream {
        /// Bytes requested per read
        #[arg(long)]
        chunk: Option<usize>,
        /// Stop after this many reads
        #[arg(long)]
        chunks: Option<usize>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
        /// Carry partial samples across reads instead of dropping them
        #[arg(long)]
        carry: bool,
    },
    /// Record raw bytes from the port into a file
    Capture {
        /// Number of bytes to record
        #[arg(long)]
        bytes: Option<usize>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Decode a record file
    Decode {
        file: PathBuf,
        /// Print at most this many samples
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging_with(args.log_level.as_deref());
    let settings = load_settings(&args)?;

    match args.command {
        Command::Ports => list_ports(),
        Command::Stream {
            chunk,
            chunks,
            seconds,
            carry,
        } => {
            let mut settings = settings;
            if let Some(chunk) = chunk {
                settings.chunk_size = chunk;
            }
            settings.carry_residual |= carry;
            settings.validate()?;
            stream(&settings, chunks, seconds.map(Duration::from_secs_f64))
        }
        Command::Capture { bytes, output } => {
            let mut settings = settings;
            if let Some(bytes) = bytes {
                settings.record_bytes = bytes;
            }
            if let Some(output) = output {
                settings.record_path = output;
            }
            record(&settings)
        }
        Command::Decode { file, limit } => decode_file(&file, limit),
    }
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(port) = &args.port {
        settings.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
    settings.validate()?;
    Ok(settings)
}

fn list_ports() -> Result<()> {
    let ports = available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}\t{:?}", port.port_name, port.port_type);
    }
    Ok(())
}

fn connect(settings: &Settings) -> Result<Controller> {
    let connection = Connection::open(&settings.port_name, settings.baud_rate, settings.timeout())
        .with_context(|| format!("Connection error on {}", settings.port_name))?;
    let mut controller = Controller::from_settings(settings);
    controller.attach(connection)?;
    println!("Listening on {}", settings.port_name);
    Ok(controller)
}

fn stream(settings: &Settings, max_chunks: Option<usize>, max_time: Option<Duration>) -> Result<()> {
    let mut controller = connect(settings)?;
    controller.start_acquisition(settings.chunk_size)?;

    let started = Instant::now();
    let mut reads = 0usize;
    let mut samples = 0usize;
    let mut stop_sent = false;

    for event in controller.events().iter() {
        match event {
            SessionEvent::Data(data) => {
                reads += 1;
                samples += data.samples.len();
                println!(
                    "[Chunk {}] bytes: {} | samples: {} | {:.3} ms | {:.0} bps | first: {:?}",
                    reads,
                    data.bytes_read,
                    data.samples.len(),
                    data.read_elapsed.as_secs_f64() * 1000.0,
                    data.bits_per_second(),
                    data.samples.first()
                );

                let enough_reads = max_chunks.is_some_and(|n| reads >= n);
                let out_of_time = max_time.is_some_and(|t| started.elapsed() >= t);
                if !stop_sent && (enough_reads || out_of_time) {
                    controller.stop_acquisition();
                    stop_sent = true;
                }
            }
            SessionEvent::Finished(finished) => {
                println!("{finished}");
                info!("{} samples decoded from {} reads", samples, reads);
                if !finished.is_success() {
                    bail!("{finished}");
                }
                break;
            }
        }
    }
    controller.wait_acquisition();
    Ok(())
}

fn record(settings: &Settings) -> Result<()> {
    let mut controller = connect(settings)?;
    let path = controller.start_capture(settings.record_bytes)?;
    println!(
        "Recording {} bytes to {}...",
        settings.record_bytes,
        path.display()
    );

    match controller.wait_capture() {
        Some(result) => {
            let path = result?;
            let samples = load_capture(&path)?;
            println!("Done. {} samples in {}", samples.len(), path.display());
            Ok(())
        }
        None => bail!("capture did not start"),
    }
}

fn decode_file(path: &Path, limit: Option<usize>) -> Result<()> {
    let samples =
        load_capture(path).with_context(|| format!("Failed to read {}", path.display()))?;
    println!("{} samples", samples.len());
    for sample in samples.iter().take(limit.unwrap_or(samples.len())) {
        println!("{sample}");
    }
    Ok(())
}
