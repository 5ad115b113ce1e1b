//! Top HAT Dashboard binary
//!
//! Brings up the board's hardware and serves the dashboard, or prints a
//! single snapshot and exits.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tophat_dashboard::{
    shutdown_signal, start_web_server, HardwareSupervisor, HatSnapshot, RaspberryPi,
    SimulatedHat, UsbDevice, UsbMonitor, WebConfig, DEFAULT_WEB_PORT,
};
use tracing::{info, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tophat")]
#[command(about = "Top HAT Dashboard - Raspberry Pi expansion board control")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Controls the Top HAT's ADC, GPIO expander, RS-485 link and onboard GPIO through a web dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Use a simulated Top HAT instead of the real hardware
    #[arg(long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (default)
    Serve(ServeArgs),

    /// Print a single hardware snapshot and exit
    Snapshot(SnapshotArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Static files directory (optional)
    #[arg(long)]
    static_dir: Option<String>,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => serve_command(&cli, args).await,
        Some(Commands::Snapshot(args)) => snapshot_command(&cli, args).await,
        None => serve_command(&cli, &ServeArgs::default()).await,
    }
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

/// `RUST_LOG` directives refine the flag level, which is the fallback.
fn log_subscriber(level: Level, directives: &str) -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(directives);

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish()
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let subscriber = log_subscriber(log_level(cli), &directives);

    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")?;

    Ok(())
}

fn print_banner(simulated: bool) {
    println!("Top HAT Dashboard");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    if simulated {
        println!("   Running against a simulated board");
    }
    println!();
}

/// Bring up the hardware on the blocking pool; startup sleeps and does I/O.
async fn start_hardware(simulate: bool) -> anyhow::Result<Arc<HardwareSupervisor>> {
    let supervisor = tokio::task::spawn_blocking(move || {
        if simulate {
            HardwareSupervisor::start(&SimulatedHat::demo())
        } else {
            HardwareSupervisor::start(&RaspberryPi::new())
        }
    })
    .await
    .context("Hardware startup task failed")?
    .context("Hardware initialization failed")?;

    Ok(Arc::new(supervisor))
}

async fn serve_command(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    print_banner(cli.simulate);
    info!("Starting Top HAT dashboard...");

    let hat = start_hardware(cli.simulate).await?;
    let status = hat.availability();
    info!(
        mcp23017 = status.mcp23017,
        rs485 = status.rs485,
        rpi_gpio = status.rpi_gpio,
        "Hardware ready"
    );

    let mut web_config = WebConfig::new(&cli.host, cli.port).with_cors(!args.no_cors);
    if let Some(static_dir) = &args.static_dir {
        web_config = web_config.with_static_path(Some(static_dir.clone()));
        info!("Using static files from: {}", static_dir);
    }

    info!("Web server configuration:");
    info!("  - Bind address: {}", web_config.bind_address());
    info!("  - CORS enabled: {}", web_config.enable_cors);

    start_web_server(web_config, hat)
        .await
        .context("Web server failed")?;

    Ok(())
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> anyhow::Result<()> {
    let hat = start_hardware(cli.simulate).await?;
    run_snapshot(hat, &UsbMonitor::new(), args.format, shutdown_signal()).await
}

/// Print one report, then release the hardware even if `interrupt` fires first.
async fn run_snapshot(
    hat: Arc<HardwareSupervisor>,
    usb: &UsbMonitor,
    format: OutputFormat,
    interrupt: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let printed = tokio::select! {
        report = collect_report(&hat, usb) => report.and_then(|(snapshot, devices)| {
            print_snapshot(format, &snapshot, &devices)
        }),
        _ = interrupt => {
            info!("Snapshot interrupted");
            Ok(())
        }
    };

    tokio::task::spawn_blocking(move || hat.shutdown())
        .await
        .context("Hardware shutdown failed")?;
    printed
}

async fn collect_report(
    hat: &Arc<HardwareSupervisor>,
    usb: &UsbMonitor,
) -> anyhow::Result<(HatSnapshot, Vec<UsbDevice>)> {
    let snapshot = {
        let hat = hat.clone();
        tokio::task::spawn_blocking(move || hat.snapshot())
            .await
            .context("Snapshot task failed")?
    };
    let devices = usb.list_devices().await;
    Ok((snapshot, devices))
}

fn print_snapshot(
    format: OutputFormat,
    snapshot: &HatSnapshot,
    devices: &[UsbDevice],
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let mut body = serde_json::to_value(snapshot)?;
            body["usb_connected"] = serde_json::json!(!devices.is_empty());
            body["usb_devices"] = serde_json::json!(devices);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Pretty => print_pretty_snapshot(snapshot, devices),
    }
    Ok(())
}

fn up_down(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "unavailable"
    }
}

fn print_pretty_snapshot(snapshot: &HatSnapshot, devices: &[UsbDevice]) {
    println!("Top HAT Snapshot ({})", snapshot.timestamp);
    println!("==========================================");
    println!();

    let status = &snapshot.hardware_status;
    println!("Subsystems:");
    println!("  MCP23017: {}", up_down(status.mcp23017));
    println!("  RS-485: {}", up_down(status.rs485));
    println!("  Raspberry Pi GPIO: {}", up_down(status.rpi_gpio));
    println!();

    println!("ADC:");
    if snapshot.adc.is_empty() {
        println!("  no data");
    }
    for (channel, volts) in &snapshot.adc {
        println!("  {}: {:.4} V", channel, volts);
    }
    println!();

    println!("MCP23017:");
    println!("  Port A: {} (outputs {:08b})", snapshot.gpio.a, snapshot.outputs.a);
    println!("  Port B: {} (outputs {:08b})", snapshot.gpio.b, snapshot.outputs.b);
    println!();

    println!("Raspberry Pi GPIO:");
    for (pin, mode) in &snapshot.rpi_gpio.configs {
        let state = match snapshot.rpi_gpio.states.get(pin).copied().flatten() {
            Some(level) => level.to_string(),
            None => "?".to_string(),
        };
        println!("  GPIO{} {}: {}", pin, mode, state);
    }
    println!();

    println!("RS-485:");
    println!(
        "  Last message: {}",
        snapshot.rs485_last.as_deref().unwrap_or("-")
    );
    println!();

    println!("USB:");
    if devices.is_empty() {
        println!("  no devices");
    }
    for device in devices {
        println!("  {} {}", device.id, device.description);
    }
}
