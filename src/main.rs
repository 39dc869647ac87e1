use clap::{Args, Parser, Subcommand};
use pidlink::config::{LinkConfig, WireFormat};
use pidlink::tuning;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Host-side link to a two-channel PID motor controller
#[derive(Parser, Debug)]
#[command(name = "pidlink", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,

    #[command(flatten)]
    link: LinkArgs,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print Ziegler-Nichols gain suggestions and exit
    Tune {
        /// Ultimate gain (P-only gain at sustained oscillation)
        #[arg(long)]
        ku: f64,
        /// Oscillation period in seconds
        #[arg(long)]
        tu: f64,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Serial port path (overrides the config file)
    #[arg(long)]
    port: Option<String>,
    /// Baud rate: 9600, 19200, 38400, 57600 or 115200 (overrides the config file)
    #[arg(long)]
    baud: Option<u32>,
    /// Telemetry wire format (overrides the config file)
    #[arg(long, value_enum)]
    format: Option<WireFormat>,
    /// TOML file with link settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Record every applied frame to this CSV file
    #[arg(long)]
    record: Option<PathBuf>,
}

impl LinkArgs {
    fn into_config(self) -> Result<(LinkConfig, Option<PathBuf>), BoxError> {
        let mut config = match &self.config {
            Some(path) => LinkConfig::load(path)?,
            None => LinkConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(format) = self.format {
            config.wire_format = format;
        }
        config.validate()?;
        Ok((config, self.record))
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for dropped samples and sent commands)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Some(Cmd::Tune { ku, tu }) => print_gains(ku, tu),
        None => match cli.link.into_config() {
            Ok((config, record)) => pidlink::runtime::run(config, record).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("pidlink error: {}", e);
        std::process::exit(1);
    }
}

fn print_gains(ku: f64, tu: f64) -> Result<(), BoxError> {
    let gains = tuning::ziegler_nichols(ku, tu)?;
    println!("Ku = {}, Tu = {} s", ku, tu);
    println!("{:<16} {:>10} {:>10} {:>10}", "Rule", "Kp", "Ki", "Kd");
    for g in gains {
        println!(
            "{:<16} {:>10.4} {:>10.4} {:>10.4}",
            g.rule.label(),
            g.kp,
            g.ki,
            g.kd
        );
    }
    Ok(())
}
