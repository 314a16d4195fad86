use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};

mod image;
mod orchestrator;

use mdfu_mac::MacConfig;
use orchestrator::{Session, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Verbosity {
    Error,
    Warning,
    Info,
    Debug,
}

impl Verbosity {
    fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Error => log::LevelFilter::Error,
            Verbosity::Warning => log::LevelFilter::Warn,
            Verbosity::Info => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mdfu", about = "Drive an MDFU client through a firmware update", version)]
struct Cli {
    #[command(subcommand)]
    action: Option<Action>,

    /// Logging verbosity.
    #[arg(short = 'v', long, value_enum, global = true, default_value = "warning")]
    verbose: Verbosity,

    /// Print the tool's release version and exit, without touching any
    /// transport. Independent of `-h`/`--help`.
    #[arg(short = 'R', long, global = true)]
    release_info: bool,

    /// Which physical/emulated link to drive the session over.
    #[arg(long, value_enum, global = true)]
    tool: Option<Tool>,

    /// Device path, hostname, or other tool-specific endpoint identifier.
    #[arg(long, global = true)]
    device: Option<String>,

    /// Path to the firmware image to transfer.
    #[arg(long, global = true)]
    image: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Runs the full update workflow: discover, start, stream, verify, end.
    Update,
    /// Discovers and prints the client's capability record.
    ClientInfo,
    /// Prints which tool backends this build was compiled with.
    ToolsHelp,
    /// Toggles the client into its bootloader/update mode.
    ChangeMode,
    /// `client-info`, with an option to also print the raw TLV bytes.
    Dump {
        /// Also print the raw client-info TLV bytes as hex.
        #[arg(long)]
        raw: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.verbose.to_level_filter()).init();

    if cli.release_info {
        println!("mdfu {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        log::debug!("{err:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(action) = cli.action else {
        bail!("no action given; run with --help for usage");
    };

    if matches!(action, Action::ToolsHelp) {
        print_tools_help();
        return Ok(());
    }

    let tool = cli.tool.ok_or_else(|| anyhow::anyhow!("--tool is required for this action"))?;
    let mut config = MacConfig::default();
    if let Some(device) = cli.device {
        config.path = device;
    }

    let mut session = Session::open(tool, &config)?;

    match action {
        Action::Update => {
            let image = cli.image.ok_or_else(|| anyhow::anyhow!("--image is required"))?;
            session.run_update(&image)?;
            println!("update complete");
        }
        Action::ClientInfo => {
            let info = session.client_info()?;
            print_client_info(&info);
        }
        Action::ChangeMode => {
            session.change_mode()?;
            println!("mode change requested");
        }
        Action::Dump { raw } => {
            let info = session.client_info()?;
            print_client_info(&info);
            if raw {
                let bytes = session.client_info_raw().unwrap_or(&[]);
                println!("raw: {}", hex_dump(bytes));
            }
        }
        Action::ToolsHelp => unreachable!("handled above"),
    }

    Ok(())
}

fn print_tools_help() {
    println!("available tools:");
    for (name, enabled) in [
        ("serial", cfg!(feature = "serial")),
        ("network", cfg!(feature = "network")),
        ("spidev", cfg!(feature = "spidev")),
        ("i2cdev", cfg!(feature = "i2cdev")),
    ] {
        println!("  {name:<8} {}", if enabled { "enabled" } else { "not compiled in" });
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

fn print_client_info(info: &mdfu_proto::ClientInfo) {
    println!(
        "version: {}.{}.{}{}",
        info.version.major,
        info.version.minor,
        info.version.patch,
        info.version.internal.map(|b| format!(" (internal {b})")).unwrap_or_default()
    );
    println!("buffer_size: {}", info.buffer_size);
    println!("buffer_count: {}", info.buffer_count);
    println!("default_timeout: {} (x100ms)", info.default_timeout);
    println!("inter_transaction_delay: {} ns", info.inter_transaction_delay);
}
