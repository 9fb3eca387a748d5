use std::path::{Path, PathBuf};
use std::process;

use adbridge::config::AdbridgeConfig;
use adbridge::gateway;
use adbridge::simulator::{self, SimulationRequest};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "adbridge",
    version,
    about = "Campaign gateway for the ads Graph API",
    long_about = "adbridge serves a small campaign dashboard and forwards its\n\
                  insights, budget and status requests to the Graph API with\n\
                  server-side credentials. Proposed changes can be checked\n\
                  against budget/status policy before they are applied."
)]
struct Cli {
    /// Config file (default: ~/.adbridge/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway and dashboard
    Serve {
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Evaluate a proposals file (JSON or YAML) against the policy offline
    Simulate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration with secrets masked
    Config,
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AdbridgeConfig::config_path);

    // Load errors are reported only once the subscriber exists.
    let loaded = AdbridgeConfig::load_from(&config_path);
    let level = match &loaded {
        Ok(config) => config.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    init_logging(&level);

    // `init --force` must still be able to replace a broken file.
    if let Commands::Init { force } = cli.command {
        handle_init(&config_path, force);
        return;
    }

    let config = match loaded {
        Ok(config) => {
            if config_path.exists() {
                info!("Configuration loaded from {}", config_path.display());
            }
            config
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("  ❌ {}", e);
            eprintln!("     Fix it, or run `adbridge init --force` to restore the default file.");
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { port } => handle_serve(config, port),
        Commands::Simulate { file } => {
            if let Err(e) = handle_simulate(&config, &file) {
                eprintln!("  ❌ Simulation failed: {:#}", e);
                process::exit(1);
            }
        }
        Commands::Init { .. } => {}
        Commands::Config => handle_config(&config, &config_path),
    }
}

/// RUST_LOG wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("adbridge={}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn handle_serve(mut config: AdbridgeConfig, port: Option<u16>) {
    if let Some(port) = port {
        config.server.listen_port = port;
    }

    println!();
    println!("  🌐 adbridge gateway on http://{}", config.server.bind_addr());
    println!("  Press Ctrl+C to stop.");
    println!();

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("  ❌ Failed to create async runtime: {}", e);
        process::exit(1);
    });

    rt.block_on(async {
        if let Err(e) = gateway::start_gateway(config).await {
            eprintln!("  ❌ Gateway error: {}", e);
            process::exit(1);
        }
    });
}

fn handle_simulate(config: &AdbridgeConfig, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let is_yaml = matches!(
        file.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let request: SimulationRequest = if is_yaml {
        serde_yaml::from_str(&content).context("parsing YAML proposals")?
    } else {
        serde_json::from_str(&content).context("parsing JSON proposals")?
    };

    if request.apply {
        eprintln!("  ⚠️  `apply` is ignored offline; use POST /api/simulate to apply.");
    }

    let Some(report) = simulator::simulate(&config.policy, &request) else {
        bail!("file has neither `proposals` nor `action`");
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_init(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!("  ⚠️  {} already exists (use --force to overwrite).", path.display());
        process::exit(1);
    }
    match AdbridgeConfig::write_defaults(path) {
        Ok(()) => println!("  ✅ Default configuration written to {}", path.display()),
        Err(e) => {
            eprintln!("  ❌ Failed to write config: {}", e);
            process::exit(1);
        }
    }
}

fn handle_config(config: &AdbridgeConfig, path: &Path) {
    println!("# source: {}", path.display());
    match toml::to_string_pretty(&config.redacted()) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("  ❌ Failed to render config: {}", e);
            process::exit(1);
        }
    }
}
