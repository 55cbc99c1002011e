mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands, SweepCommand};
use mc_core::config::Config;
use mc_server::context::AppContext;
use std::path::Path;

fn load_config(path: Option<&Path>) -> Config {
    Config::load_or_default(path)
}

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path);

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting mediaconv server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    mc_server::start(config).await?;
    Ok(())
}

async fn run_sweep(kind: SweepCommand, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let db = mc_server::open_store(&config).context("failed to open job store")?;
    let ctx = AppContext::new(db, config);
    let now = Utc::now();

    let report = match kind {
        SweepCommand::Routine => {
            serde_json::to_value(mc_server::cleanup::routine_sweep(&ctx, now).await?)?
        }
        SweepCommand::Emergency => {
            serde_json::to_value(mc_server::cleanup::emergency_sweep(&ctx, now).await?)?
        }
        SweepCommand::Stats => serde_json::to_value(mc_server::cleanup::storage_report(&ctx, now)?)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaconv=trace,mc_server=trace,mc_av=debug,mc_db=debug,mc_core=debug,tower_http=debug"
                .to_string()
        } else {
            "mediaconv=info,mc_server=info,mc_av=info,mc_db=warn,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Sweep { kind } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_sweep(kind, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaconv {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path);
    let tools = mc_av::check_tools(&config.tools);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Conversions will fail until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Node: {} (peer {})", config.node.display_name(), config.node.peer_url);
    println!("  Artifacts recorded on: {}", config.node.artifact_location());
    println!("  Retention: {}h", config.retention.hours);
    println!(
        "  Sweeps: routine {}s, report {}s, emergency {}s (max age {}h)",
        config.cleanup.routine_interval_secs,
        config.cleanup.storage_report_interval_secs,
        config.cleanup.emergency_interval_secs,
        config.cleanup.emergency_max_age_hours
    );

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {warning}");
    }

    Ok(())
}
