//! jobmesh CLI
//!
//! Management commands for running jobs:
//! - Directory queries against the meta-server (list, scan, forward)
//! - Direct worker calls and probes (call, methods, probe)
//! - Multicast discovery
//! - Key and configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jm_core::auth::{Credentials, KeyStore};
use jm_core::{MeshConfig, RpcClient, Security};
use jobmesh::call::parse_endpoint;
use jobmesh::commands;
use jobmesh::output::print_warning;

#[derive(Parser)]
#[command(name = "jobmesh")]
#[command(author, version, about = "Find, inspect and control running simulation jobs")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Meta-server as host[:port] (overrides config)
    #[arg(short, long, global = true, env = "JOBMESH_META")]
    meta: Option<String>,

    /// Call without credentials
    #[arg(long, global = true)]
    anonymous: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workers known to the meta-server
    #[command(alias = "ls")]
    List {
        /// Only show workers whose host, user, job or command contains this
        filter: Option<String>,
        /// Show detailed information
        #[arg(short, long)]
        long: bool,
    },

    /// Find workers via multicast announcements
    Discover {
        /// Seconds to listen (overrides config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Have the meta-server scan subnets (configured ones when none given)
    Scan {
        /// Subnets in CIDR notation, e.g. 10.0.0.0/24
        subnets: Vec<String>,
    },

    /// Relay a call to a worker through the meta-server
    Forward {
        /// Worker as host:port
        worker: String,
        /// Method name, e.g. elapsedTime
        method: String,
        /// Arguments, positional or name=value
        args: Vec<String>,
    },

    /// Call a method on a worker directly
    Call {
        /// Worker as host:port
        worker: String,
        /// Method name, e.g. elapsedTime
        method: String,
        /// Arguments, positional or name=value
        args: Vec<String>,
    },

    /// Describe worker methods
    Methods {
        /// Ask this endpoint (host:port) instead of the built-in table
        endpoint: Option<String>,
        /// Show help for one method
        #[arg(long)]
        method: Option<String>,
    },

    /// Probe the worker port ranges of a host
    Probe {
        /// Host name or address
        host: String,
    },

    /// Manage the key used to authenticate calls
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Create the key pair if missing
    Init,
    /// Print the public key as an authorized_keys line
    Show,
    /// Allow a user's public key
    Authorize {
        /// User name the key belongs to
        user: String,
        /// File holding the OpenSSH public key
        key_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_deref();

    // Commands that work without a usable configuration
    match &cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(config_path),
                ConfigAction::Path => {
                    commands::config_path(config_path);
                    Ok(())
                }
                ConfigAction::Init { force } => commands::config_init(config_path, *force),
            };
        }
        Commands::Methods {
            endpoint: None,
            method,
        } => {
            let client = RpcClient::new(&MeshConfig::default().network, None)?;
            return commands::methods_command(&client, None, method.as_deref()).await;
        }
        _ => {}
    }

    let config = MeshConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let store = KeyStore::new(&config.auth.key_dir);

    if let Commands::Keys { action } = &cli.command {
        return match action {
            KeysAction::Init => commands::keys_init(&store),
            KeysAction::Show => commands::keys_show(&store),
            KeysAction::Authorize { user, key_file } => {
                commands::keys_authorize(&store, user, key_file)
            }
        };
    }

    let credentials = if cli.anonymous || !config.auth.send_credentials {
        None
    } else {
        match store.load() {
            Ok(Some(key)) => Some(Credentials::new(jm_core::host::user_name(), key)),
            Ok(None) => None,
            Err(e) => {
                print_warning(&format!("Calling without credentials: {}", e));
                None
            }
        }
    };
    let client = RpcClient::new(&config.network, credentials)?;

    let meta = match &cli.meta {
        Some(text) => parse_endpoint(text, Some(config.meta.port))?,
        None => config.meta.endpoint(),
    };
    let meta_security = Security::from_ssl(config.meta.tls);

    match cli.command {
        Commands::List { filter, long } => {
            commands::list_command(&client, &meta, meta_security, filter.as_deref(), long).await?;
        }

        Commands::Discover { timeout } => {
            let window = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.discovery.enumerate_timeout);
            commands::discover_command(&config.discovery, &client, window).await?;
        }

        Commands::Scan { subnets } => {
            commands::scan_command(&client, &meta, meta_security, &subnets).await?;
        }

        Commands::Forward {
            worker,
            method,
            args,
        } => {
            let worker = parse_endpoint(&worker, None)?;
            commands::forward_command(&client, &meta, meta_security, &worker, &method, &args)
                .await?;
        }

        Commands::Call {
            worker,
            method,
            args,
        } => {
            let worker = parse_endpoint(&worker, None)?;
            commands::call_command(&client, &worker, Security::Auto, &method, &args).await?;
        }

        Commands::Methods { endpoint, method } => {
            let endpoint = endpoint
                .map(|text| parse_endpoint(&text, None))
                .transpose()?;
            commands::methods_command(&client, endpoint.as_ref(), method.as_deref()).await?;
        }

        Commands::Probe { host } => {
            commands::probe_command(&client, &config.network, &host).await?;
        }

        Commands::Keys { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}
