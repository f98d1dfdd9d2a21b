//! Splunk MCP server binary.
//!
//! Runs the MCP stdio server by default, and carries the operator utilities
//! around it: sealing the Splunk password for this machine, testing the
//! connection, and running one-off queries.
//!
//! # Security Guarantees
//! - The password is read without echo and never printed or logged
//! - Sealed passwords only decrypt on the machine that sealed them
//! - stdout is reserved for the MCP protocol while serving

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use splunk_mcp::build_rest_server;
use splunk_mcp_core::config::DEFAULT_CONFIG_FILE;
use splunk_mcp_core::logging::{init_logging, resolve_level};
use splunk_mcp_core::session::SearchRequest;
use splunk_mcp_core::{
    Config, CredentialVault, EncryptedCredential, FingerprintSource, MachineFingerprint,
};
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "splunk-mcp")]
#[command(about = "MCP server for Splunk search with machine-bound credentials")]
#[command(version)]
#[command(long_about = "
Splunk MCP Server - Splunk search tools for MCP clients

Serves MCP over stdio (the default command). Tools:
- get_index_for_environment
- check_connection
- execute_query
- get_available_indexes
- get_sourcetypes

SECURITY FEATURES:
- Passwords sealed with AES-256-GCM under a key bound to this machine
- Decrypted credentials never logged or returned
- Session keys reused for one hour, then renewed

EXAMPLES:
  splunk-mcp encrypt-password
  splunk-mcp --config /etc/splunk-mcp/config.yml test-connection
  splunk-mcp query 'index=app_prod error' --earliest-time -1h
  splunk-mcp serve
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve MCP over stdio
    Serve,
    /// Seal a Splunk password for this machine
    EncryptPassword,
    /// Check connectivity and run a test search
    TestConnection,
    /// Run a single search and print the JSON response
    Query(QueryArgs),
    /// Print this machine's binding hash
    Fingerprint,
}

#[derive(Args)]
pub struct QueryArgs {
    /// SPL query to run
    pub query: String,

    /// Earliest time (defaults to the configured value)
    #[arg(long)]
    pub earliest_time: Option<String>,

    /// Latest time (defaults to the configured value)
    #[arg(long)]
    pub latest_time: Option<String>,

    /// Maximum number of results (1 to 50000)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=50_000))]
    pub max_results: Option<u32>,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Only log errors")]
    pub quiet: bool,

    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SPLUNK_MCP_CONFIG",
        default_value = DEFAULT_CONFIG_FILE,
        help = "Path to the YAML configuration file"
    )]
    pub config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        None | Some(Command::Serve) => serve(&cli.global).await,
        Some(Command::EncryptPassword) => {
            init_logging(resolve_level(cli.global.verbose, cli.global.quiet, None), None)?;
            encrypt_password()
        }
        Some(Command::TestConnection) => test_connection(&cli.global).await,
        Some(Command::Query(args)) => run_query(&cli.global, args).await,
        Some(Command::Fingerprint) => {
            init_logging(resolve_level(cli.global.verbose, cli.global.quiet, None), None)?;
            let fingerprint = MachineFingerprint.compute()?;
            println!("{}", fingerprint.binding_hash());
            Ok(())
        }
    }
}

/// Loads the configuration and starts logging as it prescribes.
fn load(global: &GlobalArgs) -> anyhow::Result<Config> {
    let config = Config::from_file(&global.config).with_context(|| {
        format!(
            "Cannot load {}; create it and run `splunk-mcp encrypt-password` to seal the password",
            global.config.display()
        )
    })?;
    let level = resolve_level(global.verbose, global.quiet, Some(&config.logging.level));
    init_logging(level, config.logging.log_file.as_deref())?;
    Ok(config)
}

async fn serve(global: &GlobalArgs) -> anyhow::Result<()> {
    let config = Arc::new(load(global)?);
    info!(environments = %config.environments().join(", "), "Starting Splunk MCP server");

    let server = build_rest_server(Arc::clone(&config))?;
    server
        .tools()
        .session()
        .lock()
        .await
        .decrypt_startup_credentials()
        .inspect_err(|e| error!(kind = e.kind(), error = %e, "Stored credentials unusable"))?;

    let served = server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    server.tools().session().lock().await.disconnect().await;
    served?;
    info!("Splunk MCP server stopped");
    Ok(())
}

/// Splunk section printed by `encrypt-password`.
#[derive(Serialize)]
struct SealedBlock<'a> {
    splunk: SealedSplunk<'a>,
}

#[derive(Serialize)]
struct SealedSplunk<'a> {
    username: &'a str,
    #[serde(flatten)]
    sealed: &'a EncryptedCredential,
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn encrypt_password() -> anyhow::Result<()> {
    println!("Splunk MCP password encryption");
    println!();
    println!("The sealed password can only be decrypted on this machine, by this user.");
    println!("The same credentials are used for every environment; only indexes differ.");
    println!();

    let username = prompt_line("Enter username: ")?;
    if username.is_empty() {
        bail!("Username cannot be empty");
    }
    let password = zeroize::Zeroizing::new(rpassword::prompt_password("Enter password: ")?);
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    let confirm = zeroize::Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);
    if *password != *confirm {
        bail!("Passwords don't match");
    }

    let vault = CredentialVault::for_this_machine();
    let sealed = vault.encrypt_for_this_machine(&password)?;
    let reopened = vault
        .decrypt(&sealed)
        .context("Encryption verification failed")?;
    if *reopened != *password {
        bail!("Encryption verification failed: round trip mismatch");
    }
    info!(machine_hash = %sealed.fingerprint_hash, "Password sealed for this machine");

    let block = serde_yaml::to_string(&SealedBlock {
        splunk: SealedSplunk {
            username: &username,
            sealed: &sealed,
        },
    })?;

    println!();
    println!("Password encrypted. Update config.yml with:");
    println!();
    print!("{}", block);
    println!();
    println!("These values only work on this machine; re-run this command after moving.");
    Ok(())
}

async fn test_connection(global: &GlobalArgs) -> anyhow::Result<()> {
    let config = Arc::new(load(global)?);
    let server = build_rest_server(Arc::clone(&config))?;
    let session = server.tools().session();
    let mut session = session.lock().await;

    session.decrypt_startup_credentials()?;
    println!("Credentials decrypted");

    let status = session.check_connection().await;
    if !status.ok {
        bail!(
            "Connection failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    if let Some(info) = &status.server_info {
        println!(
            "Connected to {} (Splunk {}, build {}) in {} ms",
            info.server_name, info.version, info.build, status.latency_ms
        );
    }
    println!("Indexes: {}", status.indexes.join(", "));

    let request = SearchRequest::new(
        r#"| makeresults count=5 | eval test_field="MCP Connection Test""#,
        "-1m",
        "now",
        5,
    );
    let outcome = session.execute(&request).await?;
    println!("Test search returned {} results", outcome.records.len());

    session.disconnect().await;
    Ok(())
}

async fn run_query(global: &GlobalArgs, args: &QueryArgs) -> anyhow::Result<()> {
    let config = Arc::new(load(global)?);
    let server = build_rest_server(Arc::clone(&config))?;

    let mut arguments = serde_json::json!({ "query": args.query });
    if let Some(earliest) = &args.earliest_time {
        arguments["earliest_time"] = earliest.clone().into();
    }
    if let Some(latest) = &args.latest_time {
        arguments["latest_time"] = latest.clone().into();
    }
    if let Some(max_results) = args.max_results {
        arguments["max_results"] = max_results.into();
    }

    let response = server.tools().call("execute_query", &arguments).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    server.tools().session().lock().await.disconnect().await;

    if response["status"] == "error" {
        bail!("Query failed");
    }
    Ok(())
}
