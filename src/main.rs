//! Command-line front end for the gateway client.
//!
//! Sessions persist in a JSON file between invocations, so `login` followed by
//! `get` reuses the stored credential and refresh token.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use gateway_client::config::{load_config, load_from_env};
use gateway_client::http::CorrelationId;
use gateway_client::observability::logging::init_logging;
use gateway_client::{CircuitBreaker, ClientConfig, GatewayClient, RequestOptions, RetryPolicy};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Call the API gateway through the resilient client", long_about = None)]
struct Cli {
    /// TOML config file; defaults plus GATEWAY_* variables when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gateway base URL.
    #[arg(short, long)]
    url: Option<String>,

    /// Session file; defaults to ~/.gateway-cli/session.json.
    #[arg(long)]
    session: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and store the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "GATEWAY_PASSWORD")]
        password: String,
    },
    /// Clear the stored session
    Logout,
    /// GET a path, retried with backoff
    Get {
        path: String,
        /// Query parameter as key=value; repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// POST a JSON body to a path
    Post {
        path: String,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Check gateway health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    init_logging(&config.observability.log_level);

    if let Some(url) = cli.url {
        config.gateway.base_url = url;
    }
    let session = cli.session.unwrap_or_else(|| default_session_path(&config));
    if let Some(parent) = session.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.auth.session_file = Some(session.to_string_lossy().into_owned());

    let retry = RetryPolicy::from_config(&config.retries);
    let breaker = CircuitBreaker::new(&config.circuit_breaker);
    let client = GatewayClient::builder(config).build()?;
    let retry = retry.with_network_monitor(client.network().clone());

    // One id per invocation; retries reuse it.
    let correlation_id = CorrelationId::new();
    let options = || RequestOptions::new().with_correlation_id(correlation_id.clone());

    match cli.command {
        Commands::Login { username, password } => {
            let tokens = client.login(&username, &password).await?;
            println!("Logged in");
            if let Some(user) = tokens.user_profile() {
                print_json(user)?;
            }
        }
        Commands::Logout => {
            client.logout();
            println!("Session cleared");
        }
        Commands::Get { path, params } => {
            let params = parse_params(&params)?;
            let value: Value = breaker
                .call(&path, || {
                    retry.retry(|| client.get(&path, params.as_ref(), options()))
                })
                .await?;
            print_json(&value)?;
        }
        Commands::Post { path, body } => {
            let body = body.map(|raw| serde_json::from_str(&raw)).transpose()?;
            let value: Value = client.post(&path, body, options()).await?;
            print_json(&value)?;
        }
        Commands::Health => {
            let value: Value = client.get("/health", None, options()).await?;
            print_json(&value)?;
        }
    }

    if let Some(id) = client.last_correlation_id() {
        tracing::debug!(correlation_id = %id, "Last response");
    }
    Ok(())
}

fn default_session_path(config: &ClientConfig) -> PathBuf {
    if let Some(path) = &config.auth.session_file {
        return PathBuf::from(path);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gateway-cli")
        .join("session.json")
}

fn parse_params(raw: &[String]) -> Result<Option<Value>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut params = Map::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("parameter '{}' is not key=value", pair))?;
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Some(Value::Object(params)))
}

fn print_json(value: &Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
