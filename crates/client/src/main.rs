//! `secure-client`: performs one encrypted request and prints the result.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Open the credential store and apply `--token`.
//! 4. Build the HTTPS transport and the [`SecureClient`].
//! 5. Send the request; print the status to stderr and the body to stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{info, warn};

use secure_client::{
    telemetry, ClientOptions, Config, CredentialStore, FileCredentialStore, HttpTransport,
    MemoryCredentialStore, SecureClient,
};

/// Send one request through the encrypting client.
#[derive(Parser, Debug)]
#[command(name = "secure-client")]
#[command(version, about, long_about = None)]
struct Args {
    /// Bearer token; stored before the request is sent
    #[arg(long, env = "SECURE_CLIENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    method: String,

    /// Path relative to BASE_URL
    path: String,

    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,

    /// Query parameter as key=value; repeatable
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %cfg.base_url,
        "secure-client starting"
    );

    // -----------------------------------------------------------------------
    // 3. Credentials
    // -----------------------------------------------------------------------
    let store: Arc<dyn CredentialStore> = match &cfg.token_path {
        Some(path) => Arc::new(FileCredentialStore::open(path)?),
        None => Arc::new(MemoryCredentialStore::new()),
    };
    if let Some(token) = args.token.clone() {
        store.set_token(Some(token));
    }

    // -----------------------------------------------------------------------
    // 4. Transport + client
    // -----------------------------------------------------------------------
    let transport = HttpTransport::from_config(&cfg)?;
    let client = SecureClient::new(transport, store, ClientOptions::from(&cfg))?;
    if !client.is_authenticated() {
        warn!("no token available; the request is sent unencrypted");
    }

    // -----------------------------------------------------------------------
    // 5. Request
    // -----------------------------------------------------------------------
    let body = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;
    let params: Map<String, Value> = args
        .params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let method = args.method.to_ascii_uppercase();
    if !params.is_empty() && method != "GET" {
        anyhow::bail!("--param is only supported with GET");
    }
    let empty = Value::Object(Map::new());

    let result = match method.as_str() {
        "GET" => client.get(&args.path, Some(&params)).await,
        "POST" => client.post(&args.path, body.as_ref().unwrap_or(&empty)).await,
        "PUT" => client.put(&args.path, body.as_ref().unwrap_or(&empty)).await,
        "PATCH" => client.patch(&args.path, body.as_ref().unwrap_or(&empty)).await,
        "DELETE" => client.delete(&args.path, body.as_ref()).await,
        other => anyhow::bail!("unsupported method {other}"),
    };

    let res = match result {
        Ok(res) => res,
        Err(e) => {
            if e.requires_reauth() {
                eprintln!("session invalidated; log in again");
            }
            return Err(e.into());
        }
    };

    eprintln!("{}", res.status());
    match serde_json::from_slice::<Value>(res.body()) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", String::from_utf8_lossy(res.body())),
    }
    Ok(())
}
