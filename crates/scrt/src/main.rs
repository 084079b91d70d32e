use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "scrt", about = "scrt — secrets that reveal themselves later", version)]
struct Cli {
    /// scrt server URL (default: http://localhost:3000 or $SCRT_SERVER)
    #[arg(long, env = "SCRT_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scrt HTTP server
    Serve {
        /// Port to listen on (default: $SCRT_PORT or 3000)
        #[arg(long, env = "SCRT_PORT", default_value = "3000")]
        port: u16,
        /// Host to bind (default: $SCRT_HOST or 0.0.0.0)
        #[arg(long, env = "SCRT_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Shard directory (default: $SCRT_DATA_DIR or a per-process temp dir)
        #[arg(long, env = "SCRT_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Store a secret and print its id
    Create {
        /// Secret text (at most 239 bytes)
        text: String,
        /// Reveal after this long, e.g. 1h, 30m, 7d
        #[arg(long = "in", conflicts_with = "at", required_unless_present = "at")]
        reveal_in: Option<String>,
        /// Reveal at this RFC 3339 instant
        #[arg(long)]
        at: Option<String>,
    },
    /// Fetch a secret by id
    Fetch {
        /// 64-character hex id
        id: String,
    },
    /// Remove a secret by id
    Remove {
        /// 64-character hex id
        id: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SCRT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
        } => cmd_serve(host, port, data_dir).await,

        Commands::Create {
            text,
            reveal_in,
            at,
        } => {
            let reveal_at = resolve_reveal_at(reveal_in.as_deref(), at.as_deref())?;
            cmd_create(&cli.server, &text, reveal_at).await
        }

        Commands::Fetch { id } => cmd_fetch(&cli.server, &id).await,

        Commands::Remove { id } => cmd_remove(&cli.server, &id).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, data_dir: Option<PathBuf>) -> Result<()> {
    let cfg = scrt_server::ServerConfig {
        host,
        port,
        data_dir,
        ..Default::default()
    };

    scrt_server::run(cfg).await
}

async fn cmd_create(server: &str, text: &str, reveal_at: DateTime<Utc>) -> Result<()> {
    let client = Client::new();
    let body = serde_json::json!({
        "text": text,
        "expiration": reveal_at.to_rfc3339(),
    });

    let resp = client
        .post(format!("{}/api", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    if status != StatusCode::CREATED {
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }

    let id = resp.text().await.context("read secret id")?;
    println!("{id}");
    Ok(())
}

async fn cmd_fetch(server: &str, id: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/api/{}", server.trim_end_matches('/'), id))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        anyhow::bail!("no secret with id {id}");
    }
    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }

    let json: Value = resp.json().await.context("parse response")?;
    println!("{}", render_fetch(&json));
    Ok(())
}

async fn cmd_remove(server: &str, id: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .delete(format!("{}/api/{}", server.trim_end_matches('/'), id))
        .send()
        .await
        .context("HTTP request failed")?;

    match resp.status() {
        s if s.is_success() => {
            println!("✓ removed {id}");
            Ok(())
        }
        StatusCode::NOT_FOUND => anyhow::bail!("no secret with id {id}"),
        s => anyhow::bail!("server returned {s}"),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn resolve_reveal_at(reveal_in: Option<&str>, at: Option<&str>) -> Result<DateTime<Utc>> {
    match (reveal_in, at) {
        (Some(d), _) => {
            let secs = i64::try_from(parse_duration(d)?)
                .with_context(|| format!("duration too large: {d}"))?;
            let delta = chrono::Duration::try_seconds(secs)
                .with_context(|| format!("duration too large: {d}"))?;
            Ok(Utc::now() + delta)
        }
        (None, Some(ts)) => DateTime::parse_from_rfc3339(ts)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("invalid RFC 3339 timestamp: {ts}")),
        (None, None) => anyhow::bail!("one of --in or --at is required"),
    }
}

/// Parse human duration strings like "1h", "30m", "7d", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

fn render_fetch(json: &Value) -> String {
    if json["Expired"].as_bool().unwrap_or(false) {
        json["Text"].as_str().unwrap_or("").to_owned()
    } else {
        format!(
            "sealed until {}",
            json["Expiration"].as_str().unwrap_or("unknown")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("90s").unwrap(), 90);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn reveal_at_from_timestamp() {
        let t = resolve_reveal_at(None, Some("2040-01-01T02:00:00+02:00")).unwrap();
        assert_eq!(t.to_rfc3339(), "2040-01-01T00:00:00+00:00");
        assert!(resolve_reveal_at(None, Some("tomorrow")).is_err());
    }

    #[test]
    fn reveal_at_from_duration_is_in_the_future() {
        let t = resolve_reveal_at(Some("10m"), None).unwrap();
        assert!(t > Utc::now() + chrono::Duration::minutes(9));
    }

    #[test]
    fn oversized_duration_rejected() {
        let err = resolve_reveal_at(Some("10000000000000000000s"), None).unwrap_err();
        assert!(err.to_string().contains("duration too large"));
    }

    #[test]
    fn fetch_rendering() {
        let sealed = serde_json::json!({"Expired": false, "Expiration": "2040-01-01T00:00:00Z"});
        assert_eq!(render_fetch(&sealed), "sealed until 2040-01-01T00:00:00Z");
        let open = serde_json::json!({"Expired": true, "Text": "hi"});
        assert_eq!(render_fetch(&open), "hi");
    }
}
