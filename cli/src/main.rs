//! dropwire CLI — normalize endpoints and query the backend from the terminal.
//!
//! Usage:
//! ```bash
//! # Canonical URL for an endpoint
//! dropwire normalize --base https://api.api.example.com/api/api --path resumes/11/
//!
//! # Show the trailing-slash policy table
//! dropwire policies
//!
//! # Fetch through the full resilience stack (token from DROPWIRE_TOKEN)
//! dropwire get --path subscriptions/my --operation subscription.current
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use dropwire_core::normalize::{PathPattern, PolicyTable, TrailingSlash};
use dropwire_core::{Normalizer, NormalizerConfig, RequestSpec, StaticCredential};
use dropwire_http::Settings;

mod telemetry;

const ENV_TOKEN: &str = "DROPWIRE_TOKEN";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let level = if has_flag(&args, "--verbose") { "debug" } else { "info" };
    telemetry::init_tracing(level, has_flag(&args, "--json-logs"));

    let result = match args[1].as_str() {
        "normalize" => cmd_normalize(&args[2..]),
        "policies" => cmd_policies(&args[2..]),
        "get" => cmd_get(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("dropwire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("dropwire {}", env!("CARGO_PKG_VERSION"));
    println!("Resilient access to the document backend\n");
    println!("USAGE:");
    println!("    dropwire <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    normalize  Print the canonical URL for a base and path");
    println!("    policies   Print the trailing-slash policy table");
    println!("    get        GET a path through retries, fallbacks and the circuit breaker");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("NORMALIZE FLAGS:");
    println!("    --base <URL>         Base URL  [required]");
    println!("    --path <PATH>        Endpoint path  [required]\n");
    println!("GET FLAGS:");
    println!("    --path <PATH>        Endpoint path  [required]");
    println!("    --base <URL>         Override the API base URL");
    println!("    --operation <NAME>   Operation name for circuit state  [default: cli.get]\n");
    println!("GLOBAL FLAGS:");
    println!("    --config <FILE>      JSON settings file");
    println!("    --verbose            Debug logging");
    println!("    --json-logs          JSON logs on stderr\n");
    println!("ENVIRONMENT:");
    println!("    {ENV_TOKEN}        Bearer token for `get`");
    println!("    DROPWIRE_API_URL, DROPWIRE_RELAY_URL, DROPWIRE_MAX_RETRIES, ...");
}

fn load_settings(args: &[String]) -> Result<Settings> {
    let mut settings = match parse_flag(args, "--config") {
        Some(path) => Settings::from_file(&path)
            .with_context(|| format!("loading settings from {path}"))?,
        None => Settings::default(),
    };
    settings
        .apply_env()
        .context("applying DROPWIRE_* environment overrides")?;
    Ok(settings)
}

fn cmd_normalize(args: &[String]) -> Result<()> {
    let base = parse_flag(args, "--base").ok_or_else(|| anyhow!("--base is required"))?;
    let path = parse_flag(args, "--path").ok_or_else(|| anyhow!("--path is required"))?;

    let normalizer = match parse_flag(args, "--config") {
        Some(_) => load_settings(args)?.normalizer(),
        None => Normalizer::new(PolicyTable::default(), NormalizerConfig::default()),
    };
    println!("{}", normalizer.normalize(&base, &path));
    Ok(())
}

fn cmd_policies(args: &[String]) -> Result<()> {
    let settings = load_settings(args)?;
    let normalizer = settings.normalizer();

    println!("Endpoint classes (first match wins):\n");
    for policy in normalizer.table().policies() {
        let pattern = match &policy.pattern {
            PathPattern::NumericIdSuffix => "<collection>/<numeric id>".to_string(),
            PathPattern::Prefix(p) => format!("{p}/..."),
            PathPattern::LastSegment(s) => format!(".../{s}"),
        };
        let slash = match policy.trailing_slash {
            TrailingSlash::Required => "trailing /",
            TrailingSlash::Forbidden => "no trailing /",
        };
        println!("  {:<14} {:<28} {slash}", policy.class, pattern);
    }
    println!("  {:<14} {:<28} trailing /", "(default)", "anything else");
    Ok(())
}

async fn cmd_get(args: &[String]) -> Result<()> {
    let path = parse_flag(args, "--path").ok_or_else(|| anyhow!("--path is required"))?;
    let operation = parse_flag(args, "--operation").unwrap_or_else(|| "cli.get".to_string());

    let mut settings = load_settings(args)?;
    if let Some(base) = parse_flag(args, "--base") {
        settings.api_url = base;
    }
    let token = env::var(ENV_TOKEN).unwrap_or_default();
    let ctx = settings
        .build_context(Arc::new(StaticCredential::new(token)))
        .context("building resilience context")?;

    match ctx.execute(&operation, RequestSpec::get(&path)).await {
        Ok(payload) => {
            tracing::info!(strategy = %payload.strategy, status = payload.status, "delivered");
            match payload.json::<serde_json::Value>() {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", String::from_utf8_lossy(&payload.body)),
            }
            Ok(())
        }
        Err(record) => {
            eprintln!("{}", serde_json::to_string_pretty(&record)?);
            bail!("{}", record.user_message)
        }
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
