//! chainws CLI — talk to a node over a WebSocket JSON-RPC connection.
//!
//! Usage:
//! ```bash
//! # Send a raw JSON-RPC call to the local dev node
//! chainws request --chain local --method eth_blockNumber
//!
//! # Call with params against an explicit endpoint
//! chainws request --url wss://ethereum-rpc.publicnode.com \
//!     --method eth_getBalance --params '["0x0000000000000000000000000000000000000000","latest"]'
//!
//! # Follow new block headers, stop after 3
//! chainws subscribe --chain local --topic newHeads --count 3
//!
//! # List built-in chains
//! chainws chains
//! ```

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use futures::StreamExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use chainws_client::{WsClientConfig, WsRpcClient};
use chainws_core::Chain;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "request" => cmd_request(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "chains" => {
            cmd_chains();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainws {}", env!("CARGO_PKG_VERSION"));
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
    println!("chainws {}", env!("CARGO_PKG_VERSION"));
    println!("WebSocket JSON-RPC requests and subscriptions\n");
    println!("USAGE:");
    println!("    chainws <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    request    Send one JSON-RPC call and print the result");
    println!("    subscribe  Open an eth_subscribe stream and print notifications");
    println!("    chains     List built-in chains");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("ENDPOINT FLAGS (one required):");
    println!("    --url <URL>          WebSocket endpoint, overrides the chain default");
    println!("    --chain <NAME|ID>    Built-in chain (see `chainws chains`)");
    println!("    --chain-file <PATH>  Chain definition JSON (rpcUrls.default.webSocket)\n");
    println!("REQUEST FLAGS:");
    println!("    --method <NAME>      JSON-RPC method  [required]");
    println!("    --params <JSON>      Params array (default: [])");
    println!("    --timeout-ms <MS>    Fail if no response within MS\n");
    println!("SUBSCRIBE FLAGS:");
    println!("    --topic <NAME>       Subscription type, e.g. newHeads  [required]");
    println!("    --filter <JSON>      Extra subscription param, e.g. a logs filter");
    println!("    --count <N>          Unsubscribe after N notifications\n");
    println!("Set RUST_LOG=chainws_client=debug for transport logs.");
}

async fn cmd_request(args: &[String]) -> anyhow::Result<()> {
    let client = build_client(args)?;
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = match parse_flag(args, "--params") {
        Some(raw) => parse_params(&raw)?,
        None => vec![],
    };
    let timeout = parse_flag(args, "--timeout-ms")
        .map(|ms| ms.parse::<u64>().map(Duration::from_millis))
        .transpose()
        .context("--timeout-ms must be an integer")?;

    let start = std::time::Instant::now();
    let result = client
        .request_with_timeout(&method, params, timeout)
        .await
        .with_context(|| format!("{method} failed"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    tracing::debug!(latency_ms = start.elapsed().as_millis() as u64, "request completed");
    Ok(())
}

async fn cmd_subscribe(args: &[String]) -> anyhow::Result<()> {
    let client = build_client(args)?;
    let topic = parse_flag(args, "--topic").ok_or_else(|| anyhow!("--topic is required"))?;
    let mut params = vec![Value::String(topic.clone())];
    if let Some(raw) = parse_flag(args, "--filter") {
        params.push(serde_json::from_str(&raw).context("--filter must be JSON")?);
    }
    let limit = parse_flag(args, "--count")
        .map(|n| n.parse::<usize>())
        .transpose()
        .context("--count must be an integer")?;

    let mut subscription = client
        .subscribe(params)
        .await
        .with_context(|| format!("subscribe to {topic} failed"))?;
    eprintln!("Subscribed to {topic} ({})", subscription.id());

    let mut received = 0usize;
    loop {
        tokio::select! {
            item = subscription.next() => {
                match item {
                    Some(Ok(data)) => {
                        println!("{}", serde_json::to_string(&data)?);
                        received += 1;
                        if limit.is_some_and(|n| received >= n) {
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(e).context("subscription ended"),
                    None => return Ok(()),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let acknowledged = subscription.unsubscribe().await.context("unsubscribe failed")?;
    eprintln!("Unsubscribed after {received} notification(s) (ack: {acknowledged})");
    Ok(())
}

fn cmd_chains() {
    println!("Built-in chains:\n");
    for chain in chainws_chains::all() {
        println!("  {:<10} {:>9}  {}", chain.network, chain.id, chain.name);
        println!(
            "  {:<10} {:>9}  ws: {}",
            "",
            "",
            chain.default_web_socket().unwrap_or("(none)")
        );
    }
}

fn build_client(args: &[String]) -> anyhow::Result<WsRpcClient> {
    let chain = resolve_chain(args)?;
    let config = WsClientConfig {
        url: parse_flag(args, "--url"),
        ..WsClientConfig::default()
    };
    WsRpcClient::new(chain.as_ref(), config).context("cannot build client (pass --url or --chain)")
}

fn resolve_chain(args: &[String]) -> anyhow::Result<Option<Chain>> {
    if let Some(path) = parse_flag(args, "--chain-file") {
        let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        return Ok(Some(chainws_chains::from_json(&json)?));
    }
    let Some(name) = parse_flag(args, "--chain") else {
        return Ok(None);
    };
    let chain = match name.parse::<u64>() {
        Ok(id) => chainws_chains::by_id(id),
        Err(_) => chainws_chains::by_name(&name),
    };
    match chain {
        Some(chain) => Ok(Some(chain)),
        None => bail!("unknown chain: {name}"),
    }
}

fn parse_params(raw: &str) -> anyhow::Result<Vec<Value>> {
    match serde_json::from_str(raw).context("--params must be JSON")? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
