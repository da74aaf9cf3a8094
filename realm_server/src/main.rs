//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p realm_server -- [--config server.json] [--addr 127.0.0.1:9001] [--tick-ms 600] [--map map.json]
//!
//! Flags override values from the config file. Without a map the world is
//! a generated open field.
//!
//! Console commands:
//!   status           - Show tick, entities and connected players
//!   kick <instance>  - Disconnect a player
//!   quit             - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use realm_server::GameServer;
use realm_shared::{config::ServerConfig, hooks::NullHooks, map::MapData};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    addr: Option<String>,
    tick_ms: Option<u64>,
    map: Option<String>,
}

fn parse_args() -> Args {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                out.tick_ms = args[i + 1].parse().ok();
                i += 2;
            }
            "--map" if i + 1 < args.len() => {
                out.map = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        None => ServerConfig::default(),
    };
    if let Some(addr) = &args.addr {
        cfg.server_addr = addr.clone();
    }
    if let Some(tick_ms) = args.tick_ms {
        cfg.world.tick_ms = tick_ms;
    }
    if let Some(map) = &args.map {
        cfg.map_path = Some(map.clone());
    }
    Ok(cfg)
}

fn load_map(cfg: &ServerConfig) -> anyhow::Result<MapData> {
    match &cfg.map_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read map {path}"))?;
            MapData::from_json_str(&text).with_context(|| format!("parse map {path}"))
        }
        None => Ok(MapData::open_field(128, 96)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(&args)?;
    let map = load_map(&cfg)?;
    info!(
        addr = %cfg.server_addr,
        tick_ms = cfg.world.tick_ms,
        map = cfg.map_path.as_deref().unwrap_or("<open field>"),
        "Starting server"
    );

    let mut server = GameServer::bind(cfg, map, Box::new(NullHooks))
        .await
        .context("create server")?;
    info!(local = %server.local_addr(), "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'kick <instance>' to drop a player, 'quit' to exit.");
    println!();

    server.run().await
}
