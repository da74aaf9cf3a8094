//! TCP server around a [`Realm`].
//!
//! - One accept task, plus a reader and a writer task per connection.
//! - Connection tasks never touch the world: they send [`Command`]s over an
//!   mpsc channel to the simulation loop, which owns the realm.
//! - Outbound packets go through a bounded per-client channel; a client that
//!   cannot keep up loses packets rather than stalling the tick.
//! - Console commands (status, kick, quit) arrive on their own channel.

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use anyhow::Context;
use realm_shared::{
    config::ServerConfig,
    entity::Instance,
    hooks::{GameHooks, NullHooks},
    intent::Intent,
    map::MapData,
    net::{ClientMsg, FrameReader, FrameWriter, FramedConn, FramedListener, ServerMsg, PROTOCOL_VERSION},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::realm::Realm;

/// Outbound frames buffered per client before packets are dropped.
const CLIENT_QUEUE: usize = 1024;

/// Messages from connection tasks to the simulation loop.
#[derive(Debug)]
pub enum Command {
    Join {
        username: String,
        outbound: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Option<Instance>>,
    },
    Intent {
        player: Instance,
        intent: Intent,
    },
    Leave {
        player: Instance,
    },
}

pub struct GameServer {
    pub cfg: ServerConfig,
    realm: Realm,
    listener: Option<FramedListener>,
    local_addr: SocketAddr,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    clients: BTreeMap<Instance, mpsc::Sender<ServerMsg>>,
    console_rx: Option<mpsc::Receiver<String>>,
    quit: bool,
}

impl GameServer {
    /// Loads the world and binds the listener.
    pub async fn bind(cfg: ServerConfig, map: MapData, hooks: Box<dyn GameHooks>) -> anyhow::Result<Self> {
        let realm = Realm::new(cfg.world.clone(), &map, hooks).context("load world")?;
        let listener = FramedListener::bind(&cfg.server_addr).await?;
        let local_addr = listener.local_addr()?;
        let (commands_tx, commands_rx) = mpsc::channel(4096);

        Ok(Self {
            cfg,
            realm,
            listener: Some(listener),
            local_addr,
            commands_tx,
            commands_rx,
            clients: BTreeMap::new(),
            console_rx: None,
            quit: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn realm_mut(&mut self) -> &mut Realm {
        &mut self.realm
    }

    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    fn start_accepting(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, peer)) => {
                        let commands = commands.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(conn, commands).await {
                                debug!(%peer, error = %e, "Connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        });
    }

    /// Runs until `quit` is entered on the console.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.start_accepting();
        let dt = self.realm.scheduler().period();
        let mut next = Instant::now();

        while !self.quit {
            next += dt;
            self.step();
            tokio::time::sleep_until(next).await;
        }
        info!("Server stopped");
        Ok(())
    }

    /// Runs a fixed number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u64) -> anyhow::Result<()> {
        self.start_accepting();
        let dt = self.realm.scheduler().period();
        let mut next = Instant::now();

        for _ in 0..ticks {
            if self.quit {
                break;
            }
            next += dt;
            self.step();
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// One tick: console, commands, simulation, flush.
    pub fn step(&mut self) {
        self.process_console_commands();
        self.process_commands();
        self.realm.tick();
        self.flush();
    }

    fn process_console_commands(&mut self) {
        let mut lines = Vec::new();
        if let Some(rx) = self.console_rx.as_mut() {
            while let Ok(line) = rx.try_recv() {
                lines.push(line);
            }
        }
        for line in lines {
            for out in self.exec_console(&line) {
                println!("{out}");
            }
        }
    }

    /// Executes a console command and returns its output lines.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => Vec::new(),
            ["status"] => {
                let mut out = self.realm.status();
                out.push(format!("Connections: {}", self.clients.len()));
                out
            }
            ["kick", id] => {
                let Ok(id) = id.trim_start_matches('#').parse::<u64>() else {
                    return vec![format!("Not an instance: {id}")];
                };
                if self.realm.kick(Instance(id), "kicked") {
                    self.flush();
                    vec![format!("Kicked #{id}")]
                } else {
                    vec![format!("No player #{id}")]
                }
            }
            ["kick"] => vec!["Usage: kick <instance>".to_string()],
            ["quit"] | ["exit"] => {
                info!("Server shutting down");
                self.quit = true;
                vec!["Shutting down".to_string()]
            }
            _ => vec![format!("Unknown command: {line}")],
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                Command::Join { username, outbound, reply } => {
                    let player = match self.realm.join(&username) {
                        Ok(player) => {
                            self.clients.insert(player, outbound);
                            Some(player)
                        }
                        Err(e) => {
                            warn!(%username, error = %e, "Could not place player");
                            None
                        }
                    };
                    let _ = reply.send(player);
                }
                Command::Intent { player, intent } => {
                    self.realm.queue(player, intent);
                }
                Command::Leave { player } => {
                    self.clients.remove(&player);
                    self.realm.leave(player);
                }
            }
        }
    }

    /// Hands this tick's packets to the connection writers.
    fn flush(&mut self) {
        let (packets, disconnects) = self.realm.take_outbox().take();
        for (to, packet) in packets {
            let Some(tx) = self.clients.get(&to) else {
                continue;
            };
            if tx.try_send(ServerMsg::Packet(packet)).is_err() {
                debug!(player = %to, "Outbound queue full, packet dropped");
            }
        }
        for (player, reason) in disconnects {
            if let Some(tx) = self.clients.remove(&player) {
                info!(%player, %reason, "Disconnecting player");
                let _ = tx.try_send(ServerMsg::Disconnect { reason });
            }
        }
    }
}

/// Binds a server on an ephemeral localhost port over an open field.
pub async fn bind_ephemeral(tick_ms: u64) -> anyhow::Result<(GameServer, ServerConfig)> {
    let mut cfg = ServerConfig {
        server_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    cfg.world.tick_ms = tick_ms;
    let server = GameServer::bind(cfg.clone(), MapData::open_field(64, 36), Box::new(NullHooks)).await?;
    cfg.server_addr = server.local_addr().to_string();
    Ok((server, cfg))
}

async fn serve_connection(conn: FramedConn, commands: mpsc::Sender<Command>) -> anyhow::Result<()> {
    let peer = conn.peer_addr()?;
    let (mut reader, mut writer) = conn.into_split();

    let username = match reader.recv::<ClientMsg>().await? {
        ClientMsg::Hello { protocol, username } if protocol == PROTOCOL_VERSION => username,
        other => {
            writer
                .send(&ServerMsg::Disconnect {
                    reason: "bad handshake".to_string(),
                })
                .await?;
            anyhow::bail!("unexpected handshake msg: {other:?}");
        }
    };

    let (outbound, outbound_rx) = mpsc::channel(CLIENT_QUEUE);
    let (reply, joined) = oneshot::channel();
    commands
        .send(Command::Join {
            username: username.clone(),
            outbound,
            reply,
        })
        .await
        .context("simulation stopped")?;
    let Some(player) = joined.await.context("join reply")? else {
        writer
            .send(&ServerMsg::Disconnect {
                reason: "world is full".to_string(),
            })
            .await?;
        return Ok(());
    };
    info!(%peer, %player, %username, "Client connected");

    // A finished writer means the server dropped the client; stop reading too.
    let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));
    let result = tokio::select! {
        read = read_loop(&mut reader, player, &commands) => read,
        written = &mut writer_task => {
            debug!(%player, "Writer finished, closing connection");
            written.context("writer task").and_then(|r| r)
        }
    };
    drop(reader);

    let _ = commands.send(Command::Leave { player }).await;
    writer_task.abort();
    info!(%peer, %player, "Client disconnected");
    result
}

async fn read_loop(reader: &mut FrameReader, player: Instance, commands: &mpsc::Sender<Command>) -> anyhow::Result<()> {
    loop {
        match reader.recv::<ClientMsg>().await? {
            ClientMsg::Intent(intent) => {
                if commands
                    .send(Command::Intent { player, intent })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
            ClientMsg::Hello { .. } => debug!(%player, "Duplicate hello ignored"),
        }
    }
}

async fn write_loop(mut writer: FrameWriter, mut outbound: mpsc::Receiver<ServerMsg>) -> anyhow::Result<()> {
    while let Some(msg) = outbound.recv().await {
        let last = matches!(msg, ServerMsg::Disconnect { .. });
        writer.send(&msg).await?;
        if last {
            break;
        }
    }
    writer.shutdown().await
}
