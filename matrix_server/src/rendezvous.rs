//! Player rendezvous.
//!
//! Display programs call [`RendezvousServer::register`] to turn raw TCP
//! connections into named player slots:
//! - With exactly one allowed name, the first connection is bound without a
//!   handshake line.
//! - Otherwise each connection sends `name\n`; an unused allowed name binds
//!   it, anything else gets a reject token and the connection stays open for
//!   another try.
//! - After binding, the client receives `READY` if quorum is met, `WAIT`
//!   otherwise.
//!
//! The accept path and the tick loop share only an append-only hand-off:
//! handshakes run as spawned tasks and push bound players over a channel,
//! the scheduler drains it at the start of each tick. Names are never
//! unbound, so quorum is monotonic: once `can_start` is true it never
//! reverts. Latecomers beyond `min_clients` (the optional 3rd/4th paddle)
//! keep binding while the game runs.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use matrix_shared::net::{TOKEN_READY, TOKEN_TAKEN, TOKEN_WAIT};

/// One bound player: name, connection, and the tick it was folded in at.
#[derive(Debug)]
pub struct PlayerSlot {
    pub name: String,
    pub stream: TcpStream,
    pub joined_tick: u64,
}

/// Accepts connections and resolves each to a named player slot.
pub struct RendezvousServer {
    listener: TcpListener,
}

impl RendezvousServer {
    /// Binds the rendezvous port. Retries briefly: on a program switch the
    /// previous program's listener is torn down asynchronously and may
    /// still hold the port for a moment.
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = addr.parse().context("parse listen_addr")?;
        let mut last_err = None;
        for _ in 0..20 {
            match TcpListener::bind(addr).await {
                Ok(listener) => return Ok(Self { listener }),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        match last_err {
            Some(e) => Err(e).context("tcp bind"),
            None => anyhow::bail!("tcp bind"),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts accepting players and hands back the session the scheduler
    /// polls. Accepting continues for the lifetime of the session.
    pub fn register(self, min_clients: usize, allowed_names: &[&str]) -> Session {
        let allowed: Arc<Vec<String>> =
            Arc::new(allowed_names.iter().map(|s| s.to_string()).collect());
        let bound_names = Arc::new(Mutex::new(HashSet::new()));
        let bound_count = Arc::new(AtomicUsize::new(0));
        let bound_notify = Arc::new(Notify::new());
        let (joins_tx, joins_rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(
            self.listener,
            allowed,
            bound_names,
            Arc::clone(&bound_count),
            Arc::clone(&bound_notify),
            min_clients,
            joins_tx,
        ));

        Session {
            players: HashMap::new(),
            joins_rx,
            bound_count,
            bound_notify,
            min_clients,
            started: false,
            accept_task,
        }
    }
}

/// A set of named connections plus the quorum threshold.
///
/// Owned exclusively by the active tick loop; the accept side only appends
/// through the join channel.
pub struct Session {
    players: HashMap<String, PlayerSlot>,
    joins_rx: mpsc::UnboundedReceiver<(String, TcpStream)>,
    bound_count: Arc<AtomicUsize>,
    bound_notify: Arc<Notify>,
    min_clients: usize,
    started: bool,
    accept_task: JoinHandle<()>,
}

impl Session {
    /// Folds newly bound players into the connection map. Returns the names
    /// added this tick.
    pub fn poll_joins(&mut self, tick: u64) -> Vec<String> {
        let mut added = Vec::new();
        while let Ok((name, stream)) = self.joins_rx.try_recv() {
            info!(player = %name, tick, "player joined session");
            self.players.insert(
                name.clone(),
                PlayerSlot {
                    name: name.clone(),
                    stream,
                    joined_tick: tick,
                },
            );
            added.push(name);
        }
        added
    }

    /// True once `min_clients` players have bound. Monotonic: latches on the
    /// first success and never reverts.
    pub fn can_start(&mut self) -> bool {
        if !self.started && self.bound_count.load(Ordering::Acquire) >= self.min_clients {
            self.started = true;
        }
        self.started
    }

    /// Waits until quorum is met, folding in players as they bind. Each
    /// bind stores a wake permit, so one landing before the wait starts
    /// is never missed; the quorum check re-runs after every wake.
    pub async fn wait_for_quorum(&mut self) {
        let notify = Arc::clone(&self.bound_notify);
        while !self.can_start() {
            notify.notified().await;
        }
        self.poll_joins(0);
    }

    pub fn players_mut(&mut self) -> &mut HashMap<String, PlayerSlot> {
        &mut self.players
    }

    /// Bound player names in stable order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    allowed: Arc<Vec<String>>,
    bound_names: Arc<Mutex<HashSet<String>>>,
    bound_count: Arc<AtomicUsize>,
    bound_notify: Arc<Notify>,
    min_clients: usize,
    joins_tx: mpsc::UnboundedSender<(String, TcpStream)>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let allowed = Arc::clone(&allowed);
                let bound_names = Arc::clone(&bound_names);
                let bound_count = Arc::clone(&bound_count);
                let bound_notify = Arc::clone(&bound_notify);
                let joins_tx = joins_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handshake(
                        stream,
                        peer,
                        allowed,
                        bound_names,
                        bound_count,
                        bound_notify,
                        min_clients,
                        joins_tx,
                    )
                    .await
                    {
                        debug!(%peer, error = %e, "handshake ended");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Resolves one connection to a player name. Invalid or duplicate names are
/// rejected and retried on the same connection; they never count toward
/// quorum and never block other connections.
#[allow(clippy::too_many_arguments)]
async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    allowed: Arc<Vec<String>>,
    bound_names: Arc<Mutex<HashSet<String>>>,
    bound_count: Arc<AtomicUsize>,
    bound_notify: Arc<Notify>,
    min_clients: usize,
    joins_tx: mpsc::UnboundedSender<(String, TcpStream)>,
) -> anyhow::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    // With a single allowed name, try to auto-assign it before asking.
    let mut auto_assign = allowed.len() == 1;

    let name = loop {
        let candidate = if auto_assign {
            auto_assign = false;
            allowed[0].clone()
        } else {
            read_name_line(&mut reader).await?
        };

        let accepted = {
            let mut names = bound_names.lock().await;
            allowed.contains(&candidate) && names.insert(candidate.clone())
        };

        if accepted {
            break candidate;
        }
        debug!(%peer, name = %candidate, "name rejected");
        send_token(&mut write, TOKEN_TAKEN).await?;
    };

    let quorum_met = bound_count.fetch_add(1, Ordering::AcqRel) + 1 >= min_clients;
    // notify_one keeps a permit when nobody waits yet, so a bind that
    // lands before wait_for_quorum starts still wakes it.
    bound_notify.notify_one();
    let token = if quorum_met { TOKEN_READY } else { TOKEN_WAIT };
    send_token(&mut write, token).await?;
    info!(%peer, player = %name, %token, "player bound");

    // Any bytes the reader buffered past the name line are pre-game input;
    // dropping them here is the same as dropping a stale tick read.
    let stream = reader
        .into_inner()
        .reunite(write)
        .context("reunite stream halves")?;
    // Receiver gone means the program was replaced; nothing to do.
    let _ = joins_tx.send((name, stream));
    Ok(())
}

async fn read_name_line(reader: &mut BufReader<OwnedReadHalf>) -> anyhow::Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.context("read name line")?;
    if n == 0 {
        anyhow::bail!("peer closed during handshake");
    }
    Ok(line.trim().to_string())
}

async fn send_token(write: &mut OwnedWriteHalf, token: &str) -> anyhow::Result<()> {
    write
        .write_all(format!("{token}\n").as_bytes())
        .await
        .context("send handshake token")
}
