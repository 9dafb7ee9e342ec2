//! Shared helpers for the socket-level integration tests.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use matrix_server::rendezvous::RendezvousServer;

/// Per-step timeout so a broken handshake fails the test instead of
/// hanging it.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds a rendezvous server on an ephemeral port; returns it with its
/// dial address.
pub async fn bind_ephemeral() -> anyhow::Result<(RendezvousServer, String)> {
    let server = RendezvousServer::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?.to_string();
    Ok((server, addr))
}

/// A raw player connection driven step by step, so tests can observe
/// individual handshake tokens.
pub struct RawPlayer {
    reader: BufReader<OwnedReadHalf>,
    write: OwnedWriteHalf,
}

impl RawPlayer {
    pub async fn open(addr: &str) -> anyhow::Result<Self> {
        let stream = timeout(STEP_TIMEOUT, TcpStream::connect(addr))
            .await
            .context("connect timed out")??;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            write,
        })
    }

    pub async fn send_name(&mut self, name: &str) -> anyhow::Result<()> {
        timeout(STEP_TIMEOUT, self.write.write_all(format!("{name}\n").as_bytes()))
            .await
            .context("send timed out")??;
        Ok(())
    }

    /// Reads one handshake token line.
    pub async fn next_token(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("token read timed out")??;
        anyhow::ensure!(n > 0, "host closed the connection");
        Ok(line.trim().to_string())
    }

    /// Sends raw gameplay bytes, e.g. an arrow escape sequence.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        timeout(STEP_TIMEOUT, self.write.write_all(bytes))
            .await
            .context("send timed out")??;
        Ok(())
    }
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
