//! Player-side connection handling.

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use matrix_shared::net::{TOKEN_READY, TOKEN_TAKEN, TOKEN_WAIT};

/// A connection that has completed the name handshake.
#[derive(Debug)]
pub struct GameClient {
    stream: TcpStream,
    name: String,
}

impl GameClient {
    /// Connects and binds `name`. Fails if the host rejects the name; the
    /// connection is dropped rather than retried.
    pub async fn connect(addr: &str, name: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        write
            .write_all(format!("{name}\n").as_bytes())
            .await
            .context("send player name")?;

        let mut token = String::new();
        let n = reader
            .read_line(&mut token)
            .await
            .context("read handshake token")?;
        if n == 0 {
            bail!("host closed during handshake");
        }
        match token.trim() {
            TOKEN_READY => info!(player = name, "bound, game starting"),
            TOKEN_WAIT => info!(player = name, "bound, waiting for more players"),
            TOKEN_TAKEN => bail!("name {name:?} rejected by host"),
            other => bail!("unexpected handshake token {other:?}"),
        }

        let stream = reader
            .into_inner()
            .reunite(write)
            .context("reunite stream halves")?;
        Ok(Self {
            stream,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forwards raw input bytes to the host until the sender side closes
    /// or the connection drops. Arrow escape sequences and the zsqd boost
    /// keys pass through unmodified; the host decodes them per frame.
    pub async fn pump_input(mut self, mut input: mpsc::Receiver<Vec<u8>>) -> anyhow::Result<()> {
        while let Some(bytes) = input.recv().await {
            debug!(n = bytes.len(), "forwarding input");
            self.stream
                .write_all(&bytes)
                .await
                .context("forward input bytes")?;
        }
        Ok(())
    }
}

/// Spawns a blocking stdin reader feeding the returned channel, one chunk
/// per read.
pub fn stdin_bytes() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(32);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 16];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
