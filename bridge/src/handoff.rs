use std::sync::{Arc, Mutex};

use eyre::WrapErr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use wire::{NO_SESSION_REPLY, SESSION_PORT_REQUEST};

/// Control-channel listener the long-lived target runtime polls to learn
/// which per-session port, if any, it should connect to next.
///
/// A mailbox holding at most one pending "next port" value: staged by
/// [`SessionHandoff::publish`], consumed by the next poll. A poll with no
/// pending value answers `no-session` and the runtime proceeds unobstructed.
pub struct SessionHandoff {
    port: u16,
    next_session_port: Arc<Mutex<Option<u16>>>,
}

impl SessionHandoff {
    /// Bind the control channel on an ephemeral loopback port and start
    /// answering polls in the background.
    pub async fn bind() -> eyre::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .wrap_err("binding control channel")?;
        let port = listener
            .local_addr()
            .wrap_err("resolving control channel address")?
            .port();
        tracing::info!(port, "control channel listening for session polls");

        let next_session_port = Arc::new(Mutex::new(None));
        let mailbox = Arc::clone(&next_session_port);
        tokio::spawn(async move {
            loop {
                let Ok((socket, addr)) = listener.accept().await else {
                    return;
                };
                tracing::debug!(%addr, "control channel connection");
                tokio::spawn(answer_polls(socket, Arc::clone(&mailbox)));
            }
        });

        Ok(Self {
            port,
            next_session_port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stage `port` as the next session port. Consumed by exactly one poll;
    /// staging again before consumption replaces the pending value.
    pub fn publish(&self, port: u16) {
        *self.next_session_port.lock().unwrap() = Some(port);
    }
}

async fn answer_polls(mut socket: tokio::net::TcpStream, mailbox: Arc<Mutex<Option<u16>>>) {
    let mut buffer = [0u8; 64];
    loop {
        let read_size = match socket.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let request = String::from_utf8_lossy(&buffer[..read_size]);
        if request.trim() != SESSION_PORT_REQUEST {
            tracing::warn!(%request, "unexpected control channel request, ignoring");
            continue;
        }

        let pending = mailbox.lock().unwrap().take();
        let reply = match pending {
            Some(port) => {
                tracing::debug!(port, "handing session port to runtime");
                port.to_string()
            }
            None => {
                tracing::debug!("no session pending, telling runtime to continue");
                NO_SESSION_REPLY.to_string()
            }
        };
        if socket.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}
