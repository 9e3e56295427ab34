//! Per-player socket tasks
//!
//! Each connection is split into a reader task that decodes frames into a
//! bounded inbound channel and a writer task that drains an outbound
//! channel. The simulation only ever touches the two channels.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_nanos;

use super::codec::{read_message, write_message};
use super::protocol::{AcceptConnectionMessage, MessageBody, MessageTransport};
use super::ProtocolError;

/// Player ids are handed out from here upward.
pub const FIRST_PLAYER_ID: u32 = 100_000;

/// Smallest inbound channel capacity accepted.
pub const MIN_IN_CHANNEL_CAPACITY: usize = 100;

/// What a reader task delivers to the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(MessageTransport),
    /// The socket closed or failed; nothing follows.
    Disconnected,
}

/// The simulation's side of one connection.
#[derive(Debug)]
pub struct PlayerLink {
    pub player_id: u32,
    pub inbound: mpsc::Receiver<Inbound>,
    pub outbound: mpsc::UnboundedSender<MessageTransport>,
}

impl PlayerLink {
    /// A link backed by plain channels, for driving the simulation without
    /// sockets. Returns the link plus the remote ends.
    pub fn detached(
        player_id: u32,
        capacity: usize,
    ) -> (Self, mpsc::Sender<Inbound>, mpsc::UnboundedReceiver<MessageTransport>) {
        let (in_tx, in_rx) = mpsc::channel(capacity.max(MIN_IN_CHANNEL_CAPACITY));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                player_id,
                inbound: in_rx,
                outbound: out_tx,
            },
            in_tx,
            out_rx,
        )
    }

    /// Queue a message for the writer. Returns false once the writer is gone.
    pub fn send(&self, message: MessageTransport) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// Settings for reader tasks.
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub in_channel_capacity: usize,
    /// Inbound messages per second before excess is dropped.
    pub rate_limit: u32,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            in_channel_capacity: 256,
            rate_limit: 120,
        }
    }
}

/// Spawn reader and writer tasks over `stream`.
pub fn spawn_link<S>(player_id: u32, stream: S, options: LinkOptions) -> PlayerLink
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (in_tx, in_rx) = mpsc::channel(options.in_channel_capacity.max(MIN_IN_CHANNEL_CAPACITY));
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_reader(player_id, read_half, in_tx, PlayerRateLimiter::new(options.rate_limit)));
    tokio::spawn(run_writer(player_id, write_half, out_rx));

    PlayerLink {
        player_id,
        inbound: in_rx,
        outbound: out_tx,
    }
}

async fn run_reader<R>(player_id: u32, mut reader: R, in_tx: mpsc::Sender<Inbound>, limiter: PlayerRateLimiter)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match read_message(&mut reader, &mut buf).await {
            Ok(Some(message)) => {
                if !limiter.check_message() {
                    warn!(player_id, message_type = ?message.message_type, "Rate limited inbound message");
                    continue;
                }
                if in_tx.send(Inbound::Message(message)).await.is_err() {
                    debug!(player_id, "Inbound channel closed");
                    return;
                }
            }
            Ok(None) => {
                info!(player_id, "Connection closed by peer");
                break;
            }
            Err(e @ (ProtocolError::Json(_) | ProtocolError::TypeMismatch { .. })) => {
                warn!(player_id, error = %e, "Dropped invalid message");
            }
            Err(e) => {
                warn!(player_id, error = %e, "Connection read failed");
                break;
            }
        }
    }
    let _ = in_tx.send(Inbound::Disconnected).await;
}

async fn run_writer<W>(player_id: u32, mut writer: W, mut out_rx: mpsc::UnboundedReceiver<MessageTransport>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            debug!(player_id, error = %e, "Connection write failed");
            break;
        }
    }
    debug!(player_id, "Writer finished");
}

/// Accept sockets forever, greeting each with `AcceptConnection` and
/// handing its link to the simulation. Returns when the simulation side
/// hangs up.
pub async fn accept_loop(listener: TcpListener, links: mpsc::UnboundedSender<PlayerLink>, options: LinkOptions) {
    let mut next_player_id = FIRST_PLAYER_ID;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }
        let player_id = next_player_id;
        next_player_id += 1;
        info!(player_id, addr = %addr, "Accepted connection");

        let link = spawn_link(player_id, stream, options);
        link.send(MessageTransport::new(
            0,
            0,
            unix_nanos(),
            MessageBody::AcceptConnection(AcceptConnectionMessage { player_id }),
        ));
        if links.send(link).is_err() {
            debug!("Simulation stopped accepting links");
            return;
        }
    }
}

/// Connect to a server within `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ProtocolError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::{read_message, write_message};
    use crate::net::protocol::{PingMessage, RpcMessage};

    #[tokio::test]
    async fn messages_flow_both_ways_and_close_is_reported() {
        let (server_side, mut client_side) = tokio::io::duplex(64 * 1024);
        let mut link = spawn_link(FIRST_PLAYER_ID, server_side, LinkOptions::default());

        let rpc = MessageTransport::new(
            FIRST_PLAYER_ID,
            3,
            0,
            MessageBody::Rpc(RpcMessage {
                command: "respawn".into(),
            }),
        );
        write_message(&mut client_side, &rpc).await.unwrap();
        assert_eq!(link.inbound.recv().await, Some(Inbound::Message(rpc)));

        let ping = MessageTransport::new(0, 4, 0, MessageBody::Ping(PingMessage { unix_time_ns: 9 }));
        assert!(link.send(ping.clone()));
        let mut buf = BytesMut::new();
        assert_eq!(read_message(&mut client_side, &mut buf).await.unwrap(), Some(ping));

        drop(client_side);
        assert_eq!(link.inbound.recv().await, Some(Inbound::Disconnected));
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_the_connection_stays_open() {
        use tokio::io::AsyncWriteExt;

        let (server_side, mut client_side) = tokio::io::duplex(64 * 1024);
        let mut link = spawn_link(FIRST_PLAYER_ID, server_side, LinkOptions::default());

        let garbage = b"{not json";
        client_side.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        client_side.write_all(garbage).await.unwrap();

        let ping = MessageTransport::new(FIRST_PLAYER_ID, 2, 0, MessageBody::Ping(PingMessage { unix_time_ns: 1 }));
        write_message(&mut client_side, &ping).await.unwrap();
        assert_eq!(link.inbound.recv().await, Some(Inbound::Message(ping)));

        drop(client_side);
        assert_eq!(link.inbound.recv().await, Some(Inbound::Disconnected));
    }

    #[tokio::test]
    async fn excess_messages_are_dropped_by_the_rate_limiter() {
        let (server_side, mut client_side) = tokio::io::duplex(256 * 1024);
        let options = LinkOptions {
            in_channel_capacity: 100,
            rate_limit: 5,
        };
        let mut link = spawn_link(FIRST_PLAYER_ID, server_side, options);
        for i in 0..20 {
            let msg = MessageTransport::new(FIRST_PLAYER_ID, i, 0, MessageBody::Ping(PingMessage { unix_time_ns: 0 }));
            write_message(&mut client_side, &msg).await.unwrap();
        }
        drop(client_side);

        let mut delivered = 0;
        while let Some(Inbound::Message(_)) = link.inbound.recv().await {
            delivered += 1;
        }
        assert!(delivered < 20, "delivered {delivered}");
        assert!(delivered >= 1);
    }

    #[tokio::test]
    async fn accept_loop_greets_with_player_ids() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, tx, LinkOptions::default()));

        let mut first = connect(addr, Duration::from_secs(5)).await.unwrap();
        let mut second = connect(addr, Duration::from_secs(5)).await.unwrap();
        assert_eq!(rx.recv().await.map(|l| l.player_id), Some(FIRST_PLAYER_ID));
        assert_eq!(rx.recv().await.map(|l| l.player_id), Some(FIRST_PLAYER_ID + 1));

        let mut buf = BytesMut::new();
        let greeting = read_message(&mut first, &mut buf).await.unwrap().unwrap();
        assert_eq!(
            greeting.body,
            MessageBody::AcceptConnection(AcceptConnectionMessage {
                player_id: FIRST_PLAYER_ID
            })
        );
        let mut buf = BytesMut::new();
        let greeting = read_message(&mut second, &mut buf).await.unwrap().unwrap();
        assert_eq!(
            greeting.body,
            MessageBody::AcceptConnection(AcceptConnectionMessage {
                player_id: FIRST_PLAYER_ID + 1
            })
        );
    }
}
