//! TCP transport between cluster peers.
//!
//! Frames are length-delimited bincode messages. Each node accepts inbound
//! connections from any peer and keeps one outbound connection per peer,
//! reconnecting with a short delay whenever a write fails. Delivery is
//! best-effort: undeliverable messages are dropped and the protocol's own
//! retransmission (heartbeats, replication retries) recovers.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::{decode_message, encode_message, RaftMessage};

/// Upper bound on a single frame; snapshots are the largest payload.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Per-peer outbound queue depth before messages are dropped.
const OUTBOUND_QUEUE: usize = 256;

const RECONNECT_DELAY: Duration = Duration::from_millis(250);

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

/// Handle for sending messages to peers. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Transport {
    outbound: HashMap<String, mpsc::Sender<RaftMessage>>,
}

impl Transport {
    /// Binds the listener and spawns the accept loop plus one writer task
    /// per remote peer. Fails only if the bind itself fails.
    pub(crate) async fn start(
        bind_addr: &str,
        node_id: &str,
        peers: &[String],
        inbound: mpsc::Sender<RaftMessage>,
        cancel: CancellationToken,
    ) -> io::Result<Transport> {
        let listener = TcpListener::bind(bind_addr).await?;
        debug!(%bind_addr, "cluster transport listening");

        tokio::spawn(accept_loop(listener, inbound, cancel.clone()));

        let mut outbound = HashMap::new();
        for peer in peers {
            if peer == node_id {
                continue;
            }
            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
            tokio::spawn(peer_writer(peer.clone(), rx, cancel.clone()));
            outbound.insert(peer.clone(), tx);
        }

        Ok(Transport { outbound })
    }

    /// Queues a message for `target`; drops it if the peer is unknown or its
    /// queue is full.
    pub(crate) fn send(&self, target: &str, message: RaftMessage) {
        match self.outbound.get(target) {
            Some(tx) => {
                if tx.try_send(message).is_err() {
                    debug!(peer = target, "outbound queue unavailable, dropping message");
                }
            }
            None => debug!(peer = target, "no route to peer, dropping message"),
        }
    }

}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<RaftMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "inbound peer connection");
                    stream.set_nodelay(true).ok();
                    tokio::spawn(read_connection(stream, inbound.clone(), cancel.clone()));
                }
                Err(error) => {
                    warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn read_connection(
    stream: TcpStream,
    inbound: mpsc::Sender<RaftMessage>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(stream, codec());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = frames.next() => match frame {
                None => return,
                Some(Err(error)) => {
                    debug!(%error, "peer read failed, closing connection");
                    return;
                }
                Some(Ok(bytes)) => match decode_message(&bytes) {
                    Ok(message) => {
                        if inbound.send(message).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "dropping undecodable peer frame");
                        return;
                    }
                }
            }
        }
    }
}

async fn peer_writer(
    peer: String,
    mut queue: mpsc::Receiver<RaftMessage>,
    cancel: CancellationToken,
) {
    'reconnect: loop {
        let stream = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                connected = TcpStream::connect(&peer) => match connected {
                    Ok(stream) => break stream,
                    Err(error) => {
                        debug!(peer = %peer, %error, "connect failed, retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        };

        debug!(peer = %peer, "outbound peer connection established");
        stream.set_nodelay(true).ok();
        let mut sink = FramedWrite::new(stream, codec());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                message = queue.recv() => match message {
                    None => return,
                    Some(message) => {
                        let frame = match encode_message(&message) {
                            Ok(frame) => frame,
                            Err(error) => {
                                warn!(%error, "failed to encode outbound message");
                                continue;
                            }
                        };
                        if let Err(error) = sink.send(Bytes::from(frame)).await {
                            debug!(peer = %peer, %error, "peer write failed, reconnecting");
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}
