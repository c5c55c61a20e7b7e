//! Socket runtime.
//!
//! Drives a [`SessionMachine`] over a real WebSocket: dials the resolved
//! host URL, pumps frames and engine events through the machine, and loops
//! through the reconnect policy until the session is deliberately closed or
//! the policy gives up.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hostlink_core::RequestMessage;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::device::MediaDevice;
use crate::engine::EngineHandle;
use crate::error::{ConfigError, TransportError};
use crate::session::{SessionConfig, SessionMachine, Signaling};
use crate::store::SharedStore;

/// Handle to a running session. Dropping it while [`run_session`] is live is
/// prevented by the borrow; calling [`SessionHandle::disconnect`] tears the
/// session down cleanly.
#[derive(Debug)]
pub struct SessionHandle {
    shutdown: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<RequestMessage>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            shutdown: watch::channel(false).0,
            outbound: Mutex::new(None),
        }
    }

    /// Leave the space, close the socket, schedule no reconnect.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Best-effort send on the current connection. Dropped silently while
    /// no socket is open.
    pub fn send(&self, message: RequestMessage) {
        if let Ok(slot) = self.outbound.lock()
            && let Some(tx) = slot.as_ref()
        {
            let _ = tx.send(message);
        }
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<RequestMessage>>) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = tx;
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound messages go through a channel drained by the socket loop, so a
/// send while the socket is closed is silently dropped.
struct ChannelSignaling {
    tx: mpsc::UnboundedSender<RequestMessage>,
}

impl Signaling for ChannelSignaling {
    fn send(&self, message: RequestMessage) {
        let _ = self.tx.send(message);
    }
}

/// Signaling for teardown paths where no socket exists; the leave request
/// is dropped, as any send on a non-open socket is.
struct NullSignaling;

impl Signaling for NullSignaling {
    fn send(&self, _message: RequestMessage) {}
}

enum Exit {
    Shutdown,
    Closed,
}

/// Connect to the host and run the session until deliberate teardown or
/// until the reconnect policy gives up. Config problems surface before any
/// socket is opened; everything else is handled internally.
pub async fn run_session<D: MediaDevice>(
    config: SessionConfig,
    store: SharedStore,
    device: D,
    mut engine: EngineHandle,
    handle: &SessionHandle,
) -> Result<(), ConfigError> {
    let mut machine = SessionMachine::new(config, store, device);
    let mut shutdown = handle.watch();

    loop {
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let url = machine.connect().await?;
        debug!(%url, "dialing host");

        let exit = match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                drive_socket(&mut machine, socket, &mut engine, &mut shutdown, handle).await
            }
            Err(err) => {
                warn!("{}", TransportError::Connect(err));
                Exit::Closed
            }
        };
        handle.set_outbound(None);

        match exit {
            Exit::Shutdown => return Ok(()),
            Exit::Closed => {
                let Some(delay) = machine.on_close().await else {
                    info!("reconnect policy exhausted, giving up");
                    return Ok(());
                };
                if delay > Duration::ZERO {
                    debug!(?delay, attempt = machine.reconnect_attempts(), "reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            machine.disconnect(&NullSignaling).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

async fn drive_socket<D: MediaDevice>(
    machine: &mut SessionMachine<D>,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    engine: &mut EngineHandle,
    shutdown: &mut watch::Receiver<bool>,
    handle: &SessionHandle,
) -> Exit {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let signaling = ChannelSignaling { tx: out_tx.clone() };
    handle.set_outbound(Some(out_tx));

    machine.on_open(&signaling, engine.audio.as_ref()).await;

    let mut grounded_open = true;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                machine.disconnect(&signaling).await;
                // Flush the leave message before closing.
                while let Ok(message) = out_rx.try_recv() {
                    if let Ok(text) = serde_json::to_string(&message) {
                        let _ = sink.send(Message::Text(text.into())).await;
                    }
                }
                let _ = sink.close().await;
                return Exit::Shutdown;
            }

            Some(message) = out_rx.recv() => {
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    // Socket is gone; the close surfaces on the stream side.
                    continue;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let raw: Value = match serde_json::from_str(&text) {
                            Ok(raw) => raw,
                            Err(err) => {
                                warn!("discarding unparseable frame: {err}");
                                continue;
                            }
                        };
                        if let Err(err) = machine.on_message(raw, &signaling).await {
                            warn!("negotiation failed: {err}");
                            let _ = sink.close().await;
                            return Exit::Closed;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("host closed the connection");
                        return Exit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("{}", TransportError::Socket(err));
                        return Exit::Closed;
                    }
                }
            }

            event = engine.grounded.recv(), if grounded_open => {
                match event {
                    Some(data) => signaling.send(RequestMessage::SetGrounded(data)),
                    None => grounded_open = false,
                }
            }
        }
    }
}
