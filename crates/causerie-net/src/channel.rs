//! Connection channel with tokio mpsc command/notification pattern.
//!
//! The WebSocket event loop runs in a dedicated tokio task. External code
//! communicates with it through typed command and notification channels,
//! keeping the transport fully asynchronous and decoupled. The task owns
//! reconnection: on every successful connect a [`ChannelNotification::Connected`]
//! is delivered, and the session bootstrapper is expected to re-run in full —
//! no event is assumed missed-but-recoverable without a resync.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use causerie_shared::constants::{
    CHANNEL_COMMAND_BUFFER, CHANNEL_NOTIFICATION_BUFFER, DEFAULT_HUB_URL, MUTE_COOLDOWN_SECS,
};
use causerie_shared::protocol::{ClientFrame, HubFrame, CALL_SEND_MESSAGE};

use crate::backoff::Backoff;
use crate::error::ChannelError;
use crate::gate::SendGate;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reply half of an acked emit.
pub type AckReply = oneshot::Sender<Result<Value, ChannelError>>;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the channel task.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Emit a named event and await the hub's acknowledgement.
    Emit {
        event: String,
        payload: Value,
        reply: AckReply,
    },
    /// Gracefully shut down the channel.
    Shutdown,
}

/// Notifications sent *from* the channel task to the engine.
#[derive(Debug, Clone)]
pub enum ChannelNotification {
    /// The transport (re)connected; a full resync must follow.
    Connected,
    /// The transport dropped; the task is already reconnecting.
    Disconnected,
    /// The hub pushed a named event (no ack expected).
    Event { name: String, payload: Value },
}

/// Configuration for spawning the channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Hub WebSocket endpoint.
    pub url: String,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Reconnect delay cap.
    pub max_backoff: Duration,
    /// Local send cooldown after a mute/ban rejection.
    pub mute_cooldown: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_HUB_URL.to_string(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            mute_cooldown: Duration::from_secs(MUTE_COOLDOWN_SECS),
        }
    }
}

/// Spawn the channel task.
///
/// Returns channels for sending commands and receiving notifications. The
/// task connects, reconnects with backoff, correlates acknowledgements by
/// sequence number, and enforces the mute cooldown gate.
pub fn spawn_channel(
    config: ChannelConfig,
) -> (
    mpsc::Sender<ChannelCommand>,
    mpsc::Receiver<ChannelNotification>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ChannelCommand>(CHANNEL_COMMAND_BUFFER);
    let (notif_tx, notif_rx) = mpsc::channel::<ChannelNotification>(CHANNEL_NOTIFICATION_BUFFER);

    tokio::spawn(async move {
        let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        let mut gate = SendGate::new(config.mute_cooldown);

        'outer: loop {
            match connect_async(&config.url).await {
                Ok((ws, _)) => {
                    info!(url = %config.url, "Channel connected");
                    backoff.reset();
                    let _ = notif_tx.send(ChannelNotification::Connected).await;

                    let shutdown =
                        run_connection(ws, &mut cmd_rx, &notif_tx, &mut gate).await;

                    let _ = notif_tx.send(ChannelNotification::Disconnected).await;
                    if shutdown {
                        break 'outer;
                    }
                    info!("Channel disconnected, reconnecting");
                }
                Err(e) => {
                    warn!(url = %config.url, error = %e, "Connect failed");
                }
            }

            // Wait out the backoff. Emits arriving meanwhile are answered
            // immediately so callers never hang on a dead connection.
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
            let deadline = tokio::time::sleep(delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ChannelCommand::Emit { reply, .. }) => {
                            let _ = reply.send(Err(ChannelError::NotConnected));
                        }
                        Some(ChannelCommand::Shutdown) | None => break 'outer,
                    }
                }
            }
        }

        info!("Channel task terminated");
    });

    (cmd_tx, notif_rx)
}

/// Drive one live connection until it drops or a shutdown is requested.
/// Returns true on shutdown.
async fn run_connection(
    ws: WsStream,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
    gate: &mut SendGate,
) -> bool {
    let (mut sink, mut stream): (SplitSink<WsStream, WsMessage>, SplitStream<WsStream>) =
        ws.split();
    let mut pending: HashMap<u64, AckReply> = HashMap::new();
    let mut seq: u64 = 0;

    let shutdown = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Emit { event, payload, reply }) => {
                    // Mute cooldown: message sends short-circuit locally
                    // without contacting the hub.
                    if event == CALL_SEND_MESSAGE && gate.is_blocked(Instant::now()) {
                        debug!("Send gate active, short-circuiting sendMessage");
                        let _ = reply.send(Err(ChannelError::Muted));
                        continue;
                    }

                    seq += 1;
                    let frame = ClientFrame {
                        event: event.clone(),
                        seq: Some(seq),
                        payload,
                    };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            let _ = reply.send(Err(ChannelError::Malformed(e.to_string())));
                            continue;
                        }
                    };

                    pending.insert(seq, reply);
                    debug!(event = %event, seq, "Emitting");
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        error!(event = %event, error = %e, "Send failed");
                        if let Some(reply) = pending.remove(&seq) {
                            let _ = reply.send(Err(ChannelError::Transport(e.to_string())));
                        }
                        break false;
                    }
                }
                Some(ChannelCommand::Shutdown) => {
                    info!("Channel shutdown requested");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break true;
                }
                None => {
                    info!("Command channel closed, shutting down");
                    break true;
                }
            },

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_hub_frame(&text, &mut pending, notif_tx, gate).await;
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = sink.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break false;
                }
            }
        }
    };

    // Calls in flight when the connection dropped cannot be resolved; fail
    // them rather than leaving callers hanging.
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ChannelError::Transport("connection lost".to_string())));
    }

    shutdown
}

async fn handle_hub_frame(
    text: &str,
    pending: &mut HashMap<u64, AckReply>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
    gate: &mut SendGate,
) {
    let frame: HubFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Unparseable hub frame, dropping");
            return;
        }
    };

    match frame {
        HubFrame::Ack { ack, ok, err } => {
            let Some(reply) = pending.remove(&ack) else {
                debug!(ack, "Ack with no pending call, dropping");
                return;
            };
            match err {
                Some(err) => {
                    let mapped = ChannelError::from_hub_error(err);
                    if mapped == ChannelError::Muted {
                        gate.trip(Instant::now());
                    }
                    let _ = reply.send(Err(mapped));
                }
                None => {
                    let _ = reply.send(Ok(ok.unwrap_or(Value::Null)));
                }
            }
        }
        HubFrame::Push { event, payload } => {
            debug!(event = %event, "Hub push received");
            let _ = notif_tx
                .send(ChannelNotification::Event {
                    name: event,
                    payload,
                })
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Emit helpers
// ---------------------------------------------------------------------------

/// Emit a named event and await the hub's acknowledgement.
pub async fn emit(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    event: &str,
    payload: Value,
) -> Result<Value, ChannelError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(ChannelCommand::Emit {
            event: event.to_string(),
            payload,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ChannelError::Closed)?;
    reply_rx.await.map_err(|_| ChannelError::Closed)?
}

/// Typed emit: serialize the request, deserialize the success payload.
pub async fn call<P, R>(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    event: &str,
    payload: &P,
) -> Result<R, ChannelError>
where
    P: serde::Serialize,
    R: serde::de::DeserializeOwned,
{
    let payload =
        serde_json::to_value(payload).map_err(|e| ChannelError::Malformed(e.to_string()))?;
    let response = emit(cmd_tx, event, payload).await?;
    serde_json::from_value(response)
        .map_err(|e| ChannelError::Malformed(format!("response for {event}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use causerie_shared::constants::ERR_SENDER_MUTED;
    use serde_json::json;

    fn test_config(port: u16) -> ChannelConfig {
        ChannelConfig {
            url: format!("ws://127.0.0.1:{port}/hub"),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            mute_cooldown: Duration::from_secs(60),
        }
    }

    /// Minimal in-process hub: acks every frame via `respond`, counts frames.
    async fn spawn_hub<F>(respond: F) -> (u16, Arc<AtomicUsize>)
    where
        F: Fn(ClientFrame) -> Value + Send + Sync + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if let WsMessage::Text(text) = msg {
                        let frame: ClientFrame = serde_json::from_str(&text).unwrap();
                        counter.fetch_add(1, Ordering::SeqCst);
                        let ack = respond(frame);
                        if ws.send(WsMessage::Text(ack.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (port, received)
    }

    async fn await_connected(notif_rx: &mut mpsc::Receiver<ChannelNotification>) {
        loop {
            match notif_rx.recv().await {
                Some(ChannelNotification::Connected) => return,
                Some(_) => continue,
                None => panic!("channel task died before connecting"),
            }
        }
    }

    #[tokio::test]
    async fn test_emit_round_trip() {
        let (port, _) = spawn_hub(|frame| {
            json!({"ack": frame.seq.unwrap(), "ok": {"echo": frame.event}})
        })
        .await;

        let (cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        let response = emit(&cmd_tx, "sendTypingIndicator", json!({"to": "f1"}))
            .await
            .unwrap();
        assert_eq!(response["echo"], "sendTypingIndicator");
    }

    #[tokio::test]
    async fn test_hub_rejection_surfaces_error_string() {
        let (port, _) = spawn_hub(|frame| {
            json!({"ack": frame.seq.unwrap(), "err": "no such group"})
        })
        .await;

        let (cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        let err = emit(&cmd_tx, CALL_SEND_MESSAGE, json!({})).await.unwrap_err();
        assert_eq!(err, ChannelError::Rejected("no such group".to_string()));
    }

    #[tokio::test]
    async fn test_mute_sentinel_short_circuits_further_sends() {
        let (port, received) = spawn_hub(|frame| {
            json!({"ack": frame.seq.unwrap(), "err": ERR_SENDER_MUTED})
        })
        .await;

        let (cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        let first = emit(&cmd_tx, CALL_SEND_MESSAGE, json!({"content": "a"})).await;
        assert_eq!(first.unwrap_err(), ChannelError::Muted);

        // Second send never reaches the hub.
        let second = emit(&cmd_tx, CALL_SEND_MESSAGE, json!({"content": "b"})).await;
        assert_eq!(second.unwrap_err(), ChannelError::Muted);
        assert_eq!(received.load(Ordering::SeqCst), 1);

        // Non-send calls still go through while muted.
        let history = emit(&cmd_tx, "getLinkmanHistoryMessages", json!({})).await;
        assert_eq!(history.unwrap_err(), ChannelError::Muted);
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_push_events_are_forwarded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let push = json!({"event": "typing", "payload": {"linkmanId": "f1"}});
            ws.send(WsMessage::Text(push.to_string())).await.unwrap();
            // Keep the connection open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let (_cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        match notif_rx.recv().await.unwrap() {
            ChannelNotification::Event { name, payload } => {
                assert_eq!(name, "typing");
                assert_eq!(payload["linkmanId"], "f1");
            }
            other => panic!("expected push event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_drop() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            // First connection: accept and immediately drop.
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);

            // Second connection: stay up.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (_cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        match notif_rx.recv().await.unwrap() {
            ChannelNotification::Disconnected => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
        await_connected(&mut notif_rx).await;
    }

    #[tokio::test]
    async fn test_pending_calls_fail_on_disconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Read the frame but close without acking.
            let _ = ws.next().await;
            drop(ws);
            // Accept the reconnect so the task stays healthy.
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                while ws.next().await.is_some() {}
            }
        });

        let (cmd_tx, mut notif_rx) = spawn_channel(test_config(port));
        await_connected(&mut notif_rx).await;

        let err = emit(&cmd_tx, CALL_SEND_MESSAGE, json!({})).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}
