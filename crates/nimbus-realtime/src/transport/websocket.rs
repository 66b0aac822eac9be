//! WebSocket transport over `tokio-tungstenite`.
//!
//! The stream is split into a writer task fed by an unbounded queue and a
//! reader task that forwards text frames to the inbound channel. Pings are
//! answered by tungstenite itself; binary frames are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nimbus_core::{RealtimeError, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{ChannelConnector, ChannelSink, Duplex, InboundFrame, ReadyState, TransportError};

/// Connects to a real-time endpoint over WebSocket.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    inbound_buffer: usize,
}

impl WebSocketConnector {
    /// Connector whose inbound queue holds up to `inbound_buffer` frames.
    pub fn new(inbound_buffer: usize) -> Self {
        Self {
            inbound_buffer: inbound_buffer.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        debug!("websocket connected");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let state = Arc::new(RwLock::new(ReadyState::Open));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::channel::<InboundFrame>(self.inbound_buffer);

        let writer_state = Arc::clone(&state);
        drop(tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(error) = ws_tx.send(msg).await {
                    warn!(%error, "websocket write failed");
                    *writer_state.write() = ReadyState::Closed;
                    break;
                }
                if closing {
                    break;
                }
            }
        }));

        let reader_state = Arc::clone(&state);
        drop(tokio::spawn(async move {
            let closed = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(InboundFrame::Text(text.to_string())).await.is_err() {
                            // nobody is listening any more
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break InboundFrame::Closed {
                            clean: true,
                            reason: frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        break InboundFrame::Closed {
                            clean: false,
                            reason: Some(error.to_string()),
                        };
                    }
                    None => {
                        break InboundFrame::Closed {
                            clean: false,
                            reason: None,
                        };
                    }
                }
            };
            *reader_state.write() = ReadyState::Closed;
            let _ = in_tx.send(closed).await;
        }));

        Ok(Duplex {
            sink: Arc::new(WebSocketSink { out_tx, state }),
            inbound: in_rx,
        })
    }
}

struct WebSocketSink {
    out_tx: mpsc::UnboundedSender<Message>,
    state: Arc<RwLock<ReadyState>>,
}

impl ChannelSink for WebSocketSink {
    fn ready_state(&self) -> ReadyState {
        *self.state.read()
    }

    fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.out_tx.send(Message::Text(text.into())).map_err(|_| {
            *self.state.write() = ReadyState::Closed;
            TransportError::Io("websocket writer stopped".into())
        })
    }

    fn close(&self) {
        let mut state = self.state.write();
        if *state == ReadyState::Open {
            *state = ReadyState::Closing;
            let _ = self.out_tx.send(Message::Close(None));
        }
    }
}
