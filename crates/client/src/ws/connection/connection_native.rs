//! Native/Desktop WebSocket transport using tokio-tungstenite.

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use kelmah_shared::TransportError;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Transport, TransportEvent, TransportSender};

/// WebSocket transport backed by a tokio task per connection.
///
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct WsTransport {
    /// Frames waiting to be written by the connection task
    outbound: Option<UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, events: TransportSender) -> Result<(), TransportError> {
        self.close();

        let (sender, receiver) = unbounded();
        self.outbound = Some(sender);
        self.task = Some(tokio::spawn(run_connection(url.to_string(), receiver, events)));
        Ok(())
    }

    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(TransportError::NotOpen);
        };
        outbound
            .unbounded_send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn close(&mut self) {
        // Dropping the sender makes the task send a close frame and exit quietly.
        self.outbound = None;
        self.task = None;
    }
}

/// Drive one connection: open, then pump frames both ways until either side
/// closes. A local close (outbound sender dropped) is not reported.
async fn run_connection(
    url: String,
    mut outbound: UnboundedReceiver<String>,
    events: TransportSender,
) {
    let host = url.split('?').next().unwrap_or(&url).to_string();

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                crate::log_error!("WebSocket error for {}: {}", host, e);
                events.emit(TransportEvent::Closed { reason: e.to_string() });
                return;
            }
        },
        _ = wait_until_closed(&mut outbound) => {
            crate::log_debug!("Open to {} abandoned", host);
            return;
        }
    };

    let socket_id = uuid::Uuid::new_v4().to_string();
    crate::log_info!("WebSocket connected to {} ({})", host, socket_id);
    if !events.emit(TransportEvent::Opened { socket_id }) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => {
                            let reason: &str = &f.reason;
                            format!("closed by server ({}) {}", u16::from(f.code), reason)
                        }
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
            frame = outbound.next() => match frame {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        crate::log_error!("Send to {} failed: {}", host, e);
                        break e.to_string();
                    }
                }
                None => {
                    crate::log_info!("Closing WebSocket to {}", host);
                    let _ = write.close().await;
                    return;
                }
            },
        }
    };

    crate::log_info!("WebSocket to {} closed: {}", host, reason);
    events.emit(TransportEvent::Closed { reason });
}

async fn wait_until_closed(outbound: &mut UnboundedReceiver<String>) {
    while outbound.next().await.is_some() {
        crate::log_warn!("Dropping frame queued before the socket opened");
    }
}
