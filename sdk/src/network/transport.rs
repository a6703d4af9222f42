use std::time::Duration;

use async_channel::{unbounded, Receiver, Sender};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::SdkError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cloneable handle that queues frames for the socket's single writer task.
/// Every producer (heartbeat, handshake steps, commands) goes through here,
/// so frames are never interleaved on the wire.
#[derive(Clone)]
pub(crate) struct FrameSender {
    send_tx: Sender<Message>,
}

impl FrameSender {
    pub(crate) fn new(send_tx: Sender<Message>) -> Self {
        Self { send_tx }
    }

    pub(crate) async fn send_text(&self, text: String) -> Result<(), SdkError> {
        self.send_tx
            .send(Message::text(text))
            .await
            .map_err(|_| SdkError::Disconnected)
    }

    /// Queue without suspending. The queue is unbounded, so this only fails
    /// once the writer has stopped.
    pub(crate) fn queue_text(&self, text: String) -> Result<(), SdkError> {
        self.send_tx
            .try_send(Message::text(text))
            .map_err(|_| SdkError::Disconnected)
    }
}

/// Read half of a session socket. Exactly one task owns it at a time.
pub(crate) struct FrameReader {
    label: &'static str,
    stream: SplitStream<WsStream>,
}

impl FrameReader {
    /// Next text frame; ping/pong/binary frames are skipped.
    pub(crate) async fn next_text(&mut self) -> Result<String, SdkError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!("[{}] Received {} bytes", self.label, text.len());
                    return Ok(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("[{}] Closed by peer: {:?}", self.label, frame);
                    return Err(SdkError::Disconnected);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(SdkError::Disconnected),
            }
        }
    }

    /// Next text frame for a handshake step that must complete by `deadline`.
    pub(crate) async fn next_text_until(
        &mut self,
        deadline: Instant,
        step: &'static str,
    ) -> Result<String, SdkError> {
        tokio::time::timeout_at(deadline, self.next_text())
            .await
            .map_err(|_| SdkError::HandshakeTimeout(step))?
    }
}

/// Open a websocket and spawn its writer task. Cancelling `cancel` makes the
/// writer send a single Close frame and shut the socket.
pub(crate) async fn connect(
    label: &'static str,
    url: &str,
    connect_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(FrameSender, FrameReader), SdkError> {
    debug!("[{}] Connecting to {}", label, url);
    let (stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| SdkError::HandshakeTimeout("websocket connect"))??;

    debug!("[{}] Connected to {}", label, url);

    let (sink, stream) = stream.split();
    let (send_tx, send_rx) = unbounded();
    spawn_writer(label, sink, send_rx, cancel);

    Ok((FrameSender::new(send_tx), FrameReader { label, stream }))
}

fn spawn_writer(
    label: &'static str,
    mut sink: SplitSink<WsStream, Message>,
    send_rx: Receiver<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                result = send_rx.recv() => {
                    let Ok(message) = result else {
                        // Every sender is gone
                        break;
                    };
                    if let Err(e) = sink.send(message).await {
                        error!("[{}] Write error: {}", label, e);
                        cancel.cancel();
                        return;
                    }
                }
            }
        }

        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("[{}] Close frame not sent: {}", label, e);
        }
        let _ = sink.close().await;
        debug!("[{}] Writer stopped", label);
    });
}
