use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{connection::ConnectionManager, state::ConnectionStatus};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a single socket session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Closed,
}

/// Keeps one canvas connection attached to a live WebSocket, reconnecting
/// until the connection is closed.
pub struct SocketDriver {
    url: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    connection: Arc<ConnectionManager>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl SocketDriver {
    pub fn new(
        url: String,
        connect_timeout: Duration,
        reconnect_delay: Duration,
        connection: Arc<ConnectionManager>,
        outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            url,
            connect_timeout,
            reconnect_delay,
            connection,
            outbound,
        }
    }

    #[instrument(skip(self), fields(
        canvas_id = self.connection.canvas_id(),
        connection_id = %Uuid::new_v4(),
    ))]
    pub async fn run(mut self) {
        let mut status = self.connection.subscribe_status();
        let mut attempts: u64 = 0;

        loop {
            if *status.borrow_and_update() == ConnectionStatus::Closed {
                break;
            }

            self.connection.set_status(if attempts == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            });
            attempts += 1;

            let connect = timeout(self.connect_timeout, connect_async(self.url.as_str()));
            let attempt = tokio::select! {
                attempt = connect => attempt,
                _ = wait_closed(&mut status) => break,
            };
            let socket = match attempt {
                Ok(Ok((socket, _response))) => socket,
                Ok(Err(e)) => {
                    warn!("Failed to connect to {} (attempt {}): {}", self.url, attempts, e);
                    if !self.pause(&mut status).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Connecting to {} timed out after {:?} (attempt {})",
                        self.url, self.connect_timeout, attempts
                    );
                    if !self.pause(&mut status).await {
                        break;
                    }
                    continue;
                }
            };

            info!("WebSocket connection established");
            self.discard_stale_frames();

            if let Err(e) = self.connection.on_connected().await {
                debug!("Skipping session: {}", e);
                break;
            }

            match self.pump(socket, &mut status).await {
                SessionEnd::Closed => break,
                SessionEnd::Lost => {
                    self.connection.on_disconnected().await;
                    if !self.pause(&mut status).await {
                        break;
                    }
                }
            }
        }

        info!("Socket driver stopped");
    }

    /// Frames queued for a previous socket reference state the server has
    /// already forgotten.
    fn discard_stale_frames(&mut self) {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Discarded {} frames queued before reconnect", dropped);
        }
    }

    async fn pump(
        &mut self,
        socket: Socket,
        status: &mut watch::Receiver<ConnectionStatus>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let mut message_count: u64 = 0;

        loop {
            tokio::select! {
                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                            warn!("Failed to send frame: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    None => {
                        debug!("Outbound channel closed");
                        let _ = sink.close().await;
                        return SessionEnd::Closed;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Binary(data))) => {
                        message_count += 1;
                        self.connection.handle_message(&data).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(
                            "Ignoring text message: {:?}",
                            text.as_str().chars().take(100).collect::<String>()
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed the connection: {:?}", frame);
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket receive error after {} messages: {}", message_count, e);
                        return SessionEnd::Lost;
                    }
                    None => {
                        info!("WebSocket stream ended after {} messages", message_count);
                        return SessionEnd::Lost;
                    }
                },
                _ = wait_closed(status) => {
                    let _ = sink.close().await;
                    return SessionEnd::Closed;
                }
            }
        }
    }

    /// Sleeps before the next connect attempt. Returns `false` when the
    /// connection was closed meanwhile.
    async fn pause(&self, status: &mut watch::Receiver<ConnectionStatus>) -> bool {
        let base = self.reconnect_delay.as_millis() as u64;
        let jitter = rand::random_range(0..=base / 2);
        let delay = Duration::from_millis(base + jitter);
        debug!("Reconnecting in {:?}", delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_closed(status) => false,
        }
    }
}

async fn wait_closed(status: &mut watch::Receiver<ConnectionStatus>) {
    loop {
        if *status.borrow_and_update() == ConnectionStatus::Closed {
            return;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}
