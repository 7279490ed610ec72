use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    canvas::ChunkCoord,
    error::{ClientError, Result},
    protocol::{ClientFrame, PixelUpdate, PlacementVerdict, ServerFrame, decode_server_frame},
    state::{ConnectionState, ConnectionStatus},
};

/// Largest offset that fits the three offset bytes of a pixel frame.
const MAX_OFFSET: u32 = 0x00FF_FFFF;

/// Pixel change as received on one canvas connection, still chunk-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativePixelChange {
    pub canvas_id: u8,
    pub update: PixelUpdate,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    pub ready: Duration,
    pub verdict: Duration,
}

/// Protocol state machine for one canvas.
///
/// Outbound frames are pushed into `outbound`; whatever owns the receiving
/// end (normally the socket driver) writes them to the wire and reports
/// connects, disconnects and inbound frames back through
/// [`on_connected`](Self::on_connected),
/// [`on_disconnected`](Self::on_disconnected) and
/// [`handle_message`](Self::handle_message).
pub struct ConnectionManager {
    canvas_id: u8,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    changes: mpsc::UnboundedSender<RelativePixelChange>,
    timeouts: ConnectionTimeouts,
}

impl ConnectionManager {
    pub fn new(
        canvas_id: u8,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        changes: mpsc::UnboundedSender<RelativePixelChange>,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self {
            canvas_id,
            state: ConnectionState::new(),
            outbound,
            changes,
            timeouts,
        }
    }

    pub fn canvas_id(&self) -> u8 {
        self.canvas_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        if self.state.transition(status) {
            debug!(canvas_id = self.canvas_id, "Connection status: {:?}", status);
        }
    }

    pub async fn tracked_chunks(&self) -> HashSet<ChunkCoord> {
        self.state.tracked.lock().await.clone()
    }

    /// Announces the canvas on a fresh socket, re-subscribes every tracked
    /// chunk and marks the connection ready.
    #[instrument(skip(self), fields(canvas_id = self.canvas_id))]
    pub async fn on_connected(&self) -> Result<()> {
        if self.status() == ConnectionStatus::Closed {
            return Err(ClientError::ConnectionClosed);
        }

        self.send(ClientFrame::RegisterCanvas(self.canvas_id))?;
        let tracked = self.state.tracked.lock().await;
        for chunk in tracked.iter() {
            self.send(ClientFrame::RegisterChunk(*chunk))?;
        }

        self.set_status(ConnectionStatus::Ready);
        info!("Canvas registered, {} chunks re-subscribed", tracked.len());
        Ok(())
    }

    /// Marks the socket as lost. A placement still waiting for its verdict
    /// fails with [`ClientError::Disconnected`].
    pub async fn on_disconnected(&self) {
        self.set_status(ConnectionStatus::Reconnecting);
        if self.state.pending.lock().await.take().is_some() {
            warn!(
                canvas_id = self.canvas_id,
                "Dropping in-flight placement after disconnect"
            );
        }
    }

    pub async fn close(&self) {
        self.set_status(ConnectionStatus::Closed);
        self.state.pending.lock().await.take();
    }

    /// Waits until the socket is ready, bounded by the ready timeout.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.state.status.subscribe();
        let wait = async {
            loop {
                let current = *status.borrow_and_update();
                match current {
                    ConnectionStatus::Ready => return Ok(()),
                    ConnectionStatus::Closed => return Err(ClientError::ConnectionClosed),
                    _ => {}
                }
                if status.changed().await.is_err() {
                    return Err(ClientError::ConnectionClosed);
                }
            }
        };

        timeout(self.timeouts.ready, wait)
            .await
            .map_err(|_| ClientError::ReadyTimeout {
                duration: self.timeouts.ready,
            })?
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        trace!(canvas_id = self.canvas_id, "Queueing {:?}", frame);
        self.outbound
            .send(frame.encode())
            .map_err(|_| ClientError::ConnectionClosed)
    }

    pub async fn register_chunk(&self, chunk: ChunkCoord) -> Result<()> {
        self.wait_ready().await?;
        let mut tracked = self.state.tracked.lock().await;
        self.send(ClientFrame::RegisterChunk(chunk))?;
        tracked.insert(chunk);
        Ok(())
    }

    pub async fn deregister_chunk(&self, chunk: ChunkCoord) -> Result<()> {
        self.wait_ready().await?;
        let mut tracked = self.state.tracked.lock().await;
        self.send(ClientFrame::DeRegisterChunk(chunk))?;
        tracked.remove(&chunk);
        Ok(())
    }

    /// Replaces the subscription set, sending only the difference.
    #[instrument(skip(self, chunks), fields(canvas_id = self.canvas_id, count = chunks.len()))]
    pub async fn set_tracked_chunks(&self, chunks: HashSet<ChunkCoord>) -> Result<()> {
        self.wait_ready().await?;
        let mut tracked = self.state.tracked.lock().await;

        let removed: Vec<ChunkCoord> = tracked.difference(&chunks).copied().collect();
        let added: Vec<ChunkCoord> = chunks.difference(&tracked).copied().collect();

        for chunk in &removed {
            self.send(ClientFrame::DeRegisterChunk(*chunk))?;
            tracked.remove(chunk);
        }
        for chunk in &added {
            self.send(ClientFrame::RegisterChunk(*chunk))?;
            tracked.insert(*chunk);
        }

        debug!(
            "Tracked chunks updated: {} removed, {} added",
            removed.len(),
            added.len()
        );
        Ok(())
    }

    /// Sends a placement and waits for the server's verdict.
    ///
    /// The protocol carries no correlation id, so placements on one canvas
    /// are serialized: the next verdict frame always belongs to the single
    /// placement in flight.
    #[instrument(skip(self), fields(canvas_id = self.canvas_id))]
    pub async fn place(
        &self,
        chunk: ChunkCoord,
        offset: u32,
        color: u8,
    ) -> Result<PlacementVerdict> {
        if offset > MAX_OFFSET {
            return Err(ClientError::InvalidArgument(format!(
                "chunk offset {offset} does not fit in three bytes"
            )));
        }

        let _serial = self.state.placement.lock().await;
        self.wait_ready().await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.state.pending.lock().await;
            // A socket lost since `wait_ready` will never empty this slot.
            match self.status() {
                ConnectionStatus::Ready => *pending = Some(tx),
                ConnectionStatus::Closed => return Err(ClientError::ConnectionClosed),
                _ => return Err(ClientError::Disconnected),
            }
        }

        let frame = ClientFrame::PlacePixel(PixelUpdate::new(chunk, offset, color));
        if let Err(e) = self.send(frame) {
            self.state.pending.lock().await.take();
            return Err(e);
        }

        match timeout(self.timeouts.verdict, rx).await {
            Ok(Ok(verdict)) => {
                debug!("Placement verdict: {:?}", verdict);
                Ok(verdict)
            }
            Ok(Err(_)) if self.status() == ConnectionStatus::Closed => {
                Err(ClientError::ConnectionClosed)
            }
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.state.pending.lock().await.take();
                warn!("No verdict after {:?}", self.timeouts.verdict);
                Err(ClientError::VerdictTimeout {
                    duration: self.timeouts.verdict,
                })
            }
        }
    }

    /// Dispatches one inbound binary frame. Frames that cannot be decoded
    /// are dropped.
    pub async fn handle_message(&self, data: &[u8]) {
        let frame = match decode_server_frame(data) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!(
                    canvas_id = self.canvas_id,
                    "Ignoring frame with opcode {:#04x}",
                    data[0]
                );
                return;
            }
            Err(e) => {
                debug!(
                    canvas_id = self.canvas_id,
                    "Dropping malformed frame ({} bytes): {}",
                    data.len(),
                    e
                );
                return;
            }
        };

        match frame {
            ServerFrame::PixelChanged(update) => {
                let change = RelativePixelChange {
                    canvas_id: self.canvas_id,
                    update,
                };
                if self.changes.send(change).is_err() {
                    trace!("No listener for pixel changes");
                }
            }
            ServerFrame::PlacementVerdict(verdict) => {
                match self.state.pending.lock().await.take() {
                    Some(pending) => {
                        if pending.send(verdict).is_err() {
                            debug!("Placement caller went away before its verdict");
                        }
                    }
                    None => debug!(
                        canvas_id = self.canvas_id,
                        "Dropping verdict with no pending placement: {:?}", verdict
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::protocol::ReturnCode;

    struct Harness {
        manager: Arc<ConnectionManager>,
        outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        changes: mpsc::UnboundedReceiver<RelativePixelChange>,
    }

    fn harness(ready: Duration, verdict: Duration) -> Harness {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (changes_tx, changes) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            4,
            outbound_tx,
            changes_tx,
            ConnectionTimeouts { ready, verdict },
        );
        Harness {
            manager: Arc::new(manager),
            outbound,
            changes,
        }
    }

    fn default_harness() -> Harness {
        harness(Duration::from_secs(5), Duration::from_secs(5))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn chunk_set(chunks: &[(u8, u8)]) -> HashSet<ChunkCoord> {
        chunks.iter().map(|&(x, y)| ChunkCoord::new(x, y)).collect()
    }

    #[tokio::test]
    async fn connect_announces_canvas_then_ready() {
        let mut h = default_harness();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);

        h.manager.on_connected().await.unwrap();

        assert_eq!(drain(&mut h.outbound), vec![vec![0xA0, 4]]);
        assert_eq!(h.manager.status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn tracked_chunks_diff() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        drain(&mut h.outbound);

        let a = chunk_set(&[(0, 0), (0, 1), (1, 0)]);
        let b = chunk_set(&[(0, 1), (1, 0), (1, 1), (2, 2)]);

        h.manager.set_tracked_chunks(a.clone()).await.unwrap();
        let mut first = drain(&mut h.outbound);
        first.sort();
        assert_eq!(first, vec![vec![0xA1, 0, 0], vec![0xA1, 0, 1], vec![0xA1, 1, 0]]);

        h.manager.set_tracked_chunks(b.clone()).await.unwrap();
        let mut second = drain(&mut h.outbound);
        second.sort();
        assert_eq!(
            second,
            vec![vec![0xA1, 1, 1], vec![0xA1, 2, 2], vec![0xA2, 0, 0]]
        );
        assert_eq!(h.manager.tracked_chunks().await, b);

        // same set again sends nothing
        h.manager.set_tracked_chunks(b).await.unwrap();
        assert!(drain(&mut h.outbound).is_empty());
    }

    #[tokio::test]
    async fn reconnect_resubscribes_tracked_chunks() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        h.manager
            .set_tracked_chunks(chunk_set(&[(3, 3)]))
            .await
            .unwrap();
        h.manager.register_chunk(ChunkCoord::new(5, 6)).await.unwrap();
        drain(&mut h.outbound);

        h.manager.on_disconnected().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Reconnecting);

        h.manager.on_connected().await.unwrap();
        let frames = drain(&mut h.outbound);
        assert_eq!(frames[0], vec![0xA0, 4]);
        let mut rest = frames[1..].to_vec();
        rest.sort();
        assert_eq!(rest, vec![vec![0xA1, 3, 3], vec![0xA1, 5, 6]]);
        assert_eq!(h.manager.status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn deregister_removes_from_tracked_set() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        h.manager.register_chunk(ChunkCoord::new(1, 2)).await.unwrap();
        h.manager.deregister_chunk(ChunkCoord::new(1, 2)).await.unwrap();

        let frames = drain(&mut h.outbound);
        assert_eq!(frames[1..], [vec![0xA1, 1, 2], vec![0xA2, 1, 2]]);
        assert!(h.manager.tracked_chunks().await.is_empty());
    }

    #[tokio::test]
    async fn place_resolves_with_next_verdict() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        drain(&mut h.outbound);

        let manager = h.manager.clone();
        let placing =
            tokio::spawn(async move { manager.place(ChunkCoord::new(1, 2), 0x0304, 7).await });

        let frame = h.outbound.recv().await.unwrap();
        assert_eq!(frame, vec![0xC1, 1, 2, 0x00, 0x03, 0x04, 7]);

        h.manager
            .handle_message(&[0xC3, 9, 0, 0, 0, 30, 0xFF, 0xFF])
            .await;

        let verdict = placing.await.unwrap().unwrap();
        assert_eq!(verdict.return_code, ReturnCode::IpOverused);
        assert_eq!(verdict.wait_seconds, 30);
        assert_eq!(verdict.cooldown_seconds, -1);
    }

    #[tokio::test]
    async fn placements_are_serialized() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        drain(&mut h.outbound);

        let first = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.place(ChunkCoord::new(0, 0), 1, 1).await })
        };
        assert_eq!(h.outbound.recv().await.unwrap()[6], 1);

        let second = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.place(ChunkCoord::new(0, 0), 2, 2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.outbound.try_recv().is_err(), "second placement sent early");

        h.manager.handle_message(&[0xC3, 0, 0, 0, 0, 0, 0, 4]).await;
        assert_eq!(first.await.unwrap().unwrap().cooldown_seconds, 4);

        assert_eq!(h.outbound.recv().await.unwrap()[6], 2);
        h.manager.handle_message(&[0xC3, 8, 0, 0, 0, 0, 0, 9]).await;

        let verdict = second.await.unwrap().unwrap();
        assert_eq!(verdict.return_code, ReturnCode::ProtectedPixel);
        assert_eq!(verdict.cooldown_seconds, 9);
    }

    #[tokio::test]
    async fn place_waits_for_readiness() {
        let mut h = default_harness();

        let manager = h.manager.clone();
        let placing =
            tokio::spawn(async move { manager.place(ChunkCoord::new(0, 0), 0, 1).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.outbound.try_recv().is_err());

        h.manager.on_connected().await.unwrap();
        assert_eq!(h.outbound.recv().await.unwrap(), vec![0xA0, 4]);
        assert_eq!(h.outbound.recv().await.unwrap()[0], 0xC1);

        h.manager.handle_message(&[0xC3, 0, 0, 0, 0, 0, 0, 0]).await;
        assert!(placing.await.unwrap().unwrap().return_code.is_success());
    }

    #[tokio::test]
    async fn readiness_wait_times_out() {
        let h = harness(Duration::from_millis(50), Duration::from_secs(5));
        let result = h.manager.set_tracked_chunks(chunk_set(&[(0, 0)])).await;
        assert!(matches!(result, Err(ClientError::ReadyTimeout { .. })));
    }

    #[tokio::test]
    async fn verdict_wait_times_out_and_frees_slot() {
        let h = harness(Duration::from_secs(5), Duration::from_millis(50));
        h.manager.on_connected().await.unwrap();

        let result = h.manager.place(ChunkCoord::new(0, 0), 0, 1).await;
        assert!(matches!(result, Err(ClientError::VerdictTimeout { .. })));
        assert!(h.manager.state.pending.lock().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_fails_in_flight_placement() {
        let mut h = default_harness();
        h.manager.on_connected().await.unwrap();
        drain(&mut h.outbound);

        let manager = h.manager.clone();
        let placing =
            tokio::spawn(async move { manager.place(ChunkCoord::new(0, 0), 0, 1).await });
        h.outbound.recv().await.unwrap();

        h.manager.on_disconnected().await;
        assert!(matches!(
            placing.await.unwrap(),
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_between_ready_and_send_fails_fast() {
        let h = harness(Duration::from_secs(5), Duration::from_secs(30));
        h.manager.on_connected().await.unwrap();

        // Park the placement right after its readiness check.
        let slot = h.manager.state.pending.lock().await;
        let manager = h.manager.clone();
        let placing =
            tokio::spawn(async move { manager.place(ChunkCoord::new(0, 0), 1, 1).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        h.manager.set_status(ConnectionStatus::Reconnecting);
        drop(slot);

        let result = timeout(Duration::from_secs(1), placing)
            .await
            .expect("placement should not wait for the verdict deadline")
            .unwrap();
        assert!(matches!(result, Err(ClientError::Disconnected)));
        assert!(h.manager.state.pending.lock().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let h = default_harness();

        let manager = h.manager.clone();
        let waiting = tokio::spawn(async move { manager.wait_ready().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.manager.close().await;
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ClientError::ConnectionClosed)
        ));

        // closed is terminal
        h.manager.set_status(ConnectionStatus::Ready);
        assert_eq!(h.manager.status(), ConnectionStatus::Closed);
        assert!(h.manager.on_connected().await.is_err());
    }

    #[tokio::test]
    async fn pixel_changes_are_emitted_relative() {
        let mut h = default_harness();
        h.manager
            .handle_message(&[0xC1, 10, 20, 0, 0x12, 0x34, 5])
            .await;

        let change = h.changes.recv().await.unwrap();
        assert_eq!(change.canvas_id, 4);
        assert_eq!(change.update.chunk, ChunkCoord::new(10, 20));
        assert_eq!(change.update.offset(), 0x1234);
        assert_eq!(change.update.color, 5);
    }

    #[tokio::test]
    #[traced_test]
    async fn stray_and_malformed_frames_are_dropped() {
        let mut h = default_harness();

        h.manager.handle_message(&[0xC3, 0, 0, 0, 0, 1, 0, 1]).await;
        h.manager.handle_message(&[0xC1, 1]).await;
        h.manager.handle_message(&[0x7F, 1, 2, 3]).await;

        assert!(h.changes.try_recv().is_err());
        assert!(logs_contain("Dropping verdict with no pending placement"));
        assert!(logs_contain("Dropping malformed frame"));
    }

    #[tokio::test]
    async fn rejects_oversized_offset() {
        let h = default_harness();
        let result = h.manager.place(ChunkCoord::new(0, 0), 1 << 24, 0).await;
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }
}
