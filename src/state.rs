use std::collections::HashSet;

use tokio::sync::{Mutex, oneshot, watch};

use crate::{canvas::ChunkCoord, protocol::PlacementVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
    Reconnecting,
    Closed,
}

/// State shared between a connection's public calls and its socket driver.
pub struct ConnectionState {
    pub status: watch::Sender<ConnectionStatus>,
    pub tracked: Mutex<HashSet<ChunkCoord>>,
    pub pending: Mutex<Option<oneshot::Sender<PlacementVerdict>>>,
    /// Held for the whole send-and-wait of one placement.
    pub placement: Mutex<()>,
}

impl ConnectionState {
    pub fn new() -> ConnectionState {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        ConnectionState {
            status,
            tracked: Mutex::new(HashSet::new()),
            pending: Mutex::new(None),
            placement: Mutex::new(()),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Moves to `next` unless the connection is already closed. Returns
    /// whether the status changed.
    pub fn transition(&self, next: ConnectionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if *current == ConnectionStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }
}
