use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    area::AreaAssembler,
    canvas::{Area, CanvasConfig, ChunkCoord, Pixel},
    config::ClientConfig,
    connection::{ConnectionManager, ConnectionTimeouts, RelativePixelChange},
    constants::PIXEL_CHANGE_BUFFER,
    error::{ClientError, Result},
    http::ApiClient,
    models::MeResponse,
    protocol::PlacementVerdict,
    socket::SocketDriver,
    state::ConnectionStatus,
};

/// A pixel change on some canvas, in absolute coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelChange {
    pub canvas_id: u8,
    pub pixel: Pixel,
    pub received_at: DateTime<Utc>,
}

type CanvasMap = BTreeMap<u8, Arc<CanvasConfig>>;

struct CanvasConnection {
    manager: Arc<ConnectionManager>,
    driver: JoinHandle<()>,
}

/// Entry point: canvas metadata, one socket per canvas in use, chunk and
/// area downloads.
pub struct PixelPlanetClient {
    config: ClientConfig,
    api: ApiClient,
    me: Option<MeResponse>,
    canvases: Arc<CanvasMap>,
    connections: Mutex<HashMap<u8, CanvasConnection>>,
    relative_tx: mpsc::UnboundedSender<RelativePixelChange>,
    changes: broadcast::Sender<PixelChange>,
    forwarder: JoinHandle<()>,
}

impl PixelPlanetClient {
    /// Fetches the canvas list from the server and builds a client for it.
    #[instrument(skip(config), fields(base_url = %config.base_url))]
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        let me = api.fetch_me().await?;

        let canvases = me
            .canvases
            .iter()
            .map(|(id, response)| CanvasConfig::from_response(*id, response))
            .collect::<Result<Vec<_>>>()?;
        info!("Loaded {} canvases", canvases.len());

        let mut client = Self::with_api(config, api, canvases);
        client.me = Some(me);
        Ok(client)
    }

    /// Builds a client for an already known canvas set. Must be called from
    /// within a Tokio runtime.
    pub fn from_canvases(config: ClientConfig, canvases: Vec<CanvasConfig>) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        Ok(Self::with_api(config, api, canvases))
    }

    fn with_api(config: ClientConfig, api: ApiClient, canvases: Vec<CanvasConfig>) -> Self {
        let canvases: Arc<CanvasMap> = Arc::new(
            canvases
                .into_iter()
                .map(|canvas| (canvas.id, Arc::new(canvas)))
                .collect(),
        );
        let (relative_tx, relative_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(PIXEL_CHANGE_BUFFER);
        let forwarder = tokio::spawn(forward_changes(
            canvases.clone(),
            relative_rx,
            changes.clone(),
        ));

        Self {
            config,
            api,
            me: None,
            canvases,
            connections: Mutex::new(HashMap::new()),
            relative_tx,
            changes,
            forwarder,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Account and canvas metadata fetched by [`connect`](Self::connect).
    pub fn me(&self) -> Option<&MeResponse> {
        self.me.as_ref()
    }

    pub fn canvases(&self) -> impl Iterator<Item = &CanvasConfig> {
        self.canvases.values().map(|canvas| canvas.as_ref())
    }

    pub fn canvas(&self, canvas_id: u8) -> Result<&CanvasConfig> {
        self.canvases
            .get(&canvas_id)
            .map(|canvas| canvas.as_ref())
            .ok_or(ClientError::UnknownCanvas(canvas_id))
    }

    /// Pixel changes from every tracked chunk on every canvas.
    pub fn subscribe(&self) -> broadcast::Receiver<PixelChange> {
        self.changes.subscribe()
    }

    /// Returns the connection for a canvas, opening its socket on first use.
    async fn connection(&self, canvas_id: u8) -> Result<Arc<ConnectionManager>> {
        self.canvas(canvas_id)?;

        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&canvas_id) {
            return Ok(existing.manager.clone());
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(ConnectionManager::new(
            canvas_id,
            outbound_tx,
            self.relative_tx.clone(),
            ConnectionTimeouts {
                ready: self.config.ready_timeout,
                verdict: self.config.verdict_timeout,
            },
        ));
        let driver = SocketDriver::new(
            self.config.ws_url.clone(),
            self.config.connect_timeout,
            self.config.reconnect_delay,
            manager.clone(),
            outbound_rx,
        );
        let driver = tokio::spawn(driver.run());
        debug!(canvas_id, "Opened canvas connection");

        connections.insert(
            canvas_id,
            CanvasConnection {
                manager: manager.clone(),
                driver,
            },
        );
        Ok(manager)
    }

    /// Places a pixel and returns the server's verdict. A rejected placement
    /// is still `Ok`; inspect [`PlacementVerdict::return_code`].
    #[instrument(skip(self))]
    pub async fn place_pixel(&self, canvas_id: u8, pixel: Pixel) -> Result<PlacementVerdict> {
        let canvas = self.canvas(canvas_id)?;
        let chunk = canvas.chunk_of(pixel.x, pixel.y, pixel.z)?;
        let offset = canvas.offset_of(pixel.x, pixel.y, pixel.z)?;

        let connection = self.connection(canvas_id).await?;
        connection.place(chunk, offset, pixel.color).await
    }

    /// Tracks changes inside one area; the canvas's previous areas are
    /// dropped.
    pub async fn track_area(&self, area: &Area) -> Result<()> {
        let chunks = self.canvas(area.canvas_id)?.chunks_covering(area)?;
        self.connection(area.canvas_id)
            .await?
            .set_tracked_chunks(chunks)
            .await
    }

    /// Tracks a set of areas. Each canvas that appears in `areas` tracks
    /// exactly the union of its areas; other canvases are left alone.
    pub async fn track_areas<'a>(&self, areas: impl IntoIterator<Item = &'a Area>) -> Result<()> {
        let mut per_canvas: BTreeMap<u8, HashSet<ChunkCoord>> = BTreeMap::new();
        for area in areas {
            let chunks = self.canvas(area.canvas_id)?.chunks_covering(area)?;
            per_canvas.entry(area.canvas_id).or_default().extend(chunks);
        }

        for (canvas_id, chunks) in per_canvas {
            self.connection(canvas_id)
                .await?
                .set_tracked_chunks(chunks)
                .await?;
        }
        Ok(())
    }

    pub async fn get_chunk(&self, canvas_id: u8, chunk: ChunkCoord) -> Result<Vec<u8>> {
        self.canvas(canvas_id)?;
        self.api.fetch_chunk(canvas_id, chunk).await
    }

    /// Downloads the palette indices of a 2D area, row-major.
    pub async fn fetch_area(&self, area: &Area) -> Result<Vec<u8>> {
        let canvas = self.canvas(area.canvas_id)?;
        AreaAssembler::new(canvas, &self.api).fetch_area(area).await
    }

    pub async fn update_captcha_token(&self, token: &str) -> Result<()> {
        self.api.update_captcha_token(token).await
    }

    /// Closes every canvas connection and waits for their sockets to stop.
    pub async fn shutdown(&self) {
        let connections: Vec<CanvasConnection> = {
            let mut connections = self.connections.lock().await;
            connections.drain().map(|(_, connection)| connection).collect()
        };

        for connection in connections {
            connection.manager.close().await;
            if let Err(e) = connection.driver.await {
                warn!("Socket driver ended abnormally: {}", e);
            }
        }
        info!("Client shut down");
    }
}

impl Drop for PixelPlanetClient {
    fn drop(&mut self) {
        for connection in self.connections.get_mut().values() {
            connection.manager.set_status(ConnectionStatus::Closed);
        }
        self.forwarder.abort();
    }
}

async fn forward_changes(
    canvases: Arc<CanvasMap>,
    mut relative: mpsc::UnboundedReceiver<RelativePixelChange>,
    changes: broadcast::Sender<PixelChange>,
) {
    while let Some(change) = relative.recv().await {
        let Some(canvas) = canvases.get(&change.canvas_id) else {
            continue;
        };
        let update = change.update;
        let pixel = canvas.pixel_of(update.chunk, update.offset(), update.color);
        trace!("Pixel change on canvas {}: {:?}", change.canvas_id, pixel);

        // Nobody subscribed is not an error.
        let _ = changes.send(PixelChange {
            canvas_id: change.canvas_id,
            pixel,
            received_at: Utc::now(),
        });
    }
}
