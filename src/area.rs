use std::future::Future;

use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::{
    canvas::{Area, CanvasConfig, ChunkCoord},
    error::{ClientError, Result},
};

/// Source of raw chunk bitmaps: `edge²` bytes, row-major, one palette index
/// per pixel.
pub trait ChunkSource {
    fn fetch_chunk(
        &self,
        canvas_id: u8,
        chunk: ChunkCoord,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Stitches the chunks covering an area into one row-major buffer.
pub struct AreaAssembler<'a, S> {
    canvas: &'a CanvasConfig,
    source: &'a S,
}

impl<'a, S: ChunkSource + Sync> AreaAssembler<'a, S> {
    pub fn new(canvas: &'a CanvasConfig, source: &'a S) -> Self {
        Self { canvas, source }
    }

    /// Returns `width * height` palette indices, pixel `(x, y)` at
    /// `(x - x1) + (y - y1) * width`.
    #[instrument(skip(self), fields(canvas_id = self.canvas.id))]
    pub async fn fetch_area(&self, area: &Area) -> Result<Vec<u8>> {
        if area.canvas_id != self.canvas.id {
            return Err(ClientError::InvalidArgument(format!(
                "area belongs to canvas {}, not {}",
                area.canvas_id, self.canvas.id
            )));
        }
        if self.canvas.is_3d() {
            return Err(ClientError::InvalidArgument(
                "area assembly is only supported on 2D canvases".into(),
            ));
        }

        let start = self.canvas.chunk_of(area.x1, area.y1, None)?;
        let end = self.canvas.chunk_of(area.x2, area.y2, None)?;
        let width = area.width();
        let height = area.height();
        let edge = self.canvas.chunk_size() as i32;

        let mut output = vec![0u8; width * height];
        debug!(
            "Assembling {}x{} area from chunks ({}, {})..=({}, {})",
            width, height, start.x, start.y, end.x, end.y
        );

        for cy in start.y..=end.y {
            let row = try_join_all(
                (start.x..=end.x).map(|cx| self.load_chunk(ChunkCoord::new(cx, cy))),
            )
            .await?;

            let origin_y = self.canvas.absolute_of(cy, 0);
            let y_from = area.y1.max(origin_y);
            let y_to = area.y2.min(origin_y + edge - 1);

            for (cx, bitmap) in (start.x..=end.x).zip(row.iter()) {
                let origin_x = self.canvas.absolute_of(cx, 0);
                let x_from = area.x1.max(origin_x);
                let x_to = area.x2.min(origin_x + edge - 1);
                let len = (x_to - x_from + 1) as usize;

                for y in y_from..=y_to {
                    let src = ((y - origin_y) * edge + (x_from - origin_x)) as usize;
                    let dst = (y - area.y1) as usize * width + (x_from - area.x1) as usize;
                    output[dst..dst + len].copy_from_slice(&bitmap[src..src + len]);
                }
            }
        }

        Ok(output)
    }

    /// Fetches one chunk, expanding the empty body the server sends for
    /// chunks nobody has painted yet.
    async fn load_chunk(&self, chunk: ChunkCoord) -> Result<Vec<u8>> {
        let expected = (self.canvas.chunk_size() * self.canvas.chunk_size()) as usize;
        let bitmap = self.source.fetch_chunk(self.canvas.id, chunk).await?;

        match bitmap.len() {
            0 => Ok(vec![0; expected]),
            len if len == expected => Ok(bitmap),
            actual => Err(ClientError::InvalidChunk { expected, actual }),
        }
    }
}
