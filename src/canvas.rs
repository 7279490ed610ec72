use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    constants::{CHUNK_SIZE_2D, CHUNK_SIZE_3D},
    error::{ClientError, Result},
    models::CanvasResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Chunk address within one canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: u8,
    pub y: u8,
}

impl ChunkCoord {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

/// A placement request, or a change reported by the server.
///
/// `z` is only meaningful on 3D canvases. There `z` travels in the y-slot of
/// the chunk address and `y` is the height layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    pub z: Option<i32>,
    pub color: u8,
}

impl Pixel {
    pub const fn new(x: i32, y: i32, color: u8) -> Self {
        Self {
            x,
            y,
            z: None,
            color,
        }
    }

    pub const fn new_3d(x: i32, y: i32, z: i32, color: u8) -> Self {
        Self {
            x,
            y,
            z: Some(z),
            color,
        }
    }
}

/// Inclusive bounding box in absolute coordinates on one canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub canvas_id: u8,
    pub x1: i32,
    pub y1: i32,
    pub z1: Option<i32>,
    pub x2: i32,
    pub y2: i32,
    pub z2: Option<i32>,
}

impl Area {
    pub fn new(canvas_id: u8, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        Self::with_z(canvas_id, (x1, y1, None), (x2, y2, None))
    }

    pub fn with_z(
        canvas_id: u8,
        (x1, y1, z1): (i32, i32, Option<i32>),
        (x2, y2, z2): (i32, i32, Option<i32>),
    ) -> Result<Self> {
        if x1 > x2 || y1 > y2 {
            return Err(ClientError::InvalidArgument(format!(
                "area corners are not ordered: ({x1}, {y1}) > ({x2}, {y2})"
            )));
        }
        match (z1, z2) {
            (Some(a), Some(b)) if a > b => {
                return Err(ClientError::InvalidArgument(format!(
                    "area z range is not ordered: {a} > {b}"
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ClientError::InvalidArgument(
                    "area z bounds must be given on both corners or neither".into(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            canvas_id,
            x1,
            y1,
            z1,
            x2,
            y2,
            z2,
        })
    }

    pub fn width(&self) -> usize {
        (i64::from(self.x2) - i64::from(self.x1)) as usize + 1
    }

    pub fn height(&self) -> usize {
        (i64::from(self.y2) - i64::from(self.y1)) as usize + 1
    }

    pub fn contains(&self, x: i32, y: i32, z: Option<i32>) -> bool {
        let in_z = match (z, self.z1, self.z2) {
            (Some(z), Some(z1), Some(z2)) => z >= z1 && z <= z2,
            _ => true,
        };
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2 && in_z
    }
}

/// Immutable parameters of one canvas plus its coordinate math.
#[derive(Debug, Clone)]
pub struct CanvasConfig {
    pub id: u8,
    pub ident: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<String>,
    size: u32,
    chunk_size: u32,
    palette: Arc<[Color]>,
    pub base_cooldown: Duration,
    pub placed_cooldown: Duration,
    pub wait_time: Duration,
    pub requirement: u32,
    pub ranked: bool,
    is_3d: bool,
}

impl CanvasConfig {
    /// Builds a canvas with no metadata beyond its geometry and palette.
    pub fn new(id: u8, size: u32, is_3d: bool, palette: Vec<Color>) -> Result<Self> {
        if size == 0 || size % 2 != 0 {
            return Err(ClientError::InvalidArgument(format!(
                "canvas size must be a positive even number, got {size}"
            )));
        }

        Ok(Self {
            id,
            ident: String::new(),
            title: String::new(),
            description: None,
            start_date: None,
            size,
            chunk_size: if is_3d { CHUNK_SIZE_3D } else { CHUNK_SIZE_2D },
            palette: palette.into(),
            base_cooldown: Duration::ZERO,
            placed_cooldown: Duration::ZERO,
            wait_time: Duration::ZERO,
            requirement: 0,
            ranked: false,
            is_3d,
        })
    }

    pub fn from_response(id: u8, response: &CanvasResponse) -> Result<Self> {
        let palette = response
            .colors
            .iter()
            .map(|rgb| match rgb.as_slice() {
                [r, g, b, ..] => Ok(Color::new(*r, *g, *b)),
                other => Err(ClientError::InvalidArgument(format!(
                    "canvas {id} palette entry has {} components",
                    other.len()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut canvas = Self::new(id, response.size, response.is_3d, palette)?;
        canvas.ident = response.ident.clone();
        canvas.title = response.title.clone();
        canvas.description = response.description.clone();
        canvas.start_date = response.start_date.clone();
        canvas.base_cooldown = Duration::from_millis(response.base_cooldown);
        canvas.placed_cooldown = Duration::from_millis(response.placed_cooldown);
        canvas.wait_time = Duration::from_millis(response.wait_time);
        canvas.requirement = response.requirement;
        canvas.ranked = response.ranked;
        Ok(canvas)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    pub fn palette(&self) -> &[Color] {
        &self.palette
    }

    /// Number of chunks along one edge of the canvas.
    pub fn chunks_per_side(&self) -> u32 {
        self.size / self.chunk_size
    }

    fn half(&self) -> i32 {
        (self.size / 2) as i32
    }

    /// Returns the effective vertical coordinate after the bounds check.
    fn check_bounds(&self, x: i32, y: i32, z: Option<i32>) -> Result<i32> {
        let half = self.half();
        let y = z.unwrap_or(y);
        if x < -half || x > half || y < -half || y > half {
            return Err(ClientError::OutOfRange { x, y, half });
        }
        Ok(y)
    }

    pub fn chunk_of(&self, x: i32, y: i32, z: Option<i32>) -> Result<ChunkCoord> {
        let y = self.check_bounds(x, y, z)?;
        let half = self.half();
        let edge = self.chunk_size as i32;

        let to_u8 = |c: i32| {
            u8::try_from(c).map_err(|_| ClientError::OutOfRange { x, y, half })
        };
        Ok(ChunkCoord::new(
            to_u8((x + half) / edge)?,
            to_u8((y + half) / edge)?,
        ))
    }

    /// Row-major index of the pixel inside its chunk.
    pub fn offset_of(&self, x: i32, y: i32, z: Option<i32>) -> Result<u32> {
        let y = self.check_bounds(x, y, z)?;
        let edge = self.chunk_size as i32;
        let m = self.half() % edge;

        let rx = (x + m).rem_euclid(edge);
        let ry = (y + m).rem_euclid(edge);
        Ok((ry * edge + rx) as u32)
    }

    pub fn absolute_of(&self, chunk: u8, relative: u32) -> i32 {
        relative as i32 + chunk as i32 * self.chunk_size as i32 - self.half()
    }

    pub fn chunks_covering(&self, area: &Area) -> Result<HashSet<ChunkCoord>> {
        let start = self.chunk_of(area.x1, area.y1, area.z1)?;
        let end = self.chunk_of(area.x2, area.y2, area.z2)?;

        Ok((start.x..=end.x)
            .flat_map(|cx| (start.y..=end.y).map(move |cy| ChunkCoord::new(cx, cy)))
            .collect())
    }

    /// Maps a chunk-relative change back into absolute coordinates.
    pub fn pixel_of(&self, chunk: ChunkCoord, offset: u32, color: u8) -> Pixel {
        let edge = self.chunk_size;
        let rx = offset % edge;
        let row = (offset / edge) % edge;
        let x = self.absolute_of(chunk.x, rx);

        if self.is_3d {
            let layer = (offset / (edge * edge)) as i32;
            Pixel::new_3d(x, layer, self.absolute_of(chunk.y, row), color)
        } else {
            Pixel::new(x, self.absolute_of(chunk.y, row), color)
        }
    }
}
