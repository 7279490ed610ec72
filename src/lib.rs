//! Client for the pixelplanet collaborative canvas service.
//!
//! [`PixelPlanetClient`] is the entry point. Placement and change tracking
//! run over one binary WebSocket per canvas; chunk bitmaps and account data
//! come over HTTP.

pub mod area;
pub mod canvas;
pub mod client;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod http;
pub mod models;
pub mod protocol;
pub mod socket;
pub mod state;

pub use area::{AreaAssembler, ChunkSource};
pub use canvas::{Area, CanvasConfig, ChunkCoord, Color, Pixel};
pub use client::{PixelChange, PixelPlanetClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use protocol::{PlacementVerdict, ReturnCode};
