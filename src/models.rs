use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Response of `GET /api/me`: account stats plus every canvas the server
/// exposes, keyed by canvas id.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MeResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "dailyRanking", default)]
    pub daily_ranking: i64,
    #[serde(rename = "dailyTotalPixels", default)]
    pub daily_total_pixels: i64,
    #[serde(default)]
    pub ranking: i64,
    #[serde(rename = "totalPixels", default)]
    pub total_pixels: i64,
    #[serde(default)]
    pub canvases: HashMap<u8, CanvasResponse>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanvasResponse {
    pub ident: String,
    pub title: String,
    pub colors: Vec<Vec<u8>>,
    pub size: u32,
    /// Base cooldown in milliseconds.
    #[serde(rename = "bcd")]
    pub base_cooldown: u64,
    /// Cooldown for overwriting an already placed pixel, in milliseconds.
    #[serde(rename = "pcd", default)]
    pub placed_cooldown: u64,
    /// Stacked cooldown limit, in milliseconds.
    #[serde(rename = "cds")]
    pub wait_time: u64,
    #[serde(default)]
    pub ranked: bool,
    #[serde(rename = "req", default)]
    pub requirement: u32,
    #[serde(rename = "sd", default)]
    pub start_date: Option<String>,
    #[serde(rename = "desc", default)]
    pub description: Option<String>,
    #[serde(rename = "v", default)]
    pub is_3d: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct CaptchaUpdate<'a> {
    pub token: &'a str,
}
