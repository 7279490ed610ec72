use tracing::{debug, instrument, warn};

use crate::{
    area::ChunkSource,
    canvas::ChunkCoord,
    config::ClientConfig,
    error::Result,
    models::{CaptchaUpdate, MeResponse},
};

/// Thin wrapper over the service's REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self))]
    pub async fn fetch_me(&self) -> Result<MeResponse> {
        let me: MeResponse = self
            .http
            .get(format!("{}/api/me", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Fetched metadata for {} canvases", me.canvases.len());
        Ok(me)
    }

    #[instrument(skip(self))]
    pub async fn fetch_chunk(&self, canvas_id: u8, chunk: ChunkCoord) -> Result<Vec<u8>> {
        let url = format!(
            "{}/chunks/{}/{}/{}.bmp",
            self.base_url, canvas_id, chunk.x, chunk.y
        );
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        debug!("Fetched chunk bitmap ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Posts a solved captcha token. The response body carries nothing the
    /// client needs, so only the status is checked.
    #[instrument(skip(self, token))]
    pub async fn update_captcha_token(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/captcha", self.base_url))
            .json(&CaptchaUpdate { token })
            .send()
            .await?;

        if let Err(e) = response.error_for_status_ref() {
            warn!("Captcha token rejected: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ChunkSource for ApiClient {
    async fn fetch_chunk(&self, canvas_id: u8, chunk: ChunkCoord) -> Result<Vec<u8>> {
        ApiClient::fetch_chunk(self, canvas_id, chunk).await
    }
}
