//! Meeting client abstraction and the browser-driver implementation.
//!
//! The bot never touches the conference page directly. A browser-driver
//! sidecar (headless Chromium) joins the room, mutes the bot's mic and camera
//! and reports which media tiles are rendered. This module talks to it over
//! HTTP.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One media element rendered in the meeting page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTile {
    pub id: String,
    /// Set by the driver when the tile is the bot's own preview.
    #[serde(default)]
    pub local: bool,
}

impl MediaTile {
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local: false,
        }
    }

    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local: true,
        }
    }
}

#[async_trait]
pub trait MeetingClient: Send + Sync {
    /// Enter the room with mic and camera muted.
    async fn join(&self, meeting_url: &str, bot_name: &str) -> Result<()>;

    /// Media tiles currently visible in the room.
    async fn visible_tiles(&self) -> Result<Vec<MediaTile>>;

    /// Leave the room and release the browser.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    url: &'a str,
    bot_name: &'a str,
    mute_audio: bool,
    mute_video: bool,
}

#[derive(Debug, Deserialize)]
struct TilesResponse {
    tiles: Vec<MediaTile>,
}

/// Client for the browser-driver sidecar.
pub struct HttpMeetingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMeetingClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MeetingClient for HttpMeetingClient {
    async fn join(&self, meeting_url: &str, bot_name: &str) -> Result<()> {
        info!("Joining meeting {} as {:?}", meeting_url, bot_name);

        let response = self
            .client
            .post(format!("{}/join", self.base_url))
            .json(&JoinRequest {
                url: meeting_url,
                bot_name,
                mute_audio: true,
                mute_video: true,
            })
            .send()
            .await
            .context("Failed to reach browser driver")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Join failed ({}): {}", status, body);
        }

        info!("Joined meeting successfully as {:?}", bot_name);
        Ok(())
    }

    async fn visible_tiles(&self) -> Result<Vec<MediaTile>> {
        let response = self
            .client
            .get(format!("{}/tiles", self.base_url))
            .send()
            .await
            .context("Failed to query media tiles")?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Tile query failed ({}): {}", status, body);
        }

        let parsed: TilesResponse =
            serde_json::from_str(&body).context("Failed to parse tile response")?;
        debug!("Browser driver reports {} tiles", parsed.tiles.len());
        Ok(parsed.tiles)
    }

    async fn close(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/close", self.base_url))
            .send()
            .await
            .context("Failed to reach browser driver")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Close failed ({})", status);
        }

        info!("Bot left the meeting and closed the browser");
        Ok(())
    }
}
