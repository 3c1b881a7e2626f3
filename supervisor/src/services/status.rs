//! Twitch Helix liveness queries

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::StatusSource;
use shared::SourceKey;

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    #[serde(rename = "type", default)]
    kind: String,
}

impl StreamsResponse {
    /// Live iff the first stream entry reports type `live`
    fn is_live(&self) -> bool {
        self.data.first().is_some_and(|entry| entry.kind == "live")
    }
}

/// `StatusSource` backed by `GET {base}/streams?user_login=<key>`
#[derive(Debug, Clone)]
pub struct TwitchStatusSource {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
}

impl TwitchStatusSource {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            access_token: access_token.into(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.status_api_base.clone(),
            config.twitch_client_id.clone(),
            config.twitch_access_token.clone(),
        )
    }

    fn query_error(source: &SourceKey, message: impl Into<String>) -> SupervisorError {
        SupervisorError::StatusQuery {
            source_key: source.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl StatusSource for TwitchStatusSource {
    async fn is_live(&self, source: &SourceKey) -> SupervisorResult<bool> {
        let response = self
            .client
            .get(format!("{}/streams", self.base_url))
            .query(&[("user_login", source.as_str())])
            .header("Client-ID", &self.client_id)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| Self::query_error(source, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::query_error(source, format!("HTTP {}", response.status())));
        }

        let body: StreamsResponse = response
            .json()
            .await
            .map_err(|e| Self::query_error(source, format!("Failed to parse response: {e}")))?;
        Ok(body.is_live())
    }
}
