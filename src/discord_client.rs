use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("discord api returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("discord request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub author: Option<DiscordUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<DiscordMessage, DiscordError>;

    async fn read_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>, DiscordError>;

    async fn get_channel(&self, channel_id: &str) -> Result<DiscordChannel, DiscordError>;
}

/// Bot-token client for the Discord REST API. Each call is a single attempt
/// with no timeout or retry.
#[derive(Debug, Clone)]
pub struct ReqwestDiscordClient {
    client: Client,
    base_url: String,
    bot_token: String,
}

impl ReqwestDiscordClient {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> Result<Self, DiscordError> {
        let client = Client::builder()
            .user_agent(concat!(
                "DiscordBot (",
                env!("CARGO_PKG_NAME"),
                ", ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(header::AUTHORIZATION, format!("Bot {}", self.bot_token))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, DiscordError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "discord api call rejected");
            return Err(DiscordError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DiscordApi for ReqwestDiscordClient {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<DiscordMessage, DiscordError> {
        let request = self
            .request(Method::POST, &format!("/channels/{channel_id}/messages"))
            .json(&json!({ "content": content }));
        self.execute(request).await
    }

    async fn read_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>, DiscordError> {
        let request = self
            .request(Method::GET, &format!("/channels/{channel_id}/messages"))
            .query(&[("limit", limit)]);
        self.execute(request).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<DiscordChannel, DiscordError> {
        let request = self.request(Method::GET, &format!("/channels/{channel_id}"));
        self.execute(request).await
    }
}
