use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr};

use chrono_tz::Tz;
use thiserror::Error;

use crate::{discord_client, storage::UpdatePolicy, trello_client};

pub const DEFAULT_TOKEN_PREFIX: &str = "mcp_jwt_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Memory,
    Thinking,
    Discord,
    Trello,
    Time,
    Filesystem,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Thinking => "thinking",
            Self::Discord => "discord",
            Self::Trello => "trello",
            Self::Time => "time",
            Self::Filesystem => "filesystem",
        }
    }

    pub fn default_service_name(self) -> String {
        format!("mcp-{}-server", self.as_str())
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "thinking" | "sequential-thinking" => Ok(Self::Thinking),
            "discord" => Ok(Self::Discord),
            "trello" => Ok(Self::Trello),
            "time" => Ok(Self::Time),
            "filesystem" => Ok(Self::Filesystem),
            _ => Err(ConfigError::InvalidServerKind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    /// Any bearer token carrying the prefix is accepted. No signature check.
    Prefix(String),
    AllowList(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_kind: ServerKind,
    pub service_name: String,
    pub service_version: String,
    pub auth_mode: AuthMode,
    pub store_path: Option<PathBuf>,
    pub update_policy: UpdatePolicy,
    pub cors_origin: String,
    pub discord_bot_token: Option<String>,
    pub discord_api_base: String,
    pub trello_api_key: Option<String>,
    pub trello_token: Option<String>,
    pub trello_api_base: String,
    pub local_timezone: Tz,
    pub bind_addr: String,
    pub bind_port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_SERVER must be one of: memory, thinking, discord, trello, time, filesystem")]
    InvalidServerKind,
    #[error("MCP_AUTH_MODE must be one of: none, prefix, allowlist")]
    InvalidAuthMode,
    #[error("MCP_TOKEN_PREFIX must not be empty")]
    EmptyTokenPrefix,
    #[error("MCP_API_KEYS is required and must not be empty when MCP_AUTH_MODE=allowlist")]
    MissingApiKeys,
    #[error("MCP_STORE_UPDATES must be one of: serialized, unsynchronized")]
    InvalidUpdatePolicy,
    #[error("MCP_CORS_ORIGIN must be a valid header value")]
    InvalidCorsOrigin,
    #[error("DISCORD_BOT_TOKEN is required when MCP_SERVER=discord")]
    MissingDiscordToken,
    #[error("TRELLO_API_KEY and TRELLO_TOKEN are required when MCP_SERVER=trello")]
    MissingTrelloCredentials,
    #[error("MCP_LOCAL_TIMEZONE must be an IANA timezone name")]
    InvalidTimezone,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server_kind = non_empty("MCP_SERVER")
            .map(|value| value.parse::<ServerKind>())
            .transpose()?
            .unwrap_or(ServerKind::Memory);
        let service_name =
            non_empty("MCP_SERVICE_NAME").unwrap_or_else(|| server_kind.default_service_name());
        let service_version = non_empty("MCP_SERVICE_VERSION")
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let auth_mode = match non_empty("MCP_AUTH_MODE")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            Some("none") => AuthMode::None,
            None | Some("prefix") => {
                let prefix = match lookup("MCP_TOKEN_PREFIX") {
                    Some(value) if value.trim().is_empty() => {
                        return Err(ConfigError::EmptyTokenPrefix)
                    }
                    Some(value) => value.trim().to_string(),
                    None => DEFAULT_TOKEN_PREFIX.to_string(),
                };
                AuthMode::Prefix(prefix)
            }
            Some("allowlist") => {
                let keys = non_empty("MCP_API_KEYS")
                    .map(|value| {
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|key| !key.is_empty())
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .filter(|keys| !keys.is_empty())
                    .ok_or(ConfigError::MissingApiKeys)?;
                AuthMode::AllowList(keys)
            }
            Some(_) => return Err(ConfigError::InvalidAuthMode),
        };

        let update_policy = match non_empty("MCP_STORE_UPDATES")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("serialized") => UpdatePolicy::Serialized,
            Some("unsynchronized") => UpdatePolicy::Unsynchronized,
            Some(_) => return Err(ConfigError::InvalidUpdatePolicy),
        };

        let cors_origin = non_empty("MCP_CORS_ORIGIN").unwrap_or_else(|| "*".to_string());
        if axum::http::HeaderValue::from_str(&cors_origin).is_err() {
            return Err(ConfigError::InvalidCorsOrigin);
        }

        let discord_bot_token = non_empty("DISCORD_BOT_TOKEN");
        if server_kind == ServerKind::Discord && discord_bot_token.is_none() {
            return Err(ConfigError::MissingDiscordToken);
        }

        let trello_api_key = non_empty("TRELLO_API_KEY");
        let trello_token = non_empty("TRELLO_TOKEN");
        if server_kind == ServerKind::Trello && (trello_api_key.is_none() || trello_token.is_none())
        {
            return Err(ConfigError::MissingTrelloCredentials);
        }

        let local_timezone = non_empty("MCP_LOCAL_TIMEZONE")
            .map(|value| value.parse::<Tz>().map_err(|_| ConfigError::InvalidTimezone))
            .transpose()?
            .unwrap_or(Tz::UTC);

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let config = Self {
            server_kind,
            service_name,
            service_version,
            auth_mode,
            store_path: non_empty("MCP_STORE_PATH").map(PathBuf::from),
            update_policy,
            cors_origin,
            discord_bot_token,
            discord_api_base: non_empty("DISCORD_API_BASE")
                .unwrap_or_else(|| discord_client::DEFAULT_API_BASE.to_string()),
            trello_api_key,
            trello_token,
            trello_api_base: non_empty("TRELLO_API_BASE")
                .unwrap_or_else(|| trello_client::DEFAULT_API_BASE.to_string()),
            local_timezone,
            bind_addr,
            bind_port,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
