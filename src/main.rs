use std::sync::Arc;

use axum::http::HeaderValue;
use mcp_wrappers::{
    build_app,
    config::{Config, ServerKind},
    discord_client::{DiscordApi, ReqwestDiscordClient},
    domain::{build_toolbox, Integrations},
    logging,
    mcp::server::{Dispatcher, ServiceInfo},
    storage::{JsonFileKvStore, KvStore, MemoryKvStore, RecordStore},
    trello_client::{ReqwestTrelloClient, TrelloApi},
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let kv: Arc<dyn KvStore> = match &config.store_path {
        Some(path) => Arc::new(JsonFileKvStore::open(path).await?),
        None => Arc::new(MemoryKvStore::new()),
    };
    let store = RecordStore::new(kv, config.update_policy);

    let discord = match (config.server_kind, &config.discord_bot_token) {
        (ServerKind::Discord, Some(token)) => {
            let client: Arc<dyn DiscordApi> = Arc::new(ReqwestDiscordClient::new(
                config.discord_api_base.clone(),
                token.clone(),
            )?);
            Some(client)
        }
        _ => None,
    };

    let trello = match (
        config.server_kind,
        &config.trello_api_key,
        &config.trello_token,
    ) {
        (ServerKind::Trello, Some(api_key), Some(token)) => {
            let client: Arc<dyn TrelloApi> = Arc::new(ReqwestTrelloClient::new(
                config.trello_api_base.clone(),
                api_key.clone(),
                token.clone(),
            )?);
            Some(client)
        }
        _ => None,
    };

    let integrations = Integrations {
        discord,
        trello,
        local_timezone: config.local_timezone,
    };
    let toolbox = build_toolbox(config.server_kind, store, integrations)?;
    let dispatcher = Dispatcher::new(
        ServiceInfo {
            name: config.service_name.clone(),
            version: config.service_version.clone(),
            kind: config.server_kind,
        },
        toolbox,
    )?;

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(
        config.auth_mode.clone(),
        HeaderValue::from_str(&config.cors_origin)?,
        dispatcher,
    );
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    let store_label = config
        .store_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "memory".to_string());
    info!(
        server = %config.server_kind,
        service = %config.service_name,
        version = %config.service_version,
        store = %store_label,
        update_policy = ?config.update_policy,
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
