use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.trello.com/1";

#[derive(Debug, Error)]
pub enum TrelloError {
    #[error("trello api returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("trello request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("trello response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One REST call against the Trello API. Credentials are added by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct TrelloRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl TrelloRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::PUT,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

#[async_trait]
pub trait TrelloApi: Send + Sync {
    async fn execute(&self, request: TrelloRequest) -> Result<Value, TrelloError>;
}

/// Key-and-token client for the Trello REST API. Single attempt per call.
#[derive(Debug, Clone)]
pub struct ReqwestTrelloClient {
    client: Client,
    base_url: String,
    api_key: String,
    token: String,
}

impl ReqwestTrelloClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, TrelloError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl TrelloApi for ReqwestTrelloClient {
    async fn execute(&self, request: TrelloRequest) -> Result<Value, TrelloError> {
        let mut builder = self
            .client
            .request(
                request.method.clone(),
                format!("{}{}", self.base_url, request.path),
            )
            .query(&[("key", &self.api_key), ("token", &self.token)]);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                "trello api call rejected"
            );
            return Err(TrelloError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await?;
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        extract::{Path, Query},
        http::StatusCode,
        routing::{delete, get, put},
        Json, Router,
    };
    use serde_json::json;

    use super::*;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("upstream addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("upstream serve");
        });
        format!("http://{addr}")
    }

    async fn board(
        Path(board_id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        let authorized = query.get("key").map(String::as_str) == Some("api-key")
            && query.get("token").map(String::as_str) == Some("user-token");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, Json(json!("invalid key")));
        }
        (
            StatusCode::OK,
            Json(json!({ "id": board_id, "name": "Roadmap", "closed": false })),
        )
    }

    #[tokio::test]
    async fn get_sends_key_and_token_as_query() {
        let base = spawn_upstream(Router::new().route("/boards/{board_id}", get(board))).await;
        let client = ReqwestTrelloClient::new(base, "api-key", "user-token").expect("client");

        let board = client
            .execute(TrelloRequest::get("/boards/5f1a"))
            .await
            .expect("board");

        assert_eq!(board["id"], "5f1a");
        assert_eq!(board["name"], "Roadmap");
    }

    #[tokio::test]
    async fn put_forwards_json_body() {
        let router = Router::new().route(
            "/lists/{list_id}/closed",
            put(|Json(body): Json<Value>| async move {
                Json(json!({ "id": "l1", "closed": body["value"] }))
            }),
        );
        let base = spawn_upstream(router).await;
        let client = ReqwestTrelloClient::new(base, "api-key", "user-token").expect("client");

        let list = client
            .execute(TrelloRequest::put("/lists/l1/closed", json!({ "value": true })))
            .await
            .expect("archived list");

        assert_eq!(list["closed"], true);
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let router = Router::new().route("/cards/{card_id}", delete(|| async { StatusCode::OK }));
        let base = spawn_upstream(router).await;
        let client = ReqwestTrelloClient::new(base, "api-key", "user-token").expect("client");

        let value = client
            .execute(TrelloRequest::delete("/cards/c1"))
            .await
            .expect("deleted");

        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let base = spawn_upstream(Router::new().route("/boards/{board_id}", get(board))).await;
        let client = ReqwestTrelloClient::new(base, "wrong", "user-token").expect("client");

        let err = client
            .execute(TrelloRequest::get("/boards/5f1a"))
            .await
            .expect_err("unauthorized");

        match err {
            TrelloError::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
