use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};

use crate::{config::AuthMode, domain::CallerId, errors::AppError, AppState};

pub const CALLER_HEADER: &str = "x-user-id";

/// Checks the bearer token against the configured mode and attaches the
/// caller identity to the request for the RPC handler.
pub async fn authenticate(
    State(state): State<AppState>,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if *state.auth_mode != AuthMode::None {
        let auth = match auth_header {
            Ok(TypedHeader(auth)) => auth,
            Err(rejection) if rejection.is_missing() => {
                return Err(AppError::unauthorized(
                    "missing_token",
                    "missing authorization header",
                ))
            }
            // Present but not a decodable bearer credential.
            Err(_) => {
                return Err(AppError::unauthorized(
                    "invalid_token",
                    "invalid bearer token",
                ))
            }
        };

        if !token_is_accepted(&state.auth_mode, auth.token()) {
            return Err(AppError::unauthorized(
                "invalid_token",
                "invalid bearer token",
            ));
        }
    }

    let caller = caller_from_headers(request.headers())?;
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

pub fn token_is_accepted(mode: &AuthMode, token: &str) -> bool {
    match mode {
        AuthMode::None => true,
        AuthMode::Prefix(prefix) => {
            token.len() > prefix.len() && token.starts_with(prefix.as_str())
        }
        AuthMode::AllowList(keys) => keys.iter().any(|key| key == token),
    }
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<CallerId, AppError> {
    let Some(value) = headers.get(CALLER_HEADER) else {
        return Ok(CallerId::anonymous());
    };

    let value = value.to_str().map_err(|_| {
        AppError::invalid_request("invalid_caller_id", "x-user-id header must be ASCII")
    })?;
    CallerId::parse(value)
}
