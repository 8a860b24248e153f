//! Caller and session identifiers used to address stored records

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::errors::AppError;

pub const ANONYMOUS_CALLER: &str = "anonymous";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.@-]{1,128}$").expect("identifier pattern is valid")
});

/// Identifiers become storage key segments, so the key separator is never allowed.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        let value = value.trim();
        if !is_valid_identifier(value) {
            return Err(AppError::invalid_request(
                "invalid_caller_id",
                "caller id must be 1-128 characters of [A-Za-z0-9_.@-]",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS_CALLER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse_session_id(value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if !is_valid_identifier(value) {
        return Err(AppError::invalid_params(
            "invalid_session_id",
            "session_id must be 1-128 characters of [A-Za-z0-9_.@-]",
        ));
    }
    Ok(value.to_string())
}
