// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the provider.

use std::convert;

use http::StatusCode;
use ovsdb::OvsdbError;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Incorrect path: {0}")]
    IncorrectRequest(String),
    #[error("{0} request must specify an id")]
    MissingId(&'static str),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("No auth plugin loaded")]
    NoAuthPlugin,
    #[error("Unable to load auth plugin \"{plugin}\": {reason}")]
    PluginLoad { plugin: String, reason: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    RestData(String),
    #[error("{0}")]
    Exists(String),
    #[error("Northbound database error: {0}")]
    Database(OvsdbError),
    #[error("SSO error: {0}")]
    Sso(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

impl ProviderError {
    /// The HTTP status a request failing with this error is answered with.
    ///
    /// Domain errors (missing resources, rejected request data, duplicate
    /// names) answer 500 to stay compatible with existing clients, while
    /// remaining distinct variants for logging and for callers inside the
    /// daemon.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProviderError::IncorrectRequest(_) => StatusCode::NOT_FOUND,
            ProviderError::MissingId(_) => StatusCode::BAD_REQUEST,
            ProviderError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProviderError::NoAuthPlugin
            | ProviderError::PluginLoad { .. }
            | ProviderError::NotFound(_)
            | ProviderError::RestData(_)
            | ProviderError::Exists(_)
            | ProviderError::Database(_)
            | ProviderError::Sso(_)
            | ProviderError::Config(_)
            | ProviderError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the response for this error carries the error text as its
    /// body.
    pub fn has_body(&self) -> bool {
        !matches!(self, ProviderError::IncorrectRequest(_))
    }
}

impl convert::From<OvsdbError> for ProviderError {
    fn from(err: OvsdbError) -> Self {
        ProviderError::Database(err)
    }
}

impl convert::From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::RestData(format!("Invalid request body: {err}"))
    }
}

impl convert::From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Sso(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProviderError::IncorrectRequest("/v2.0/".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProviderError::MissingId("Delete").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProviderError::Unauthorized("Token is not active.".into())
                .status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProviderError::NotFound("Network x does not exist".into())
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProviderError::Database(OvsdbError::Closed("x".into()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_presence() {
        assert!(!ProviderError::IncorrectRequest("/".into()).has_body());
        assert!(ProviderError::RestData("bad".into()).has_body());
    }

    #[test]
    fn test_json_errors_are_request_data_errors() {
        let err: ProviderError =
            serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, ProviderError::RestData(_)));
    }
}
