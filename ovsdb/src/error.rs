// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

pub type OvsdbResult<T> = Result<T, OvsdbError>;

#[derive(Debug, thiserror::Error)]
pub enum OvsdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid database remote \"{0}\"")]
    InvalidRemote(String),
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON-RPC error: {error}: {details}")]
    Rpc { error: String, details: String },
    #[error("Operation {index} failed: {error}: {details}")]
    Operation {
        index: usize,
        error: String,
        details: String,
    },
    #[error("Transaction commit failed: {error}: {details}")]
    Commit { error: String, details: String },
    #[error("Response id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: u64, got: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Connection to {0} closed")]
    Closed(String),
}

impl OvsdbError {
    /// The error OVSDB reports for a `wait` operation whose condition did not
    /// hold.
    pub const WAIT_TIMED_OUT: &'static str = "timed out";

    /// Return `true` if operation `index` of a transaction failed because its
    /// `wait` condition was not met.
    pub fn is_failed_wait(&self, index: usize) -> bool {
        matches!(
            self,
            OvsdbError::Operation { index: i, error, .. }
                if *i == index && error == Self::WAIT_TIMED_OUT
        )
    }
}
