// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A small, blocking implementation of the OVSDB management protocol.
//!
//! Callers describe a unit of work as a list of [`Operation`]s and hand it to
//! something implementing [`Transact`]. The database applies the whole list
//! atomically: either every operation takes effect or none does. Two
//! implementations are provided: [`Client`], which speaks JSON-RPC to a real
//! `ovsdb-server`, and [`MemoryDb`], an in-process engine with the same
//! all-or-nothing semantics.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

mod client;
pub mod datum;
mod error;
mod memory;
mod ops;

pub use client::Client;
pub use error::OvsdbError;
pub use error::OvsdbResult;
pub use memory::MemoryDb;
pub use ops::check_results;
pub use ops::Condition;
pub use ops::Function;
pub use ops::Mutation;
pub use ops::Mutator;
pub use ops::OpResult;
pub use ops::Operation;
pub use ops::WaitUntil;

/// A database row: column name to datum, in OVSDB's JSON notation.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// The name of the column every row carries its identity in.
pub const UUID_COLUMN: &str = "_uuid";

/// Anything able to run a transaction against a named database.
pub trait Transact: Send + Sync {
    /// Execute `ops` as one atomic transaction on database `db`, returning
    /// one result per operation.
    fn transact(
        &self,
        db: &str,
        ops: &[Operation],
    ) -> OvsdbResult<Vec<OpResult>>;
}

/// Where a database server can be reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Remote {
    /// `tcp:<host>:<port>`
    Tcp(String),
    /// `unix:<path>`
    Unix(PathBuf),
    /// `memory:`, an in-process database.
    Memory,
}

impl FromStr for Remote {
    type Err = OvsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OvsdbError::InvalidRemote(s.to_string());
        let (proto, target) = s.split_once(':').ok_or_else(invalid)?;
        match proto {
            "tcp" => match target.rsplit_once(':') {
                Some((host, port))
                    if !host.is_empty() && port.parse::<u16>().is_ok() =>
                {
                    Ok(Remote::Tcp(target.to_string()))
                }
                _ => Err(invalid()),
            },
            "unix" if !target.is_empty() => {
                Ok(Remote::Unix(PathBuf::from(target)))
            }
            "memory" if target.is_empty() => Ok(Remote::Memory),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remote::Tcp(addr) => write!(f, "tcp:{addr}"),
            Remote::Unix(path) => write!(f, "unix:{}", path.display()),
            Remote::Memory => write!(f, "memory:"),
        }
    }
}
