// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Construction of the root `slog` logger.

use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;

/// How log records are rendered.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, human-readable records.
    Human,
    /// Bunyan-style JSON records.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

fn async_root<D>(drain: D) -> slog::Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Build the root logger for a process.
///
/// Records go to `log_file` when one is given, and to stdout otherwise.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let log = match (log_file, log_format) {
        (None, LogFormat::Human) => {
            let decorator = slog_term::TermDecorator::new().build();
            async_root(slog_term::FullFormat::new(decorator).build().fuse())
        }
        (None, LogFormat::Json) => async_root(
            slog_bunyan::with_name(name, std::io::stdout()).build().fuse(),
        ),
        (Some(path), format) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            match format {
                LogFormat::Human => {
                    let decorator = slog_term::PlainDecorator::new(file);
                    async_root(
                        slog_term::FullFormat::new(decorator).build().fuse(),
                    )
                }
                LogFormat::Json => async_root(
                    slog_bunyan::with_name(name, file).build().fuse(),
                ),
            }
        }
    };

    Ok(log.new(slog::o!("name" => name)))
}
