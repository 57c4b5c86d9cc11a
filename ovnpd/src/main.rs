// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `ovnpd`, a Neutron-style network provider
//! backed by the OVN northbound database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use futures::stream::StreamExt;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook_tokio::Signals;
use slog::error;
use slog::info;
use structopt::StructOpt;

use crate::auth::AuthGate;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::dispatch::HandlerRegistry;
use crate::nb::NbClient;

mod api_server;
mod auth;
mod config;
mod dispatch;
mod mapper;
mod nb;
mod types;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "ovnpd", about = "network provider for OVN")]
pub(crate) struct Opt {
    #[structopt(long, help = "read settings from the named TOML file")]
    config: Option<String>,

    #[structopt(
        long,
        help = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(long, help = "IP:port on which to serve the REST API")]
    listen_addresses: Option<Vec<SocketAddr>>,

    #[structopt(
        long,
        help = "northbound database remote: tcp:<host>:<port>, unix:<path> or memory:"
    )]
    ovn_remote: Option<String>,

    #[structopt(long, help = "authentication plugin, as <module>:<class>")]
    auth_plugin: Option<String>,
}

/// State shared by every API server and request.
pub struct Provider {
    pub log: slog::Logger,
    pub config: Mutex<Config>,
    pub dispatcher: Dispatcher,
}

impl Provider {
    // Loads the auth plugin and connects to the database, both of which may
    // block.
    fn new(log: slog::Logger, config: Config) -> anyhow::Result<Self> {
        let gate = AuthGate::load(&config, &log)?;
        let remote = config.ovn.remote()?;
        let nb = NbClient::connect(&remote, config.ovn.timeout(), &log)
            .with_context(|| {
                format!("connecting to northbound database {}", config.ovn.remote)
            })?;
        let dispatcher =
            Dispatcher::new(HandlerRegistry::with_resources(), gate, nb, &log);

        Ok(Provider {
            log,
            config: Mutex::new(config),
            dispatcher,
        })
    }
}

// Re-read the configuration and let the server manager pick up any change to
// the listen addresses. Other settings only take effect on restart.
fn handle_refresh(
    provider: &Provider,
    opt: &Opt,
    refresh_tx: &tokio::sync::watch::Sender<()>,
) {
    match config::build_config(opt) {
        Ok(new_config) => {
            let mut curr_config = provider.config.lock().unwrap();
            curr_config.provider = new_config.provider;
            info!(provider.log, "refreshed config: {:#?}", curr_config.provider);
        }
        Err(e) => {
            error!(provider.log, "failed to refresh config: {e:?}");
            return;
        }
    }

    if let Err(e) = refresh_tx.send(()) {
        error!(provider.log, "failed to send config update: {e:}");
    }
}

async fn handle_signals(
    provider: &Provider,
    opt: &Opt,
    mut signals: Signals,
    refresh_tx: tokio::sync::watch::Sender<()>,
) {
    let log = provider.log.new(slog::o!("unit" => "signal_handler"));
    let handle = signals.handle();

    while let Some(signal) = signals.next().await {
        match signal {
            SIGTERM | SIGQUIT | SIGINT | SIGHUP => {
                info!(log, "received signal"; "sig" => signal);
                handle.close();
                return;
            }
            SIGUSR1 => {
                info!(log, "handling config refresh");
                handle_refresh(provider, opt, &refresh_tx)
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let config = config::build_config(&opt)?;

    let log = common::logging::init("ovnpd", &config.log.file, config.log.format)?;
    info!(log, "ovnpd config: {config:#?}");

    let provider = {
        let log = log.clone();
        tokio::task::spawn_blocking(move || Provider::new(log, config))
            .await
            .context("starting provider")??
    };
    let provider = Arc::new(provider);

    // Register for signals before the servers start, so an early refresh is
    // queued rather than taking out the process.
    const SIGNALS: &[i32] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1];
    let signals = Signals::new(SIGNALS).context("registering signals")?;

    let (refresh_tx, refresh_rx) = tokio::sync::watch::channel(());
    let api_server_manager = tokio::task::spawn(
        api_server::api_server_manager(provider.clone(), refresh_rx),
    );

    handle_signals(&provider, &opt, signals, refresh_tx).await;

    info!(log, "shutting down api servers");
    if let Err(e) = api_server_manager.await {
        error!(log, "api server manager failed: {e:?}");
    }

    info!(log, "done");
    Ok(())
}
