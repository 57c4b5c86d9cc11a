// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! HTTP transport for the provider.
//!
//! The REST surface is routed by the dispatcher rather than by dropshot: each
//! verb has a single wildcard endpoint under `/v2.0/` that hands the raw
//! method, path, token and body over unchanged.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dropshot::endpoint;
use dropshot::Body;
use dropshot::HttpError;
use dropshot::Path;
use dropshot::RequestContext;
use dropshot::UntypedBody;
use http::Response;
use schemars::JsonSchema;
use serde::Deserialize;
use slog::error;
use slog::info;
use slog::o;

use crate::dispatch;
use crate::Provider;

/// Header carrying the caller's authentication token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

type ApiServer = dropshot::HttpServer<Arc<Provider>>;

#[derive(Deserialize, JsonSchema)]
struct RestPathParam {
    #[allow(dead_code)]
    path: Vec<String>,
}

// Run one request through the dispatcher. The dispatch chain may block on the
// database or the SSO service, so it runs on the blocking pool.
async fn dispatch_request(
    rqctx: RequestContext<Arc<Provider>>,
    body: Option<Vec<u8>>,
) -> Result<Response<Body>, HttpError> {
    let provider = rqctx.context().clone();
    let method = rqctx.request.method().clone();
    let path = rqctx.request.uri().path().to_string();
    let token = rqctx
        .request
        .headers()
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = tokio::task::spawn_blocking(move || {
        provider.dispatcher.handle(&dispatch::Request {
            method: &method,
            path: &path,
            token: token.as_deref(),
            body: body.as_deref(),
        })
    })
    .await
    .map_err(|e| {
        HttpError::for_internal_error(format!("request task failed: {e}"))
    })?;

    into_http(response)
}

fn into_http(response: dispatch::Response) -> Result<Response<Body>, HttpError> {
    let builder = Response::builder().status(response.status);
    let response = match response.body {
        Some(body) => {
            builder
                .header(http::header::CONTENT_TYPE, body.content_type())
                .body(body.as_str().to_string().into())
        }
        None => builder.body(Body::empty()),
    };
    response.map_err(|e| HttpError::for_internal_error(e.to_string()))
}

#[endpoint {
    method = GET,
    path = "/v2.0/{path:.*}",
    unpublished = true,
}]
async fn rest_get(
    rqctx: RequestContext<Arc<Provider>>,
    _path: Path<RestPathParam>,
) -> Result<Response<Body>, HttpError> {
    dispatch_request(rqctx, None).await
}

#[endpoint {
    method = POST,
    path = "/v2.0/{path:.*}",
    unpublished = true,
}]
async fn rest_post(
    rqctx: RequestContext<Arc<Provider>>,
    _path: Path<RestPathParam>,
    body: UntypedBody,
) -> Result<Response<Body>, HttpError> {
    let body = body.as_bytes().to_vec();
    dispatch_request(rqctx, Some(body)).await
}

#[endpoint {
    method = PUT,
    path = "/v2.0/{path:.*}",
    unpublished = true,
}]
async fn rest_put(
    rqctx: RequestContext<Arc<Provider>>,
    _path: Path<RestPathParam>,
    body: UntypedBody,
) -> Result<Response<Body>, HttpError> {
    let body = body.as_bytes().to_vec();
    dispatch_request(rqctx, Some(body)).await
}

#[endpoint {
    method = DELETE,
    path = "/v2.0/{path:.*}",
    unpublished = true,
}]
async fn rest_delete(
    rqctx: RequestContext<Arc<Provider>>,
    _path: Path<RestPathParam>,
) -> Result<Response<Body>, HttpError> {
    dispatch_request(rqctx, None).await
}

pub fn http_api() -> dropshot::ApiDescription<Arc<Provider>> {
    let mut api = dropshot::ApiDescription::new();
    api.register(rest_get).unwrap();
    api.register(rest_post).unwrap();
    api.register(rest_put).unwrap();
    api.register(rest_delete).unwrap();
    api
}

fn launch_server(
    provider: Arc<Provider>,
    addr: &SocketAddr,
    id: u32,
) -> anyhow::Result<ApiServer> {
    let config_dropshot = dropshot::ConfigDropshot {
        bind_address: *addr,
        default_request_body_max_bytes: 10240,
        default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
        log_headers: vec![],
    };
    let log = provider
        .log
        .new(o!("unit" => "api-server", "server_id" => id.to_string()));

    info!(log, "starting api server {id} on {addr}");
    dropshot::HttpServerStarter::new(
        &config_dropshot,
        http_api(),
        provider.clone(),
        &log,
    )
    .map(|s| s.start())
    .map_err(|e| anyhow::anyhow!(e.to_string()))
}

async fn close_server(log: &slog::Logger, addr: SocketAddr, server: ApiServer) {
    info!(log, "closing api server"; "addr" => %addr);
    if let Err(e) = server.close().await {
        error!(log, "api server did not close cleanly";
            "addr" => %addr, "error" => e);
    }
}

/// The running servers, keyed by the address each listens on.
struct Servers {
    provider: Arc<Provider>,
    running: HashMap<SocketAddr, ApiServer>,
    launched: u32,
    log: slog::Logger,
}

impl Servers {
    // Bring the running set in line with the configured listen addresses.
    // An address that fails to bind is logged and retried on the next
    // refresh.
    async fn reconcile(&mut self) {
        let wanted = self
            .provider
            .config
            .lock()
            .unwrap()
            .provider
            .listen_addresses
            .clone();
        let running: Vec<SocketAddr> = self.running.keys().copied().collect();
        let (to_start, to_stop) = common::purge_common(&wanted, &running);

        for addr in to_stop {
            if let Some(server) = self.running.remove(&addr) {
                close_server(&self.log, addr, server).await;
            }
        }
        for addr in to_start {
            self.launched += 1;
            match launch_server(self.provider.clone(), &addr, self.launched) {
                Ok(server) => {
                    self.running.insert(addr, server);
                }
                Err(e) => error!(self.log, "unable to start api server";
                    "addr" => %addr, "error" => %e),
            }
        }
    }

    async fn shutdown(self) {
        for (addr, server) in self.running {
            close_server(&self.log, addr, server).await;
        }
    }
}

/// Serve on every configured listen address until `refresh_rx` closes.
/// Each message on `refresh_rx` means the addresses may have changed.
pub async fn api_server_manager(
    provider: Arc<Provider>,
    mut refresh_rx: tokio::sync::watch::Receiver<()>,
) {
    let mut servers = Servers {
        log: provider.log.new(o!("unit" => "api-server-manager")),
        provider,
        running: HashMap::new(),
        launched: 0,
    };
    loop {
        servers.reconcile().await;
        if refresh_rx.changed().await.is_err() {
            break;
        }
    }
    servers.shutdown().await;
}
