// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Routing of REST requests to resource handlers.
//!
//! A request path has the form `/v2.0/<kind>[/<id>]`. The HTTP method and the
//! presence of an id select an [`Operation`]; the operation and the resource
//! kind select a [`Handler`] from a registry that is filled in once, at
//! startup, by each resource module.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use http::Method;
use http::StatusCode;
use serde_json::Value;
use slog::debug;
use slog::error;
use slog::o;

use crate::auth::AuthGate;
use crate::nb::NbClient;
use crate::types::ProviderError;
use crate::types::ProviderResult;

/// Every request path starts with this.
pub const API_PREFIX: &str = "/v2.0/";

/// What a request asks to be done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    List,
    Show,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Map a method onto an operation. `DELETE` and `PUT` name a single
    /// resource and are refused without an id.
    pub fn from_method(method: &Method, has_id: bool) -> ProviderResult<Self> {
        match *method {
            Method::GET if has_id => Ok(Operation::Show),
            Method::GET => Ok(Operation::List),
            Method::POST => Ok(Operation::Create),
            Method::PUT if has_id => Ok(Operation::Update),
            Method::PUT => Err(ProviderError::MissingId("Update")),
            Method::DELETE if has_id => Ok(Operation::Delete),
            Method::DELETE => Err(ProviderError::MissingId("Delete")),
            _ => Err(ProviderError::IncorrectRequest(format!(
                "unsupported method {method}"
            ))),
        }
    }

    /// The status of a successful response.
    pub fn success_status(&self) -> StatusCode {
        match self {
            Operation::Delete => StatusCode::NO_CONTENT,
            _ => StatusCode::OK,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    Networks,
    Ports,
    Subnets,
}

impl FromStr for ResourceKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "networks" => Ok(ResourceKind::Networks),
            "ports" => Ok(ResourceKind::Ports),
            "subnets" => Ok(ResourceKind::Subnets),
            _ => Err(ProviderError::IncorrectRequest(format!(
                "unknown resource {s}"
            ))),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Networks => "networks",
            ResourceKind::Ports => "ports",
            ResourceKind::Subnets => "subnets",
        };
        write!(f, "{s}")
    }
}

/// Split a request path into its resource kind and optional resource id.
///
/// Everything after the first `/` following the kind is the id. An empty id
/// is no id.
pub fn parse_request_path(
    path: &str,
) -> ProviderResult<(String, Option<String>)> {
    let incorrect = || ProviderError::IncorrectRequest(path.to_string());
    let rest = path.strip_prefix(API_PREFIX).ok_or_else(incorrect)?;
    let (kind, id) = match rest.split_once('/') {
        Some((kind, id)) => (kind, Some(id)),
        None => (rest, None),
    };
    if kind.is_empty() {
        return Err(incorrect());
    }
    Ok((
        kind.to_string(),
        id.filter(|id| !id.is_empty()).map(str::to_string),
    ))
}

/// The part of a request a handler sees.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Input {
    pub id: Option<String>,
    pub body: Option<Value>,
}

/// Carries out one operation on one kind of resource.
pub trait Handler: Send + Sync {
    /// Returns the JSON document to answer with, if any.
    fn handle(&self, nb: &NbClient, input: Input) -> ProviderResult<Option<Value>>;
}

/// Handlers keyed by what they handle.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<(Operation, ResourceKind), Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry holding every resource module's handlers.
    pub fn with_resources() -> Self {
        let mut registry = HandlerRegistry::new();
        crate::mapper::network::register(&mut registry);
        crate::mapper::port::register(&mut registry);
        crate::mapper::subnet::register(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        operation: Operation,
        kind: ResourceKind,
        handler: impl Handler + 'static,
    ) {
        let prior = self.handlers.insert((operation, kind), Box::new(handler));
        assert!(
            prior.is_none(),
            "duplicate handler for {operation:?} {kind}"
        );
    }

    fn get(
        &self,
        operation: Operation,
        kind: ResourceKind,
    ) -> Option<&dyn Handler> {
        self.handlers.get(&(operation, kind)).map(Box::as_ref)
    }
}

/// An inbound request, as handed over by the transport.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub token: Option<&'a str>,
    pub body: Option<&'a [u8]>,
}

impl Request<'_> {
    fn body_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        self.body
            .filter(|b| !b.is_empty())
            .map(String::from_utf8_lossy)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Json(String),
    Text(String),
}

impl Body {
    pub fn content_type(&self) -> &'static str {
        match self {
            Body::Json(_) => "application/json",
            Body::Text(_) => "text/plain",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Body::Json(s) | Body::Text(s) => s,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Option<Body>,
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    gate: AuthGate,
    nb: NbClient,
    log: slog::Logger,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        gate: AuthGate,
        nb: NbClient,
        log: &slog::Logger,
    ) -> Self {
        Dispatcher {
            registry,
            gate,
            nb,
            log: log.new(o!("unit" => "dispatcher")),
        }
    }

    /// Handle one request from start to finish. This blocks on the
    /// authentication and database calls the request needs.
    pub fn handle(&self, request: &Request) -> Response {
        debug!(self.log, "request";
            "method" => %request.method,
            "path" => request.path,
            "body" => request.body_text().as_deref());

        let response = match self.execute(request) {
            Ok((operation, document)) => {
                let status = operation.success_status();
                let body = match (operation, document) {
                    (Operation::Delete, _) | (_, None) => None,
                    (_, Some(doc)) => Some(Body::Json(doc.to_string())),
                };
                Response { status, body }
            }
            Err(e) => {
                error!(self.log, "request failed";
                    "method" => %request.method,
                    "path" => request.path,
                    "error" => %e);
                Response {
                    status: e.status_code(),
                    body: e.has_body().then(|| Body::Text(format!("Error:\n{e}"))),
                }
            }
        };

        debug!(self.log, "response";
            "code" => response.status.as_u16(),
            "body" => response.body.as_ref().map(Body::as_str));
        response
    }

    fn execute(
        &self,
        request: &Request,
    ) -> ProviderResult<(Operation, Option<Value>)> {
        let (kind, id) = parse_request_path(request.path)?;
        let operation = Operation::from_method(request.method, id.is_some())?;

        self.gate.authorize(request.token)?;

        let kind: ResourceKind = kind.parse()?;
        let handler = self.registry.get(operation, kind).ok_or_else(|| {
            ProviderError::IncorrectRequest(request.path.to_string())
        })?;

        let body = match request.body.filter(|b| !b.is_empty()) {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let document = handler.handle(&self.nb, Input { id, body })?;
        Ok((operation, document))
    }
}
