// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Strategies backed by the oVirt engine's SSO service.

use std::time::Duration;

use serde::Deserialize;
use slog::debug;
use slog::o;

use super::AuthPlugin;
use crate::config::Config;
use crate::config::OvirtConfig;
use crate::types::ProviderError;
use crate::types::ProviderResult;

pub const MODULE: &str = "auth.plugins.ovirt";
pub const AUTHORIZATION_BY_USER_NAME: &str = "AuthorizationByUserName";

const TOKEN_INFO_PATH: &str = "/ovirt-engine/sso/oauth/token-info";

/// What the SSO service knows about a token.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TokenInfo {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenInfo {
    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }
}

/// Resolves a token into its metadata.
#[cfg_attr(test, mockall::automock)]
pub trait TokenIntrospector: Send + Sync {
    fn token_info(&self, token: &str) -> ProviderResult<TokenInfo>;
}

/// The engine's OAuth token-info endpoint.
pub struct EngineSso {
    url: String,
    ca: Option<reqwest::Certificate>,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl EngineSso {
    pub fn new(config: &OvirtConfig) -> ProviderResult<Self> {
        let ca = if config.ca_file.is_empty() {
            None
        } else {
            let pem = std::fs::read(&config.ca_file).map_err(|e| {
                ProviderError::Config(format!(
                    "reading CA file {}: {e}",
                    config.ca_file
                ))
            })?;
            Some(reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ProviderError::Config(format!(
                    "parsing CA file {}: {e}",
                    config.ca_file
                ))
            })?)
        };
        Ok(EngineSso {
            url: format!(
                "{}{TOKEN_INFO_PATH}",
                config.engine_url.trim_end_matches('/')
            ),
            ca,
            client_id: config.sso_client_id.clone(),
            client_secret: config.sso_client_secret.clone(),
            timeout: Duration::from_secs(config.sso_timeout),
        })
    }
}

impl TokenIntrospector for EngineSso {
    // The blocking client runs its own runtime, so one is built for each
    // lookup on the calling worker thread rather than kept in `self`.
    fn token_info(&self, token: &str) -> ProviderResult<TokenInfo> {
        let mut builder =
            reqwest::blocking::Client::builder().timeout(self.timeout);
        if let Some(ca) = &self.ca {
            builder = builder.add_root_certificate(ca.clone());
        }
        let info = builder
            .build()?
            .post(&self.url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(http::header::ACCEPT, "application/json")
            .form(&[("token", token)])
            .send()?
            .json::<TokenInfo>()?;
        if let Some(error) = &info.error {
            return Err(ProviderError::Unauthorized(format!(
                "{error}: {}",
                info.error_description.as_deref().unwrap_or_default()
            )));
        }
        Ok(info)
    }
}

/// Accepts only active tokens belonging to one configured user.
pub struct AuthorizationByUserName {
    sso: Box<dyn TokenIntrospector>,
    admin_user_name: String,
    log: slog::Logger,
}

impl AuthorizationByUserName {
    pub fn new(
        sso: Box<dyn TokenIntrospector>,
        admin_user_name: &str,
        log: &slog::Logger,
    ) -> Self {
        AuthorizationByUserName {
            sso,
            admin_user_name: admin_user_name.to_string(),
            log: log.new(o!("plugin" => AUTHORIZATION_BY_USER_NAME)),
        }
    }

    pub fn from_config(
        config: &Config,
        log: &slog::Logger,
    ) -> ProviderResult<Box<dyn AuthPlugin>> {
        let sso = EngineSso::new(&config.ovirt)?;
        Ok(Box::new(AuthorizationByUserName::new(
            Box::new(sso),
            &config.ovirt.admin_user_name,
            log,
        )))
    }
}

impl AuthPlugin for AuthorizationByUserName {
    fn validate_token(&self, token: &str) -> ProviderResult<bool> {
        let info = self.sso.token_info(token)?;
        if !info.is_active() {
            return Err(ProviderError::Unauthorized(
                "Token is not active.".to_string(),
            ));
        }
        debug!(self.log, "resolved token"; "user_id" => ?info.user_id);
        Ok(info.user_id.as_deref() == Some(self.admin_user_name.as_str()))
    }
}
