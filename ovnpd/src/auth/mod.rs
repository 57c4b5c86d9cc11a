// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Token validation.
//!
//! Exactly one [`AuthPlugin`] is active in a running daemon. It is chosen at
//! startup by a `module:ClassName` identifier, looked up in a fixed table of
//! the strategies compiled into the binary.

use slog::debug;
use slog::error;
use slog::info;
use slog::o;

use crate::config::Config;
use crate::types::ProviderError;
use crate::types::ProviderResult;

pub mod ovirt;
pub mod static_token;

/// A token validation strategy.
pub trait AuthPlugin: Send + Sync {
    /// Decide whether `token` grants access.
    ///
    /// A token that is known to be invalid is reported as
    /// [`ProviderError::Unauthorized`]; `Ok(false)` means the token is valid
    /// but does not satisfy the strategy's policy.
    fn validate_token(&self, token: &str) -> ProviderResult<bool>;
}

type Constructor =
    fn(&Config, &slog::Logger) -> ProviderResult<Box<dyn AuthPlugin>>;

// (module, class, constructor)
const PLUGINS: &[(&str, &str, Constructor)] = &[
    (
        static_token::MODULE,
        static_token::NO_AUTH_PLUGIN,
        static_token::NoAuthPlugin::from_config,
    ),
    (
        static_token::MODULE,
        static_token::PLUGIN,
        static_token::NoAuthPlugin::from_config,
    ),
    (
        ovirt::MODULE,
        ovirt::AUTHORIZATION_BY_USER_NAME,
        ovirt::AuthorizationByUserName::from_config,
    ),
];

fn find_plugin(identifier: &str) -> Result<Constructor, String> {
    let (module, class) = identifier
        .rsplit_once(':')
        .ok_or_else(|| "expected an identifier of the form module:ClassName".to_string())?;
    let mut known_module = false;
    for (m, c, constructor) in PLUGINS {
        if *m == module {
            known_module = true;
            if *c == class {
                return Ok(*constructor);
            }
        }
    }
    if known_module {
        Err(format!("module {module} has no plugin {class}"))
    } else {
        Err(format!("no module named {module}"))
    }
}

/// The process-wide authorization check.
///
/// A gate starts out empty and becomes usable once a plugin has been loaded
/// into it. It keeps no per-request state.
pub struct AuthGate {
    plugin: Option<Box<dyn AuthPlugin>>,
    log: slog::Logger,
}

impl AuthGate {
    /// A gate with no plugin loaded. Every check made through it fails.
    pub fn unloaded(log: &slog::Logger) -> Self {
        AuthGate {
            plugin: None,
            log: log.new(o!("unit" => "auth")),
        }
    }

    /// Build a gate around the plugin named by `config.auth.plugin`.
    pub fn load(config: &Config, log: &slog::Logger) -> ProviderResult<Self> {
        let mut gate = AuthGate::unloaded(log);
        let identifier = config.auth.plugin.as_str();
        let plugin = find_plugin(identifier)
            .and_then(|constructor| {
                constructor(config, &gate.log).map_err(|e| e.to_string())
            })
            .map_err(|reason| {
                error!(gate.log, "unable to load auth plugin";
                    "plugin" => identifier,
                    "error" => &reason);
                ProviderError::PluginLoad {
                    plugin: identifier.to_string(),
                    reason,
                }
            })?;
        info!(gate.log, "loaded auth plugin"; "plugin" => identifier);
        gate.plugin = Some(plugin);
        Ok(gate)
    }

    /// Wrap an already constructed plugin.
    #[cfg(test)]
    pub fn with_plugin(plugin: Box<dyn AuthPlugin>, log: &slog::Logger) -> Self {
        AuthGate {
            plugin: Some(plugin),
            log: log.new(o!("unit" => "auth")),
        }
    }

    pub fn plugin_loaded(&self) -> ProviderResult<&dyn AuthPlugin> {
        self.plugin.as_deref().ok_or(ProviderError::NoAuthPlugin)
    }

    /// Check the token supplied with a request. One call is one decision.
    pub fn authorize(&self, token: Option<&str>) -> ProviderResult<()> {
        let plugin = self.plugin_loaded()?;
        let Some(token) = token else {
            return Err(ProviderError::Unauthorized(
                "No token provided.".to_string(),
            ));
        };
        if plugin.validate_token(token)? {
            Ok(())
        } else {
            debug!(self.log, "token rejected by plugin");
            Err(ProviderError::Unauthorized(
                "Token is not authorized.".to_string(),
            ))
        }
    }
}
