// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use super::AuthPlugin;
use crate::config::Config;
use crate::types::ProviderResult;

pub const MODULE: &str = "auth.plugins.static_token";
pub const NO_AUTH_PLUGIN: &str = "NoAuthPlugin";
/// Older name of [`NoAuthPlugin`], still accepted in configuration.
pub const PLUGIN: &str = "Plugin";

/// Accepts every token.
pub struct NoAuthPlugin;

impl NoAuthPlugin {
    pub fn from_config(
        _config: &Config,
        log: &slog::Logger,
    ) -> ProviderResult<Box<dyn AuthPlugin>> {
        slog::warn!(log, "token validation is disabled");
        Ok(Box::new(NoAuthPlugin))
    }
}

impl AuthPlugin for NoAuthPlugin {
    fn validate_token(&self, _token: &str) -> ProviderResult<bool> {
        Ok(true)
    }
}
