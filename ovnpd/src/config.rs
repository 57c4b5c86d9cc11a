// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `ovnpd`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use ovsdb::Remote;
use serde::Deserialize;

use crate::types::ProviderError;
use crate::types::ProviderResult;

/// Identifier of the authentication plugin used when none is configured.
pub const DEFAULT_AUTH_PLUGIN: &str = "auth.plugins.static_token:NoAuthPlugin";

/// The run-time settings of the daemon.
///
/// Every field starts at its default, is then overridden by the TOML file
/// named with `--config` (if any), and finally by command-line options.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: ProviderConfig,
    pub ovn: OvnConfig,
    pub auth: AuthConfig,
    pub ovirt: OvirtConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// List of addresses on which the api_server should listen.
    pub listen_addresses: Vec<SocketAddr>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let any = SocketAddr::new(
            std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            common::DEFAULT_PROVIDER_PORT,
        );
        ProviderConfig {
            listen_addresses: vec![any],
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OvnConfig {
    /// Where the northbound database is served, e.g. `tcp:127.0.0.1:6641`.
    pub remote: String,
    /// Seconds allowed for establishing the database connection.
    pub timeout: u64,
}

impl Default for OvnConfig {
    fn default() -> Self {
        OvnConfig {
            remote: common::DEFAULT_OVN_REMOTE.to_string(),
            timeout: 100,
        }
    }
}

impl OvnConfig {
    pub fn remote(&self) -> ProviderResult<Remote> {
        self.remote
            .parse()
            .map_err(|e| ProviderError::Config(format!("ovn.remote: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// `module:ClassName` identifier of the token validation strategy.
    pub plugin: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            plugin: DEFAULT_AUTH_PLUGIN.to_string(),
        }
    }
}

/// Settings for the engine SSO service used by the username strategy.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OvirtConfig {
    pub engine_url: String,
    /// PEM bundle used to verify the engine's certificate.
    pub ca_file: String,
    pub sso_client_id: String,
    pub sso_client_secret: String,
    /// The only user whose tokens are accepted.
    pub admin_user_name: String,
    /// Seconds allowed for one token lookup.
    pub sso_timeout: u64,
}

impl Default for OvirtConfig {
    fn default() -> Self {
        OvirtConfig {
            engine_url: "https://localhost:443".to_string(),
            ca_file: "/etc/pki/ovirt-engine/ca.pem".to_string(),
            sso_client_id: "ovirt-provider-ovn".to_string(),
            sso_client_secret: String::new(),
            admin_user_name: "netadmin@internal".to_string(),
            sso_timeout: 10,
        }
    }
}

// The client secret stays out of the startup log.
impl fmt::Debug for OvirtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OvirtConfig")
            .field("engine_url", &self.engine_url)
            .field("ca_file", &self.ca_file)
            .field("sso_client_id", &self.sso_client_id)
            .field("sso_client_secret", &"<redacted>")
            .field("admin_user_name", &self.admin_user_name)
            .field("sso_timeout", &self.sso_timeout)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub file: Option<String>,

    /// Output log info in unstructured text or json?
    pub format: common::logging::LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            file: None,
            format: common::logging::LogFormat::Json,
        }
    }
}

fn update_from_file(path: &str) -> ProviderResult<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ProviderError::Config(format!("reading {path}: {e}")))?;
    toml::from_str(&contents)
        .map_err(|e| ProviderError::Config(format!("parsing {path}: {e}")))
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &crate::Opt, config: &mut Config) {
    if let Some(log_file) = &opts.log_file {
        config.log.file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log.format = log_format;
    }

    if let Some(list) = &opts.listen_addresses {
        config.provider.listen_addresses = list.to_vec();
    }

    if let Some(remote) = &opts.ovn_remote {
        config.ovn.remote = remote.to_string();
    }

    if let Some(plugin) = &opts.auth_plugin {
        config.auth.plugin = plugin.to_string();
    }
}

/// This builds a Config struct containing the tunable settings used to
/// adjust the daemon's behavior.  Settings come from the defaults, then the
/// configuration file, then any command line options.
pub(crate) fn build_config(opts: &crate::Opt) -> ProviderResult<Config> {
    let mut config = match &opts.config {
        Some(path) => update_from_file(path)?,
        None => Config::default(),
    };
    update_from_cli(opts, &mut config);

    // Catch a bad remote now rather than when the first connection is made.
    config.ovn.remote()?;
    if config.provider.listen_addresses.is_empty() {
        return Err(ProviderError::Config(
            "no listen addresses configured".to_string(),
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opt;

    use std::io::Write;
    use std::net::{IpAddr, Ipv6Addr};

    fn write_config(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir()
            .join(format!("ovnpd-{}-{name}.toml", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_defaults() {
        let config = build_config(&Opt::default()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ovn.remote().unwrap(), Remote::Tcp("127.0.0.1:6641".into()));
        assert_eq!(config.ovn.timeout(), Duration::from_secs(100));
        assert_eq!(config.auth.plugin, DEFAULT_AUTH_PLUGIN);
        assert_eq!(config.ovirt.admin_user_name, "netadmin@internal");
        assert_eq!(config.provider.listen_addresses[0].port(), 9696);
    }

    #[test]
    fn test_updates() {
        let opts = Opt {
            log_file: Some("test.log".to_string()),
            listen_addresses: Some(vec![SocketAddr::new(
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                1234,
            )]),
            ovn_remote: Some("unix:/run/ovn/ovnnb_db.sock".to_string()),
            ..Opt::default()
        };

        let config = build_config(&opts).unwrap();
        assert_eq!(config.log.file, Some("test.log".to_string()));
        assert_eq!(config.provider.listen_addresses.len(), 1);
        assert_eq!(config.provider.listen_addresses[0].port(), 1234);
        assert!(matches!(config.ovn.remote().unwrap(), Remote::Unix(_)));
    }

    #[test]
    fn test_file_then_cli() {
        let path = write_config(
            "layering",
            r#"
[ovn]
remote = "tcp:10.0.0.5:6641"

[auth]
plugin = "auth.plugins.ovirt:AuthorizationByUserName"

[ovirt]
engine_url = "https://engine.example.com"
sso_client_secret = "s3cret"
"#,
        );
        let opts = Opt {
            config: Some(path.clone()),
            auth_plugin: Some(DEFAULT_AUTH_PLUGIN.to_string()),
            ..Opt::default()
        };
        let config = build_config(&opts).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.ovn.remote, "tcp:10.0.0.5:6641");
        assert_eq!(config.ovn.timeout, 100);
        assert_eq!(config.auth.plugin, DEFAULT_AUTH_PLUGIN);
        assert_eq!(config.ovirt.engine_url, "https://engine.example.com");
        assert_eq!(config.ovirt.sso_client_id, "ovirt-provider-ovn");
        assert!(!format!("{:?}", config.ovirt).contains("s3cret"));
    }

    #[test]
    fn test_bad_config() {
        let opts = Opt {
            ovn_remote: Some("ssl:127.0.0.1:6641".to_string()),
            ..Opt::default()
        };
        assert!(matches!(build_config(&opts), Err(ProviderError::Config(_))));

        let path = write_config("unknown", "[ovn]\nremot = \"memory:\"\n");
        let opts = Opt {
            config: Some(path.clone()),
            ..Opt::default()
        };
        let res = build_config(&opts);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(res, Err(ProviderError::Config(_))));

        let opts = Opt {
            config: Some("/nonexistent/ovnpd.toml".to_string()),
            ..Opt::default()
        };
        assert!(matches!(build_config(&opts), Err(ProviderError::Config(_))));
    }
}
