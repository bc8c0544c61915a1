//! ---
//! opcsim_section: "02-value-model"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Server endpoint configuration records."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ModelError, Result};

fn default_allow_anonymous() -> bool {
    true
}

fn default_min_sampling_interval() -> u64 {
    100
}

/// One protocol endpoint as persisted by the administrative layer.
///
/// A configuration maps to at most one running server instance at a time;
/// the `running` flag doubles as the autostart marker the daemon honours at
/// boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identifier used by the instance registry.
    pub id: String,
    /// Operator-facing display name.
    pub name: String,
    /// Listen address.
    pub host: String,
    /// Listen port; the host+port pair must be unique across configurations.
    pub port: u16,
    /// Application URI advertised to clients; must use the urn scheme.
    pub application_uri: String,
    /// Whether anonymous sessions are accepted.
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,
    /// Username required when anonymous access is disabled.
    #[serde(default)]
    pub username: Option<String>,
    /// Companion secret for `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// Publish-interval floor in milliseconds.
    #[serde(default = "default_min_sampling_interval")]
    pub min_sampling_interval_ms: u64,
    /// Running flag; persisted so the daemon can restore servers on boot.
    #[serde(default)]
    pub running: bool,
    /// Timestamp of the most recent successful start.
    #[serde(default)]
    pub last_started_at: Option<DateTime<Utc>>,
}

impl ServerConfig {
    /// `host:port` form used for binding and log fields.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate structural invariants of a single configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.application_uri.starts_with("urn:") {
            return Err(ModelError::InvalidApplicationUri(
                self.application_uri.clone(),
            ));
        }
        if !self.allow_anonymous && !self.username.as_deref().is_some_and(|u| !u.is_empty()) {
            return Err(ModelError::MissingCredentials(self.id.clone()));
        }
        Ok(())
    }
}

/// Enforce the address+port uniqueness invariant across all configurations.
pub fn validate_unique_endpoints(servers: &[ServerConfig]) -> Result<()> {
    for (index, server) in servers.iter().enumerate() {
        server.validate()?;
        let clash = servers[index + 1..]
            .iter()
            .any(|other| other.host == server.host && other.port == server.port);
        if clash {
            return Err(ModelError::DuplicateEndpoint {
                host: server.host.clone(),
                port: server.port,
            });
        }
    }
    Ok(())
}
