//! ---
//! opcsim_section: "02-value-model"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Namespace-qualified node identifier parsing."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::ModelError;

/// Local identifier half of a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// `i=` unsigned integer identifier.
    Numeric(u64),
    /// `s=` non-empty string identifier.
    Text(String),
    /// `g=` canonical GUID identifier.
    Guid(Uuid),
    /// `b=` base64 opaque-bytes identifier.
    Opaque(Vec<u8>),
}

/// Namespace-qualified node identifier in the `ns=<n>;<kind>=<value>` wire
/// format, kind one of `i`, `s`, `g`, `b`.
///
/// The adapter relies on this parse as a precondition: anything that made it
/// into a [`NodeId`] is structurally valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Namespace index.
    pub namespace: u16,
    /// Local identifier within the namespace.
    pub identifier: Identifier,
}

impl NodeId {
    /// Convenience constructor for numeric identifiers.
    pub fn numeric(namespace: u16, value: u64) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Convenience constructor for string identifiers.
    pub fn text(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Text(value.into()),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace, v),
            Identifier::Text(v) => write!(f, "ns={};s={}", self.namespace, v),
            Identifier::Guid(v) => write!(f, "ns={};g={}", self.namespace, v),
            Identifier::Opaque(v) => write!(f, "ns={};b={}", self.namespace, BASE64.encode(v)),
        }
    }
}

impl std::str::FromStr for NodeId {
    type Err = ModelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &'static str| ModelError::InvalidNodeId {
            input: input.to_owned(),
            reason,
        };

        let (namespace_part, identifier_part) = input
            .split_once(';')
            .ok_or_else(|| invalid("expected 'ns=<n>;<kind>=<value>'"))?;
        let namespace = namespace_part
            .strip_prefix("ns=")
            .ok_or_else(|| invalid("missing 'ns=' namespace prefix"))?
            .parse::<u16>()
            .map_err(|_| invalid("namespace index must be an unsigned 16-bit integer"))?;

        let (kind, value) = identifier_part
            .split_once('=')
            .ok_or_else(|| invalid("missing identifier kind"))?;
        let identifier = match kind {
            "i" => Identifier::Numeric(
                value
                    .parse::<u64>()
                    .map_err(|_| invalid("numeric identifier must be an unsigned integer"))?,
            ),
            "s" => {
                if value.is_empty() {
                    return Err(invalid("string identifier must not be empty"));
                }
                Identifier::Text(value.to_owned())
            }
            "g" => Identifier::Guid(
                Uuid::parse_str(value).map_err(|_| invalid("malformed GUID identifier"))?,
            ),
            "b" => Identifier::Opaque(
                BASE64
                    .decode(value)
                    .map_err(|_| invalid("malformed base64 identifier"))?,
            ),
            _ => return Err(invalid("identifier kind must be one of i, s, g, b")),
        };

        Ok(NodeId {
            namespace,
            identifier,
        })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
