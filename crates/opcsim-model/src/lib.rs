//! ---
//! opcsim_section: "02-value-model"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Typed value model, node identifiers, and catalog records."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Catalog model for the OPC-Sim workspace.
//! This crate exposes the typed value model, node-identifier parsing, and
//! the node/server configuration records validated at the administrative
//! boundary before they ever reach a running server instance.

pub mod ident;
pub mod node;
pub mod server;
pub mod value;

pub use ident::{Identifier, NodeId};
pub use node::{NodeKind, NodeRecord, VariationConfig, VariationKind, MIN_VARIATION_INTERVAL_MS};
pub use server::{validate_unique_endpoints, ServerConfig};
pub use value::{round_decimals, DataType, TypedValue};

/// Result alias used throughout the model crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type covering configuration and conversion failures.
///
/// Conversion variants surface when a stored or supplied value string does
/// not match the declared data type; every other variant is a configuration
/// error rejected at node/server create or edit time and never reaches the
/// update loop.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A raw value string could not be parsed as the declared data type.
    #[error("cannot convert '{value}' to {data_type}")]
    Conversion {
        /// The offending raw value.
        value: String,
        /// The target data type.
        data_type: DataType,
    },
    /// A computed numeric value cannot be represented in the node data type.
    #[error("value {value} is not representable as {data_type}")]
    NotRepresentable {
        /// The computed value.
        value: f64,
        /// The target data type.
        data_type: DataType,
    },
    /// A node identifier string failed wire-format validation.
    #[error("invalid node identifier '{input}': {reason}")]
    InvalidNodeId {
        /// The rejected identifier text.
        input: String,
        /// Why the identifier was rejected.
        reason: &'static str,
    },
    /// The selected variation kind requires min/max bounds.
    #[error("variation kind '{0}' requires variation_min and variation_max")]
    MissingBounds(VariationKind),
    /// Bounds were supplied but min exceeds max.
    #[error("variation_min {min} must not exceed variation_max {max}")]
    InvalidBounds {
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },
    /// The selected variation kind requires a positive step size.
    #[error("variation kind '{0}' requires a positive variation_step")]
    MissingStep(VariationKind),
    /// Discrete variation configured without candidate values.
    #[error("discrete variation requires a non-empty variation_values list")]
    EmptyCandidates,
    /// The persisted direction flag drifted outside the +1/-1 domain.
    #[error("variation direction must be +1 or -1, got {0}")]
    InvalidDirection(i8),
    /// Rounding precision outside the supported range.
    #[error("decimal_places must be within 0..=10, got {0}")]
    InvalidPrecision(u8),
    /// Object nodes carry no value and therefore cannot vary.
    #[error("object node '{0}' cannot declare a variation kind")]
    ObjectWithVariation(String),
    /// Application URIs must use the urn scheme.
    #[error("application uri '{0}' must start with 'urn:'")]
    InvalidApplicationUri(String),
    /// Anonymous access disabled without supplying credentials.
    #[error("server '{0}' disables anonymous access but has no username")]
    MissingCredentials(String),
    /// Two server configurations share the same endpoint address.
    #[error("endpoint {host}:{port} is used by more than one server configuration")]
    DuplicateEndpoint {
        /// Shared host.
        host: String,
        /// Shared port.
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_offender() {
        let err = ModelError::Conversion {
            value: "-5".to_owned(),
            data_type: DataType::UInt16,
        };
        assert_eq!(format!("{err}"), "cannot convert '-5' to uint16");
    }
}
