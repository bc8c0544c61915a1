//! ---
//! opcsim_section: "02-value-model"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Node records and variation configuration invariants."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::{DataType, ModelError, NodeId, Result, TypedValue};

/// Interval floor applied to every variation interval to bound protocol
/// chattiness.
pub const MIN_VARIATION_INTERVAL_MS: u64 = 100;

/// Maximum supported rounding precision.
pub const MAX_DECIMAL_PLACES: u8 = 10;

fn default_interval() -> u64 {
    1000
}

fn default_decimal_places() -> u8 {
    2
}

fn default_direction() -> i8 {
    1
}

/// Structural kind of an address-space node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Variable,
    Object,
}

/// Waveform rule governing how a node's value evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariationKind {
    #[default]
    None,
    Random,
    Linear,
    Cycle,
    Discrete,
    Sine,
    Square,
    Triangle,
    Sawtooth,
    Step,
}

impl VariationKind {
    /// Kinds that require min/max bounds.
    pub fn needs_bounds(self) -> bool {
        !matches!(self, VariationKind::None | VariationKind::Discrete)
    }

    /// Kinds that require a positive step size.
    pub fn needs_step(self) -> bool {
        matches!(
            self,
            VariationKind::Linear | VariationKind::Cycle | VariationKind::Step
        )
    }

    /// Whether this kind leaves the value untouched.
    pub fn is_none(self) -> bool {
        matches!(self, VariationKind::None)
    }
}

impl std::fmt::Display for VariationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VariationKind::None => "none",
            VariationKind::Random => "random",
            VariationKind::Linear => "linear",
            VariationKind::Cycle => "cycle",
            VariationKind::Discrete => "discrete",
            VariationKind::Sine => "sine",
            VariationKind::Square => "square",
            VariationKind::Triangle => "triangle",
            VariationKind::Sawtooth => "sawtooth",
            VariationKind::Step => "step",
        };
        f.write_str(name)
    }
}

/// Flat variation record exchanged with the administrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationConfig {
    /// Selected waveform rule.
    #[serde(rename = "variation_type", default)]
    pub kind: VariationKind,
    /// Update interval in milliseconds; floored to
    /// [`MIN_VARIATION_INTERVAL_MS`] at runtime.
    #[serde(rename = "variation_interval", default = "default_interval")]
    pub interval_ms: u64,
    /// Lower bound, required by bounded kinds.
    #[serde(rename = "variation_min", default)]
    pub min: Option<f64>,
    /// Upper bound, required by bounded kinds.
    #[serde(rename = "variation_max", default)]
    pub max: Option<f64>,
    /// Step size, required by linear/cycle/step.
    #[serde(rename = "variation_step", default)]
    pub step: Option<f64>,
    /// Ordered candidate values for discrete variation.
    #[serde(rename = "variation_values", default)]
    pub values: Vec<serde_json::Value>,
    /// Rounding precision applied to numeric outputs.
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u8,
    /// Direction flag (+1 or -1), flipped by linear variation at the bounds.
    #[serde(rename = "variation_direction", default = "default_direction")]
    pub direction: i8,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            kind: VariationKind::None,
            interval_ms: default_interval(),
            min: None,
            max: None,
            step: None,
            values: Vec::new(),
            decimal_places: default_decimal_places(),
            direction: default_direction(),
        }
    }
}

impl VariationConfig {
    /// Interval with the protocol-chattiness floor applied.
    pub fn effective_interval_ms(&self) -> u64 {
        self.interval_ms.max(MIN_VARIATION_INTERVAL_MS)
    }

    /// Validate the invariants for the selected kind.
    pub fn validate(&self) -> Result<()> {
        if self.direction != 1 && self.direction != -1 {
            return Err(ModelError::InvalidDirection(self.direction));
        }
        if self.decimal_places > MAX_DECIMAL_PLACES {
            return Err(ModelError::InvalidPrecision(self.decimal_places));
        }
        if self.kind.needs_bounds() {
            let (min, max) = match (self.min, self.max) {
                (Some(min), Some(max)) => (min, max),
                _ => return Err(ModelError::MissingBounds(self.kind)),
            };
            if min > max {
                return Err(ModelError::InvalidBounds { min, max });
            }
        }
        if self.kind.needs_step() && !self.step.is_some_and(|s| s > 0.0) {
            return Err(ModelError::MissingStep(self.kind));
        }
        if self.kind == VariationKind::Discrete && self.values.is_empty() {
            return Err(ModelError::EmptyCandidates);
        }
        Ok(())
    }
}

/// A simulated data point as persisted by the administrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Protocol-namespace-qualified identifier, unique per server.
    pub node_id: NodeId,
    /// Display name shown to protocol clients.
    pub name: String,
    /// Variable or object.
    #[serde(rename = "node_type", default)]
    pub kind: NodeKind,
    /// Declared data type of the value.
    pub data_type: DataType,
    /// Current value as a canonical string, absent until first written.
    #[serde(default)]
    pub value: Option<String>,
    /// Optional operator description.
    #[serde(default)]
    pub description: Option<String>,
    /// Waveform configuration.
    #[serde(flatten)]
    pub variation: VariationConfig,
}

impl NodeRecord {
    /// Validate invariants enforced at create/edit time.
    pub fn validate(&self) -> Result<()> {
        if self.kind == NodeKind::Object && !self.variation.kind.is_none() {
            return Err(ModelError::ObjectWithVariation(self.name.clone()));
        }
        self.variation.validate()
    }

    /// Typed form of the stored value; conversion failures are surfaced.
    pub fn try_value(&self) -> Result<TypedValue> {
        match &self.value {
            Some(raw) => TypedValue::convert(raw, self.data_type),
            None => Ok(TypedValue::default_for(self.data_type)),
        }
    }

    /// Typed form of the stored value, falling back to the type default when
    /// the stored string no longer matches the declared type.
    pub fn value_or_default(&self) -> TypedValue {
        self.try_value()
            .unwrap_or_else(|_| TypedValue::default_for(self.data_type))
    }
}
