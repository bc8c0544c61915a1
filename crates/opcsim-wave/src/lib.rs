//! ---
//! opcsim_section: "03-waveform-engine"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Waveform rules computing the next value per tick."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Waveform engine for the OPC-Sim update loop.
//!
//! `next_value` is called once per varying node per tick. The only hidden
//! state the engine owns is its random generator; direction state lives on
//! the node record and any flip is handed back to the caller inside
//! [`WaveStep::Advance`] so it can be persisted under the same exclusion
//! scope as the value write.

use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use opcsim_model::{round_decimals, NodeRecord, TypedValue, VariationKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of one `next_value` call.
#[derive(Debug, Clone, PartialEq)]
pub enum WaveStep {
    /// The value does not change this tick.
    Hold,
    /// A new value was computed; `direction` carries the persistent
    /// direction flag the caller must store alongside the value.
    Advance {
        /// The value to write into the address space.
        value: TypedValue,
        /// Updated direction flag, when the kind owns one.
        direction: Option<i8>,
    },
    /// The node configuration cannot drive this kind; the caller should log
    /// a warning and skip the node. Never aborts the tick.
    Misconfigured(&'static str),
}

/// Computes next values for varying nodes.
#[derive(Debug)]
pub struct WaveformEngine {
    rng: StdRng,
}

impl WaveformEngine {
    /// Build an engine with a deterministic seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Compute the next value for `node` at wall-clock time `now`.
    pub fn next_value(&mut self, node: &NodeRecord, now: DateTime<Utc>) -> WaveStep {
        let variation = &node.variation;
        match variation.kind {
            VariationKind::None => WaveStep::Hold,
            VariationKind::Discrete => next_discrete(node),
            kind => {
                let Some(current) = node.value_or_default().as_f64() else {
                    return WaveStep::Misconfigured("variation requires a numeric data type");
                };
                let (min, max) = match (variation.min, variation.max) {
                    (Some(min), Some(max)) if min <= max => (min, max),
                    _ => return WaveStep::Misconfigured("variation requires min/max bounds"),
                };
                let sample = match kind {
                    VariationKind::Random => self.rng.gen_range(min..=max),
                    VariationKind::Linear => return next_linear(node, current, min, max),
                    VariationKind::Cycle => return next_cycle(node, current, min, max),
                    VariationKind::Sine => {
                        let phase = phase_of(now, variation.effective_interval_ms());
                        let amplitude = (max - min) / 2.0;
                        let offset = (max + min) / 2.0;
                        offset + amplitude * (2.0 * PI * phase).sin()
                    }
                    VariationKind::Square => {
                        let phase = phase_of(now, variation.effective_interval_ms());
                        if (2.0 * PI * phase).sin() >= 0.0 {
                            max
                        } else {
                            min
                        }
                    }
                    VariationKind::Triangle => {
                        let phase = phase_of(now, variation.effective_interval_ms());
                        if phase < 0.5 {
                            min + (max - min) * 2.0 * phase
                        } else {
                            max - (max - min) * 2.0 * (phase - 0.5)
                        }
                    }
                    VariationKind::Sawtooth => {
                        let phase = phase_of(now, variation.effective_interval_ms());
                        min + (max - min) * phase
                    }
                    VariationKind::Step => {
                        let Some(step) = variation.step.filter(|s| *s > 0.0) else {
                            return WaveStep::Misconfigured(
                                "step variation requires a positive step size",
                            );
                        };
                        let phase = phase_of(now, variation.effective_interval_ms());
                        let levels = ((max - min) / step).floor() + 1.0;
                        (min + step * (phase * levels).floor()).min(max)
                    }
                    VariationKind::None | VariationKind::Discrete => unreachable!(),
                };
                emit(node, sample, None)
            }
        }
    }
}

/// Fraction of the waveform period elapsed at `now`, in `[0, 1)`.
fn phase_of(now: DateTime<Utc>, interval_ms: u64) -> f64 {
    let millis = now.timestamp_millis().rem_euclid(interval_ms as i64);
    millis as f64 / interval_ms as f64
}

fn emit(node: &NodeRecord, sample: f64, direction: Option<i8>) -> WaveStep {
    let rounded = round_decimals(sample, node.variation.decimal_places);
    match TypedValue::from_f64(node.data_type, rounded, node.variation.decimal_places) {
        Ok(value) => WaveStep::Advance { value, direction },
        Err(_) => WaveStep::Misconfigured("computed value is not representable in the node type"),
    }
}

/// Oscillate between the bounds, clamping and flipping direction on contact.
fn next_linear(node: &NodeRecord, current: f64, min: f64, max: f64) -> WaveStep {
    let Some(step) = node.variation.step.filter(|s| *s > 0.0) else {
        return WaveStep::Misconfigured("linear variation requires a positive step size");
    };
    let direction = node.variation.direction;
    if direction != 1 && direction != -1 {
        return WaveStep::Misconfigured("direction flag must be +1 or -1");
    }
    let next = current + step * f64::from(direction);
    let (value, direction) = if next >= max {
        (max, -1)
    } else if next <= min {
        (min, 1)
    } else {
        (next, direction)
    };
    emit(node, value, Some(direction))
}

/// Wrap-on-bound cycling; the direction flag selects the travel direction
/// but is never flipped.
fn next_cycle(node: &NodeRecord, current: f64, min: f64, max: f64) -> WaveStep {
    let Some(step) = node.variation.step.filter(|s| *s > 0.0) else {
        return WaveStep::Misconfigured("cycle variation requires a positive step size");
    };
    let direction = node.variation.direction;
    if direction != 1 && direction != -1 {
        return WaveStep::Misconfigured("direction flag must be +1 or -1");
    }
    let mut next = current + step * f64::from(direction);
    if next > max {
        next = min;
    } else if next < min {
        next = max;
    }
    emit(node, next, None)
}

/// Advance to the next candidate cyclically; unknown current values reset
/// to the first candidate.
fn next_discrete(node: &NodeRecord) -> WaveStep {
    let candidates = &node.variation.values;
    if candidates.is_empty() {
        return WaveStep::Misconfigured("discrete variation requires candidate values");
    }
    let mut typed = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let raw = match candidate {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match TypedValue::convert(&raw, node.data_type) {
            Ok(value) => typed.push(value),
            Err(_) => {
                return WaveStep::Misconfigured("discrete candidate does not match the node type")
            }
        }
    }

    let current = node.value_or_default().canonical();
    let position = typed.iter().position(|value| value.canonical() == current);
    let next = match position {
        Some(index) => typed[(index + 1) % typed.len()].clone(),
        None => typed[0].clone(),
    };
    WaveStep::Advance {
        value: next,
        direction: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use opcsim_model::{DataType, NodeId, NodeKind, VariationConfig};

    fn node(kind: VariationKind, data_type: DataType, value: &str) -> NodeRecord {
        NodeRecord {
            node_id: NodeId::numeric(2, 1),
            name: "test-node".to_owned(),
            kind: NodeKind::Variable,
            data_type,
            value: Some(value.to_owned()),
            description: None,
            variation: VariationConfig {
                kind,
                interval_ms: 1000,
                min: Some(0.0),
                max: Some(10.0),
                step: Some(1.0),
                decimal_places: 2,
                ..VariationConfig::default()
            },
        }
    }

    fn apply(node: &mut NodeRecord, step: WaveStep) -> f64 {
        match step {
            WaveStep::Advance { value, direction } => {
                if let Some(direction) = direction {
                    node.variation.direction = direction;
                }
                let sample = value.as_f64().expect("numeric value");
                node.value = Some(value.canonical());
                sample
            }
            other => panic!("expected Advance, got {:?}", other),
        }
    }

    #[test]
    fn none_holds_the_current_value() {
        let mut engine = WaveformEngine::new(7);
        let node = node(VariationKind::None, DataType::Double, "4.2");
        assert_eq!(engine.next_value(&node, Utc::now()), WaveStep::Hold);
    }

    #[test]
    fn linear_oscillates_within_bounds() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Linear, DataType::Double, "9.5");
        record.variation.step = Some(0.7);

        let mut flips = 0;
        let mut previous_direction = record.variation.direction;
        for _ in 0..200 {
            let step = engine.next_value(&record, Utc::now());
            let sample = apply(&mut record, step);
            assert!(
                (0.0..=10.0).contains(&sample),
                "{sample} escaped the bounds"
            );
            if record.variation.direction != previous_direction {
                flips += 1;
                assert!(
                    sample == 0.0 || sample == 10.0,
                    "direction flipped away from a bound at {sample}"
                );
                previous_direction = record.variation.direction;
            }
        }
        assert!(flips >= 2, "expected repeated oscillation, saw {flips} flip");
    }

    #[test]
    fn cycle_wraps_instead_of_bouncing() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Cycle, DataType::Double, "9.0");

        // One step to reach the bound, the next one wraps.
        let step = engine.next_value(&record, Utc::now());
        let at_bound = apply(&mut record, step);
        assert_eq!(at_bound, 10.0);
        let step = engine.next_value(&record, Utc::now());
        let wrapped = apply(&mut record, step);
        assert_eq!(wrapped, 0.0);
        let step = engine.next_value(&record, Utc::now());
        let increasing = apply(&mut record, step);
        assert_eq!(increasing, 1.0);
        assert_eq!(record.variation.direction, 1, "cycle never flips direction");
    }

    #[test]
    fn discrete_advances_cyclically_and_recovers() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Discrete, DataType::Int32, "3");
        record.variation.values = vec![1.into(), 2.into(), 3.into()];

        let step = engine.next_value(&record, Utc::now());
        let wrapped = apply(&mut record, step);
        assert_eq!(wrapped, 1.0);

        record.value = Some("99".to_owned());
        let step = engine.next_value(&record, Utc::now());
        let reset = apply(&mut record, step);
        assert_eq!(reset, 1.0);
    }

    #[test]
    fn random_respects_bounds_and_integer_types() {
        let mut engine = WaveformEngine::new(42);
        let record = node(VariationKind::Random, DataType::Int32, "5");
        for _ in 0..100 {
            match engine.next_value(&record, Utc::now()) {
                WaveStep::Advance { value, direction } => {
                    assert_eq!(direction, None);
                    let sample = value.as_f64().unwrap();
                    assert!((0.0..=10.0).contains(&sample));
                    assert!(matches!(value, TypedValue::Int32(_)));
                }
                other => panic!("expected Advance, got {:?}", other),
            }
        }
    }

    #[test]
    fn square_emits_only_the_bounds() {
        let mut engine = WaveformEngine::new(7);
        let record = node(VariationKind::Square, DataType::Double, "0");
        for offset_ms in (0..2000).step_by(125) {
            let now = Utc.timestamp_millis_opt(offset_ms).unwrap();
            match engine.next_value(&record, now) {
                WaveStep::Advance { value, .. } => {
                    let sample = value.as_f64().unwrap();
                    assert!(sample == 0.0 || sample == 10.0, "unexpected level {sample}");
                }
                other => panic!("expected Advance, got {:?}", other),
            }
        }
    }

    #[test]
    fn sawtooth_ramps_monotonically_over_one_period() {
        let mut engine = WaveformEngine::new(7);
        let record = node(VariationKind::Sawtooth, DataType::Double, "0");
        let mut previous = -1.0;
        for offset_ms in (0..1000).step_by(100) {
            let now = Utc.timestamp_millis_opt(offset_ms).unwrap();
            let WaveStep::Advance { value, .. } = engine.next_value(&record, now) else {
                panic!("expected Advance");
            };
            let sample = value.as_f64().unwrap();
            assert!(sample >= previous, "{sample} < {previous}");
            assert!((0.0..=10.0).contains(&sample));
            previous = sample;
        }
    }

    #[test]
    fn step_quantizes_to_step_multiples() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Step, DataType::Double, "0");
        record.variation.step = Some(2.5);
        for offset_ms in (0..3000).step_by(77) {
            let now = Utc.timestamp_millis_opt(offset_ms).unwrap();
            let WaveStep::Advance { value, .. } = engine.next_value(&record, now) else {
                panic!("expected Advance");
            };
            let sample = value.as_f64().unwrap();
            assert!((0.0..=10.0).contains(&sample));
            let remainder = (sample / 2.5).fract();
            assert!(remainder.abs() < 1e-9, "{sample} is not a step multiple");
        }
    }

    #[test]
    fn sine_stays_within_bounds_after_rounding() {
        let mut engine = WaveformEngine::new(7);
        let record = node(VariationKind::Sine, DataType::Double, "0");
        for offset_ms in (0..5000).step_by(37) {
            let now = Utc.timestamp_millis_opt(offset_ms).unwrap();
            let WaveStep::Advance { value, .. } = engine.next_value(&record, now) else {
                panic!("expected Advance");
            };
            let sample = value.as_f64().unwrap();
            assert!((0.0..=10.0).contains(&sample));
        }
    }

    #[test]
    fn missing_bounds_yield_misconfigured_not_panic() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Sine, DataType::Double, "0");
        record.variation.max = None;
        assert!(matches!(
            engine.next_value(&record, Utc::now()),
            WaveStep::Misconfigured(_)
        ));
    }

    #[test]
    fn non_numeric_types_cannot_ramp() {
        let mut engine = WaveformEngine::new(7);
        let record = node(VariationKind::Linear, DataType::String, "hello");
        assert!(matches!(
            engine.next_value(&record, Utc::now()),
            WaveStep::Misconfigured(_)
        ));
    }

    #[test]
    fn unsigned_linear_below_zero_clamps_to_bound() {
        let mut engine = WaveformEngine::new(7);
        let mut record = node(VariationKind::Linear, DataType::UInt16, "1");
        record.variation.direction = -1;
        record.variation.min = Some(0.0);

        let step = engine.next_value(&record, Utc::now());
        let clamped = apply(&mut record, step);
        assert_eq!(clamped, 0.0);
        assert_eq!(record.variation.direction, 1);
    }
}
