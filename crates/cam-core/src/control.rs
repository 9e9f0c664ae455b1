//! Declared, typed camera controls.
//!
//! Remote parameter updates arrive as loosely-typed JSON (`{"action":
//! "control", "name": "exposure_s", "value": 0.05}`). Before any value
//! reaches a driver setter it is coerced to the control's declared dtype
//! and checked against the declared min/max bounds. Drivers declare their
//! controls as [`ControlSpec`]s and receive only validated
//! [`ControlValue`]s — there is no string-eval dispatch anywhere.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CamError, CamResult};

/// Data type of a control value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Float,
    Int,
    Bool,
    Text,
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ControlKind::Float => "float",
            ControlKind::Int => "int",
            ControlKind::Bool => "bool",
            ControlKind::Text => "text",
        };
        write!(f, "{label}")
    }
}

/// A validated control value ready for dispatch to a driver setter.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl ControlValue {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlValue::Float(_) => ControlKind::Float,
            ControlValue::Int(_) => ControlKind::Int,
            ControlValue::Bool(_) => ControlKind::Bool,
            ControlValue::Text(_) => ControlKind::Text,
        }
    }

    /// Numeric view used for range checks.
    fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Float(v) => Some(*v),
            ControlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Declaration of one control: name, dtype and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSpec {
    pub name: String,
    pub kind: ControlKind,
    /// Inclusive lower bound for numeric controls.
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric controls.
    pub max: Option<f64>,
}

impl ControlSpec {
    pub fn float(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Float,
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn int(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Int,
            min: Some(min as f64),
            max: Some(max as f64),
        }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Bool,
            min: None,
            max: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Text,
            min: None,
            max: None,
        }
    }
}

/// The set of controls one camera declares, with validation and coercion.
#[derive(Debug, Clone, Default)]
pub struct ControlSet {
    specs: HashMap<String, ControlSpec>,
}

impl ControlSet {
    pub fn new(specs: Vec<ControlSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&ControlSpec> {
        self.specs.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Coerce a JSON value to the declared dtype and check bounds.
    ///
    /// Strings holding numbers are accepted for numeric controls (the wire
    /// format does not distinguish `"0.05"` from `0.05`); everything else
    /// must match the declared dtype exactly.
    pub fn coerce(&self, name: &str, raw: &serde_json::Value) -> CamResult<ControlValue> {
        let spec = self.specs.get(name).ok_or_else(|| CamError::Control {
            name: name.to_string(),
            message: "not a declared control".to_string(),
        })?;

        let value = coerce_kind(spec, raw).ok_or_else(|| CamError::Control {
            name: name.to_string(),
            message: format!("expected {} value, got {raw}", spec.kind),
        })?;

        if let Some(number) = value.as_f64() {
            if let Some(min) = spec.min {
                if number < min {
                    return Err(CamError::Control {
                        name: name.to_string(),
                        message: format!("{number} below declared minimum {min}"),
                    });
                }
            }
            if let Some(max) = spec.max {
                if number > max {
                    return Err(CamError::Control {
                        name: name.to_string(),
                        message: format!("{number} above declared maximum {max}"),
                    });
                }
            }
        }

        Ok(value)
    }
}

fn coerce_kind(spec: &ControlSpec, raw: &serde_json::Value) -> Option<ControlValue> {
    use serde_json::Value;
    match (spec.kind, raw) {
        (ControlKind::Float, Value::Number(n)) => n.as_f64().map(ControlValue::Float),
        (ControlKind::Float, Value::String(s)) => s.parse().ok().map(ControlValue::Float),
        (ControlKind::Int, Value::Number(n)) => n.as_i64().map(ControlValue::Int),
        (ControlKind::Int, Value::String(s)) => s.parse().ok().map(ControlValue::Int),
        (ControlKind::Bool, Value::Bool(b)) => Some(ControlValue::Bool(*b)),
        (ControlKind::Bool, Value::String(s)) => s.parse().ok().map(ControlValue::Bool),
        (ControlKind::Text, Value::String(s)) => Some(ControlValue::Text(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exposure_set() -> ControlSet {
        ControlSet::new(vec![
            ControlSpec::float("exposure_s", 0.001, 10.0),
            ControlSpec::int("gain", 0, 48),
            ControlSpec::bool("hardware_trigger"),
        ])
    }

    #[test]
    fn coerces_number_and_string_forms() {
        let set = exposure_set();
        assert_eq!(
            set.coerce("exposure_s", &json!(0.05)).unwrap(),
            ControlValue::Float(0.05)
        );
        assert_eq!(
            set.coerce("exposure_s", &json!("0.05")).unwrap(),
            ControlValue::Float(0.05)
        );
        assert_eq!(set.coerce("gain", &json!(12)).unwrap(), ControlValue::Int(12));
    }

    #[test]
    fn rejects_out_of_range_before_dispatch() {
        let set = exposure_set();
        let err = set.coerce("exposure_s", &json!(60.0)).unwrap_err();
        assert!(matches!(err, CamError::Control { .. }));
        assert!(err.to_string().contains("maximum"));

        let err = set.coerce("gain", &json!(-1)).unwrap_err();
        assert!(err.to_string().contains("minimum"));
    }

    #[test]
    fn rejects_type_mismatch() {
        let set = exposure_set();
        assert!(set.coerce("hardware_trigger", &json!(1.0)).is_err());
        assert!(set.coerce("exposure_s", &json!("fast")).is_err());
    }

    #[test]
    fn rejects_undeclared_control() {
        let set = exposure_set();
        let err = set.coerce("voltage", &json!(1.0)).unwrap_err();
        assert!(err.to_string().contains("not a declared control"));
    }
}
