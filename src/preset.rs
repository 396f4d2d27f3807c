//! Effect presets.
//!
//! Rendering is done elsewhere; the orchestrator only forwards a preset's
//! effect descriptor (or layer stack) as an opaque JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Value>,
}

/// What a session renders: a single effect or a stack of layered effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectProgram {
    Effect(Value),
    Layers(Vec<Value>),
}

impl Preset {
    /// The preset's program. Exactly one of `effect` or a non-empty `layers` must be set.
    pub fn program(&self) -> OrchestratorResult<EffectProgram> {
        match (&self.effect, self.layers.is_empty()) {
            (Some(effect), true) => Ok(EffectProgram::Effect(effect.clone())),
            (None, false) => Ok(EffectProgram::Layers(self.layers.clone())),
            (Some(_), false) => Err(OrchestratorError::validation(format!(
                "preset '{}' sets both an effect and layers",
                self.id
            ))),
            (None, true) => Err(OrchestratorError::validation(format!(
                "preset '{}' has neither an effect nor layers",
                self.id
            ))),
        }
    }
}

impl EffectProgram {
    /// Short human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            EffectProgram::Effect(value) => value
                .get("type")
                .or_else(|| value.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("effect")
                .to_string(),
            EffectProgram::Layers(layers) => format!("{} layers", layers.len()),
        }
    }
}
