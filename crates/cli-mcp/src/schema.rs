//! Flag to parameter schema translation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::{Flag, FlagValue, HELP_NAME};
use crate::error::SchemaError;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Boolean,
    Number,
}

/// Typed description of one tool parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParameterSchema {
    /// JSON Schema property for this parameter
    pub fn property(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".to_string(), serde_json::json!(self.param_type));
        prop.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        if let Some(default) = &self.default {
            prop.insert("default".to_string(), default.clone());
        }
        Value::Object(prop)
    }
}

/// Translate a command's flags into parameter schemas, in flag order.
///
/// A flag named `help` is skipped. Any flag kind without a JSON counterpart
/// fails the whole translation.
pub fn translate(flags: &[Flag]) -> Result<Vec<ParameterSchema>, SchemaError> {
    let mut params = Vec::with_capacity(flags.len());

    for flag in flags {
        if flag.name == HELP_NAME {
            continue;
        }

        let (param_type, default) = match &flag.value {
            FlagValue::String(v) => (
                ParamType::String,
                (!v.is_empty()).then(|| Value::String(v.clone())),
            ),
            FlagValue::Bool(v) => (ParamType::Boolean, Some(Value::Bool(*v))),
            FlagValue::Int(v) => number(*v as f64),
            FlagValue::Uint(v) => number(*v as f64),
            FlagValue::Float(v) => number(*v),
            other => {
                return Err(SchemaError::UnsupportedFlagType {
                    flag: flag.name.clone(),
                    kind: other.kind(),
                })
            }
        };

        params.push(ParameterSchema {
            name: flag.name.clone(),
            param_type,
            description: flag.usage.clone(),
            required: flag.required,
            default,
        });
    }

    Ok(params)
}

fn number(value: f64) -> (ParamType, Option<Value>) {
    (ParamType::Number, Some(serde_json::json!(value)))
}
