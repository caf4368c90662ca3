//! Keras model-config reader.
//!
//! The served graphs are exported from Keras models. Their architecture JSON
//! (the `model_config` attribute of the `.h5` file, or the TF.js
//! `model.json` topology) tells us the expected input size and the number
//! of output classes. Configs written by older or newer Keras releases
//! differ in a handful of fields; [`fix_config`] rewrites those so one
//! strict schema can read them all.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ModelConfigError;

/// What the service needs to know about a model's architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    pub num_classes: Option<usize>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            name: "model".to_string(),
            height: 224,
            width: 224,
            channels: 3,
            num_classes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    class_name: String,
    config: ModelBody,
}

#[derive(Debug, Deserialize)]
struct ModelBody {
    #[serde(default)]
    name: Option<String>,
    layers: Vec<LayerConfig>,
}

#[derive(Debug, Deserialize)]
struct LayerConfig {
    class_name: String,
    config: LayerBody,
}

#[derive(Debug, Deserialize)]
struct LayerBody {
    #[serde(default)]
    batch_input_shape: Option<Vec<Option<u32>>>,
    #[serde(default)]
    units: Option<usize>,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    layers: Option<Vec<LayerConfig>>,
}

/// Read a model config from disk, patching legacy fields when the strict
/// schema rejects it.
pub fn load_any_model(path: &Path) -> Result<ModelSpec, ModelConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ModelConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_model_config(&raw)
}

pub fn parse_model_config(raw: &str) -> Result<ModelSpec, ModelConfigError> {
    let document: Value = serde_json::from_str(raw)?;
    let config = unwrap_envelope(document)?;

    let direct = ModelConfig::deserialize(&config)
        .map_err(ModelConfigError::from)
        .and_then(spec_from);

    match direct {
        Ok(spec) => Ok(spec),
        Err(err) => {
            debug!(error = %err, "direct config parse failed, applying compatibility fixes");
            let fixed = fix_config(config);
            let parsed = ModelConfig::deserialize(&fixed).map_err(|err| {
                warn!(error = %err, "model config still invalid after fixes");
                ModelConfigError::Json(err)
            })?;
            spec_from(parsed)
        }
    }
}

/// Strip the `.h5` attribute and TF.js wrappers down to the bare
/// `{"class_name", "config"}` object.
fn unwrap_envelope(document: Value) -> Result<Value, ModelConfigError> {
    let mut current = document;
    loop {
        current = match current {
            Value::Object(mut map) if map.contains_key("modelTopology") => {
                map.remove("modelTopology").unwrap_or(Value::Null)
            }
            Value::Object(mut map) if map.contains_key("model_config") => {
                match map.remove("model_config").unwrap_or(Value::Null) {
                    // .h5 attributes store the config as a JSON string
                    Value::String(inner) => serde_json::from_str(&inner)?,
                    other => other,
                }
            }
            Value::Object(map) if map.contains_key("class_name") => {
                return Ok(Value::Object(map));
            }
            _ => {
                return Err(ModelConfigError::Unsupported(
                    "no class_name/config model object found".into(),
                ))
            }
        };
    }
}

/// Rewrite fields that older and newer Keras releases serialize
/// differently into the layout [`ModelConfig`] expects.
pub fn fix_config(config: Value) -> Value {
    match config {
        Value::Object(map) => Value::Object(fix_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(fix_config).collect()),
        other => other,
    }
}

fn fix_object(mut map: Map<String, Value>) -> Map<String, Value> {
    map.remove("module");
    map.remove("registered_name");

    if let Some(shape) = map.remove("batch_shape") {
        map.entry("batch_input_shape").or_insert(shape);
    }

    if let Some(policy) = map.get("dtype").and_then(policy_name) {
        map.insert("dtype".into(), Value::String(policy));
    }

    let class_name = map
        .get("class_name")
        .and_then(Value::as_str)
        .map(str::to_owned);

    if let Some(class_name) = class_name.as_deref() {
        match map.remove("config") {
            // Sequential configs before Keras 2.2 were a bare layer list.
            Some(Value::Array(layers)) if class_name == "Sequential" => {
                let mut body = Map::new();
                body.insert("layers".into(), Value::Array(layers));
                map.insert("config".into(), Value::Object(body));
            }
            Some(Value::Object(mut body)) if class_name == "DepthwiseConv2D" => {
                body.remove("groups");
                map.insert("config".into(), Value::Object(body));
            }
            Some(other) => {
                map.insert("config".into(), other);
            }
            None => {}
        }
    }

    map.into_iter().map(|(k, v)| (k, fix_config(v))).collect()
}

fn policy_name(dtype: &Value) -> Option<String> {
    let obj = dtype.as_object()?;
    let class_name = obj.get("class_name")?.as_str()?;
    if !class_name.ends_with("DTypePolicy") && class_name != "Policy" {
        return None;
    }
    obj.get("config")?
        .get("name")?
        .as_str()
        .map(str::to_owned)
}

fn spec_from(config: ModelConfig) -> Result<ModelSpec, ModelConfigError> {
    let mut layers = Vec::new();
    flatten(&config.config.layers, &mut layers);

    let input_layer = layers.iter().find(|layer| layer.class_name == "InputLayer");

    // mixed precision policies such as mixed_float16 still feed float input
    if let Some(dtype) = input_layer.and_then(|layer| layer.config.dtype.as_deref()) {
        if !dtype.contains("float") {
            return Err(ModelConfigError::Unsupported(format!(
                "input dtype {dtype} is not a float type"
            )));
        }
    }

    let input_shape = input_layer
        .or_else(|| {
            layers
                .iter()
                .find(|layer| layer.config.batch_input_shape.is_some())
        })
        .and_then(|layer| layer.config.batch_input_shape.as_deref())
        .ok_or_else(|| {
            ModelConfigError::Unsupported(format!(
                "{} config declares no input shape",
                config.class_name
            ))
        })?;

    // [batch, height, width, channels]
    let (height, width, channels) = match input_shape {
        [_, Some(h), Some(w), Some(c)] => (*h, *w, *c),
        other => {
            return Err(ModelConfigError::Unsupported(format!(
                "expected a [batch, height, width, channels] input, got {other:?}"
            )))
        }
    };

    let num_classes = layers
        .iter()
        .rev()
        .find(|layer| layer.class_name == "Dense")
        .and_then(|layer| layer.config.units);

    Ok(ModelSpec {
        name: config.config.name.unwrap_or_else(|| "model".to_string()),
        height,
        width,
        channels,
        num_classes,
    })
}

// Nested Sequential/Functional sub-models carry their own layer lists.
fn flatten<'a>(layers: &'a [LayerConfig], out: &mut Vec<&'a LayerConfig>) {
    for layer in layers {
        match &layer.config.layers {
            Some(inner) => flatten(inner, out),
            None => out.push(layer),
        }
    }
}
