//! Layered experiment configuration
//!
//! A [`Config`] is a tree of YAML/JSON values addressed by dotted paths such
//! as `model.name`. It is built by layering task defaults, an experiment file
//! and command-line overrides, each layer replacing values of the previous
//! one. Layers may only touch keys the defaults declare, and replacement
//! values must keep the declared type.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Builds the task default configuration
pub type InitFn = fn() -> Config;

/// Adjusts a merged configuration before it is handed out
pub type PreprocessFn = fn(&mut Config) -> Result<()>;

/// Nested configuration tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    root: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Config {
    /// Wrap a value tree; the root must be a mapping
    pub fn from_value(root: Value) -> Result<Self> {
        match root {
            Value::Object(_) => Ok(Self { root }),
            other => Err(Error::ConfigParse {
                message: format!("config root must be a mapping, got {}", kind_of(&other)),
            }),
        }
    }

    /// Parse a YAML document into a config tree
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)?;
        Self::from_value(root)
    }

    /// Borrow the underlying value tree
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Look up a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        path.split('.')
            .try_fold(&mut self.root, |node, segment| {
                node.as_object_mut()?.get_mut(segment)
            })
    }

    /// Returns true if the dotted path exists
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn require(&self, path: &str) -> Result<&Value> {
        self.get(path).ok_or_else(|| Error::MissingKey {
            key: path.to_string(),
        })
    }

    pub fn get_str(&self, path: &str) -> Result<&str> {
        let value = self.require(path)?;
        value
            .as_str()
            .ok_or_else(|| Error::type_mismatch(path, "string", value))
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.require(path)?;
        value
            .as_bool()
            .ok_or_else(|| Error::type_mismatch(path, "bool", value))
    }

    pub fn get_u64(&self, path: &str) -> Result<u64> {
        let value = self.require(path)?;
        value
            .as_u64()
            .ok_or_else(|| Error::type_mismatch(path, "unsigned integer", value))
    }

    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let value = self.require(path)?;
        value
            .as_f64()
            .ok_or_else(|| Error::type_mismatch(path, "number", value))
    }

    /// Deserialize the subtree at `path` into a typed section
    pub fn section<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.require(path)?.clone();
        serde_json::from_value(value).map_err(|e| Error::InvalidConfig {
            message: format!("section `{}`: {}", path, e),
        })
    }

    /// Replace the value at an existing dotted path
    ///
    /// Mappings are merged recursively rather than replaced.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        self.set_with_raw(path, value, None)
    }

    fn set_with_raw(&mut self, path: &str, value: Value, raw: Option<&str>) -> Result<()> {
        let slot = self.get_mut(path).ok_or_else(|| Error::UnknownKey {
            key: path.to_string(),
        })?;
        match (slot, value) {
            (Value::Object(dst), Value::Object(src)) => merge_into(dst, &src, path),
            (slot, value) => {
                *slot = coerce(path, slot, value, raw)?;
                Ok(())
            }
        }
    }

    /// Merge another value tree on top of this one
    pub fn merge_value(&mut self, other: &Value) -> Result<()> {
        match (&mut self.root, other) {
            (_, Value::Null) => Ok(()),
            (Value::Object(dst), Value::Object(src)) => merge_into(dst, src, ""),
            (_, other) => Err(Error::ConfigParse {
                message: format!("config layer must be a mapping, got {}", kind_of(other)),
            }),
        }
    }

    /// Merge a YAML experiment file on top of this config
    pub fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let layer: Value = serde_yaml::from_str(&text).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.merge_value(&layer)?;
        info!(path = %path.display(), "Merged experiment config file");
        Ok(())
    }

    /// Apply command-line override tokens
    pub fn merge_from_overrides<S: AsRef<str>>(&mut self, tokens: &[S]) -> Result<()> {
        for (key, raw) in parse_overrides(tokens)? {
            self.set_with_raw(&key, parse_scalar(&raw), Some(&raw))?;
            debug!(key = %key, value = %raw, "Applied config override");
        }
        Ok(())
    }

    /// Render the tree as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.root).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Build a config from defaults, an experiment file and overrides
///
/// Layers apply in order: `init_fn()`, the YAML file at `path`, the
/// `overrides` tokens, then `preprocess_fn`.
pub fn update_cfg(
    init_fn: InitFn,
    path: &Path,
    overrides: &[String],
    preprocess_fn: Option<PreprocessFn>,
) -> Result<Config> {
    let mut cfg = init_fn();
    cfg.merge_from_file(path)?;
    cfg.merge_from_overrides(overrides)?;
    if let Some(preprocess) = preprocess_fn {
        preprocess(&mut cfg)?;
    }
    Ok(cfg)
}

/// Split override tokens into `(key, raw value)` pairs
///
/// Accepts `key value` pairs and `key=value` tokens; a leading `--` on the
/// key is ignored.
pub fn parse_overrides<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut iter = tokens.iter().map(AsRef::as_ref);

    while let Some(token) = iter.next() {
        let token = token.trim_start_matches("--");
        let (key, raw) = match token.split_once('=') {
            Some((key, raw)) => (key, raw.to_string()),
            None => {
                let raw = iter.next().ok_or_else(|| Error::InvalidOverride {
                    message: format!("key `{}` has no value", token),
                })?;
                (token, raw.to_string())
            }
        };
        if key.is_empty() {
            return Err(Error::InvalidOverride {
                message: format!("empty key in `{}`", token),
            });
        }
        pairs.push((key.to_string(), raw));
    }

    Ok(pairs)
}

/// Interpret a raw override token as a scalar value
pub fn parse_scalar(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "none" | "null" | "~" => return Value::Null,
        "" => return Value::String(String::new()),
        _ => {}
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn merge_into(dst: &mut Map<String, Value>, src: &Map<String, Value>, prefix: &str) -> Result<()> {
    for (name, incoming) in src {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let slot = dst
            .get_mut(name)
            .ok_or_else(|| Error::UnknownKey { key: key.clone() })?;
        match (slot, incoming) {
            (Value::Object(dst_inner), Value::Object(src_inner)) => {
                merge_into(dst_inner, src_inner, &key)?
            }
            (slot, incoming) => *slot = coerce(&key, slot, incoming.clone(), None)?,
        }
    }
    Ok(())
}

/// Check that `incoming` may replace `existing`, converting where allowed
fn coerce(key: &str, existing: &Value, incoming: Value, raw: Option<&str>) -> Result<Value> {
    match (existing, incoming) {
        (Value::Null, incoming) => Ok(incoming),
        (Value::Bool(_), incoming @ Value::Bool(_)) => Ok(incoming),
        (Value::String(_), incoming @ Value::String(_)) => Ok(incoming),
        (Value::String(_), incoming) => match raw {
            Some(raw) => Ok(Value::String(raw.to_string())),
            None => Err(Error::type_mismatch(key, "string", &incoming)),
        },
        (Value::Number(current), Value::Number(n)) => {
            if current.is_f64() {
                let promoted = n
                    .as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .ok_or_else(|| Error::type_mismatch(key, "float", &Value::Number(n.clone())))?;
                Ok(Value::Number(promoted))
            } else if n.is_f64() {
                Err(Error::type_mismatch(key, "integer", &Value::Number(n)))
            } else {
                Ok(Value::Number(n))
            }
        }
        (Value::Array(_), incoming @ Value::Array(_)) => Ok(incoming),
        (existing, incoming) => Err(Error::type_mismatch(key, kind_of(existing), &incoming)),
    }
}
