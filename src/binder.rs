//! Schema-driven argument binding for shortcut input.
//!
//! Works identically for any server's declared tool, resource template,
//! or prompt: the binder sees only an ordered parameter list with type
//! tags and required flags, never the capability behind it.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Declared type of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    /// Anything else (objects, arrays, untyped): parsed as raw JSON,
    /// falling back to a string
    Json,
}

impl ParamType {
    fn from_schema_type(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            _ => Self::Json,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean (true/false/yes/no)",
            Self::Json => "a JSON value",
        }
    }
}

/// One parameter of a capability's declared schema
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    /// Derive an ordered parameter list from a tool's JSON Schema.
    ///
    /// JSON object key order is not preserved by serde_json, so required
    /// parameters take the (server-authored, ordered) `required` array's
    /// order and optional parameters follow alphabetically.
    pub fn from_json_schema(schema: &Value) -> Vec<ParamSpec> {
        let properties = match schema.get("properties").and_then(Value::as_object) {
            Some(props) => props,
            None => return Vec::new(),
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let spec_for = |name: &str, prop: &Value, is_required: bool| ParamSpec {
            name: name.to_string(),
            kind: prop
                .get("type")
                .and_then(Value::as_str)
                .map(ParamType::from_schema_type)
                .unwrap_or(ParamType::Json),
            required: is_required,
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };

        let mut specs = Vec::new();
        for name in &required {
            if let Some(prop) = properties.get(*name) {
                specs.push(spec_for(name, prop, true));
            }
        }

        let mut optional: Vec<&String> = properties
            .keys()
            .filter(|k| !required.contains(&k.as_str()))
            .collect();
        optional.sort();
        for name in optional {
            specs.push(spec_for(name, &properties[name], false));
        }

        specs
    }

    /// Derive a parameter list from a prompt's argument declarations.
    /// Prompt arguments are untyped on the wire; they bind as strings.
    pub fn from_prompt_arguments(args: &[crate::mcp::protocol::PromptArgument]) -> Vec<ParamSpec> {
        args.iter()
            .map(|a| ParamSpec {
                name: a.name.clone(),
                kind: ParamType::String,
                required: a.required,
                description: a.description.clone(),
            })
            .collect()
    }
}

/// Bind raw shortcut tokens onto a declared schema.
///
/// Bare tokens fill required parameters left-to-right in schema order;
/// `key=value` tokens bind by name and override positional fills; unseen
/// optional parameters are omitted; a required parameter left unbound
/// fails naming the parameter.
pub fn bind(capability: &str, schema: &[ParamSpec], tokens: &[String]) -> Result<Value> {
    let mut bound: Map<String, Value> = Map::new();

    // Positional tokens target required parameters in schema order
    let positional_targets: Vec<&ParamSpec> = schema.iter().filter(|p| p.required).collect();
    let mut next_positional = 0;

    let mut keyword: Vec<(&str, &str)> = Vec::new();
    for token in tokens {
        match split_keyword(token) {
            Some((key, value)) => keyword.push((key, value)),
            None => {
                let Some(spec) = positional_targets.get(next_positional) else {
                    return Err(Error::UnknownArgument {
                        capability: capability.to_string(),
                        argument: token.clone(),
                    });
                };
                bound.insert(spec.name.clone(), coerce(spec, token)?);
                next_positional += 1;
            }
        }
    }

    // Keyword tokens bind by name and override positional fills
    for (key, value) in keyword {
        let spec = schema.iter().find(|p| p.name == key).ok_or_else(|| {
            Error::UnknownArgument {
                capability: capability.to_string(),
                argument: key.to_string(),
            }
        })?;
        bound.insert(spec.name.clone(), coerce(spec, value)?);
    }

    // Every required parameter must have ended up bound
    for spec in schema.iter().filter(|p| p.required) {
        if !bound.contains_key(&spec.name) {
            return Err(Error::MissingArgument {
                capability: capability.to_string(),
                argument: spec.name.clone(),
            });
        }
    }

    Ok(Value::Object(bound))
}

/// `key=value` tokens split on the first `=`; a leading `=` is not a
/// keyword marker.
fn split_keyword(token: &str) -> Option<(&str, &str)> {
    let pos = token.find('=')?;
    if pos == 0 {
        return None;
    }
    Some((&token[..pos], &token[pos + 1..]))
}

/// Coerce one token to its declared type
fn coerce(spec: &ParamSpec, raw: &str) -> Result<Value> {
    let mismatch = || Error::TypeMismatch {
        argument: spec.name.clone(),
        expected: spec.kind.expected(),
        value: raw.to_string(),
    };

    match spec.kind {
        ParamType::String => Ok(Value::String(raw.to_string())),
        ParamType::Number => {
            let n: f64 = raw.parse().map_err(|_| mismatch())?;
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(mismatch)
        }
        ParamType::Integer => {
            let n: i64 = raw.parse().map_err(|_| mismatch())?;
            Ok(Value::Number(n.into()))
        }
        ParamType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(Value::Bool(true)),
            "false" | "no" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        ParamType::Json => Ok(serde_json::from_str(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}
