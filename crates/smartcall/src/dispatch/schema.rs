//! Call schema synthesis.
//!
//! A [`CallSchema`] is the machine-readable description of one registered
//! callable: typed parameters, which of them are required, the context keys
//! the callable needs, and its scheduling metadata (priority, cooldown).
//!
//! Parameters come from an explicit list of [`ParamDescriptor`]s, or are
//! derived from a Rust argument type with [`descriptors_for`]. Declared
//! types are folded into the fixed [`ParamType`] tag set; anything outside it
//! becomes a string parameter rather than an error.

use crate::ToolDef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;

/// Default priority for callables registered without one.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Lowest accepted priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 10;

/// Schema type tag for a single parameter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    StringArray,
    IntegerArray,
    Object,
}

impl ParamType {
    /// Map a declared type name onto a tag.
    ///
    /// Accepts JSON Schema names (`integer`), Rust names (`i64`, `Vec<String>`)
    /// and a few common aliases. Unrecognized names map to [`ParamType::String`].
    pub fn from_declared(declared: &str) -> Self {
        let normalized: String = declared
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(inner) = array_element(&normalized) {
            return match Self::from_declared(inner) {
                ParamType::String if is_string_name(inner) => ParamType::StringArray,
                ParamType::Integer => ParamType::IntegerArray,
                _ => ParamType::String,
            };
        }

        match normalized.as_str() {
            "integer" | "int" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16"
            | "u32" | "u64" | "u128" | "usize" => ParamType::Integer,
            "number" | "float" | "double" | "f32" | "f64" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "object" | "map" | "dict" | "json" | "map<string,value>"
            | "hashmap<string,value>" | "btreemap<string,value>" | "dict[str,any]" => {
                ParamType::Object
            }
            _ => ParamType::String,
        }
    }

    /// Short name used in schemas, logs, and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::StringArray => "array<string>",
            ParamType::IntegerArray => "array<integer>",
            ParamType::Object => "object",
        }
    }

    /// JSON Schema fragment for this tag.
    pub fn json_schema(&self) -> Value {
        match self {
            ParamType::StringArray => json!({"type": "array", "items": {"type": "string"}}),
            ParamType::IntegerArray => json!({"type": "array", "items": {"type": "integer"}}),
            other => json!({ "type": other.as_str() }),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_string_name(name: &str) -> bool {
    matches!(name, "string" | "str" | "&str")
}

/// Element type of an array-like declared type (`vec<x>`, `array<x>`,
/// `list[x]`, `[x]`).
fn array_element(normalized: &str) -> Option<&str> {
    normalized
        .strip_prefix("vec<")
        .or_else(|| normalized.strip_prefix("array<"))
        .and_then(|s| s.strip_suffix('>'))
        .or_else(|| {
            normalized
                .strip_prefix("list[")
                .or_else(|| normalized.strip_prefix('['))
                .and_then(|s| s.strip_suffix(']'))
        })
}

/// One formal parameter of a callable, as declared by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    /// Declared type name. `None` means untyped (treated as string).
    pub declared_type: Option<String>,
    /// Whether the parameter has a default value (and is therefore optional).
    pub has_default: bool,
    pub description: Option<String>,
}

impl ParamDescriptor {
    /// A parameter without a default.
    pub fn required(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: Some(declared_type.into()),
            has_default: false,
            description: None,
        }
    }

    /// A parameter with a default.
    pub fn optional(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            has_default: true,
            ..Self::required(name, declared_type)
        }
    }

    /// A required parameter with no declared type.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: None,
            has_default: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A synthesized parameter: name, type tag, and description.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
}

/// Immutable description of a registered callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSchema {
    /// Registry key.
    pub name: String,
    pub description: String,
    /// Parameters in declaration order.
    pub parameters: Vec<ParamSpec>,
    /// Names of parameters that must be present in every call. Always a
    /// subset of `parameters`.
    pub required_parameters: Vec<String>,
    /// Context keys that must be present for the callable to be eligible.
    pub context_requirements: Vec<String>,
    /// 1-10, higher sorts first among eligible callables.
    pub priority: u8,
    /// Minimum time since the last invocation before the callable is
    /// eligible again.
    pub cooldown: Duration,
}

impl CallSchema {
    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required_parameters.iter().any(|r| r == name)
    }

    /// The parameters as a JSON Schema object, the shape function-calling
    /// APIs expect.
    pub fn parameters_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut prop = p.param_type.json_schema();
                if let Some(obj) = prop.as_object_mut() {
                    obj.insert("description".into(), Value::String(p.description.clone()));
                }
                (p.name.clone(), prop)
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_parameters,
        })
    }

    /// Convert to the wire-level tool definition.
    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters_json_schema(),
        )
    }
}

/// Synthesize the parameter list and required set from descriptors.
///
/// A descriptor without a default is required. A repeated name replaces the
/// earlier declaration in place.
pub fn synthesize(descriptors: &[ParamDescriptor]) -> (Vec<ParamSpec>, Vec<String>) {
    let mut params: Vec<ParamSpec> = Vec::with_capacity(descriptors.len());
    let mut required: Vec<String> = Vec::new();

    for d in descriptors {
        let spec = ParamSpec {
            name: d.name.clone(),
            param_type: d
                .declared_type
                .as_deref()
                .map_or(ParamType::String, ParamType::from_declared),
            description: d
                .description
                .clone()
                .unwrap_or_else(|| format!("Parameter {}", d.name)),
        };

        match params.iter_mut().find(|p| p.name == d.name) {
            Some(existing) => *existing = spec,
            None => params.push(spec),
        }

        required.retain(|r| r != &d.name);
        if !d.has_default {
            required.push(d.name.clone());
        }
    }

    (params, required)
}

/// Derive parameter descriptors from a type implementing
/// `schemars::JsonSchema`.
///
/// Fields that are `Option<_>` or carry `#[serde(default)]` come out
/// optional; doc comments become descriptions. Field types that have no JSON
/// Schema `type` (nested structs behind `$ref`, `serde_json::Value`) are left
/// untyped and therefore treated as strings.
pub fn descriptors_for<T: schemars::JsonSchema>() -> Vec<ParamDescriptor> {
    descriptors_from_json_schema(&crate::json_schema_for::<T>())
}

/// Derive parameter descriptors from an object JSON Schema.
pub fn descriptors_from_json_schema(schema: &Value) -> Vec<ParamDescriptor> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| ParamDescriptor {
            name: name.clone(),
            declared_type: declared_type_name(prop),
            has_default: !required.contains(&name.as_str()),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect()
}

/// Type name of a JSON Schema property, skipping `null` in nullable unions.
/// Arrays become `array<item-type>`.
fn declared_type_name(prop: &Value) -> Option<String> {
    let primary = |v: &Value| -> Option<String> {
        match v.get("type")? {
            Value::String(s) => Some(s.clone()),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null")
                .map(str::to_string),
            _ => None,
        }
    };

    let ty = primary(prop)?;
    if ty == "array" {
        let item = prop
            .get("items")
            .and_then(|items| primary(items))
            .unwrap_or_else(|| "unknown".into());
        Some(format!("array<{item}>"))
    } else {
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[test]
    fn declared_types_map_to_tags() {
        assert_eq!(ParamType::from_declared("str"), ParamType::String);
        assert_eq!(ParamType::from_declared("i64"), ParamType::Integer);
        assert_eq!(ParamType::from_declared("integer"), ParamType::Integer);
        assert_eq!(ParamType::from_declared("f64"), ParamType::Number);
        assert_eq!(ParamType::from_declared("bool"), ParamType::Boolean);
        assert_eq!(ParamType::from_declared("Vec<String>"), ParamType::StringArray);
        assert_eq!(ParamType::from_declared("List[str]"), ParamType::StringArray);
        assert_eq!(ParamType::from_declared("vec<u32>"), ParamType::IntegerArray);
        assert_eq!(ParamType::from_declared("array<integer>"), ParamType::IntegerArray);
        assert_eq!(
            ParamType::from_declared("HashMap<String, Value>"),
            ParamType::Object
        );
    }

    #[test]
    fn unrecognized_types_fall_back_to_string() {
        assert_eq!(ParamType::from_declared("Uuid"), ParamType::String);
        assert_eq!(ParamType::from_declared("Vec<f64>"), ParamType::String);
        assert_eq!(ParamType::from_declared(""), ParamType::String);
    }

    #[test]
    fn tag_names_round_trip_through_from_declared() {
        for tag in [
            ParamType::String,
            ParamType::Integer,
            ParamType::Number,
            ParamType::Boolean,
            ParamType::StringArray,
            ParamType::IntegerArray,
            ParamType::Object,
        ] {
            assert_eq!(ParamType::from_declared(tag.as_str()), tag);
        }
    }

    #[test]
    fn defaults_decide_required() {
        let (params, required) = synthesize(&[
            ParamDescriptor::required("a", "int"),
            ParamDescriptor::optional("b", "int"),
            ParamDescriptor::untyped("c"),
        ]);

        assert_eq!(params.len(), 3);
        assert_eq!(required, vec!["a", "c"]);
        assert_eq!(params[2].param_type, ParamType::String);
        assert_eq!(params[0].description, "Parameter a");
    }

    #[test]
    fn synthesis_is_idempotent() {
        let descriptors = vec![
            ParamDescriptor::required("query", "string").describe("Search text"),
            ParamDescriptor::optional("limit", "u32"),
        ];
        assert_eq!(synthesize(&descriptors), synthesize(&descriptors));
    }

    #[test]
    fn repeated_name_replaces_in_place() {
        let (params, required) = synthesize(&[
            ParamDescriptor::required("x", "int"),
            ParamDescriptor::required("y", "int"),
            ParamDescriptor::optional("x", "bool"),
        ]);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "x");
        assert_eq!(params[0].param_type, ParamType::Boolean);
        assert_eq!(required, vec!["y"]);
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct SearchArgs {
        /// The search query.
        query: String,
        /// Maximum number of results.
        #[serde(default)]
        limit: u32,
        tags: Option<Vec<String>>,
        ids: Vec<i64>,
        weight: f64,
    }

    #[test]
    fn descriptors_from_schemars_type() {
        let descriptors = descriptors_for::<SearchArgs>();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["query", "limit", "tags", "ids", "weight"]);

        let (params, required) = synthesize(&descriptors);
        assert_eq!(required, vec!["query", "ids", "weight"]);
        assert_eq!(params[0].param_type, ParamType::String);
        assert_eq!(params[0].description, "The search query.");
        assert_eq!(params[1].param_type, ParamType::Integer);
        assert_eq!(params[2].param_type, ParamType::StringArray);
        assert_eq!(params[3].param_type, ParamType::IntegerArray);
        assert_eq!(params[4].param_type, ParamType::Number);
    }

    #[test]
    fn json_schema_export_has_properties_and_required() {
        let (parameters, required_parameters) = synthesize(&[
            ParamDescriptor::required("a", "int"),
            ParamDescriptor::optional("tags", "Vec<String>"),
        ]);
        let schema = CallSchema {
            name: "demo".into(),
            description: "Demo".into(),
            parameters,
            required_parameters,
            context_requirements: vec![],
            priority: DEFAULT_PRIORITY,
            cooldown: Duration::ZERO,
        };

        let json = schema.parameters_json_schema();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["a"]["type"], "integer");
        assert_eq!(json["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(json["required"], json!(["a"]));

        let def = schema.to_tool_def();
        assert_eq!(def.function.name, "demo");
        assert_eq!(def.function.parameters, json);
    }
}
