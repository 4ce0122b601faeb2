use jsonschema::Validator;
use serde_json::{Map, Value};

use crate::error::{MappingError, Result};

/// JSON Schema (2020-12) every profile document must satisfy.
pub const PROFILE_SCHEMA: &str = r##"{
    "$schema": "https://json-schema.org/draft/2020-12/schema",
    "type": "object",
    "required": ["device"],
    "properties": {
        "device": { "type": "string", "minLength": 1 },
        "battery": {
            "type": "object",
            "properties": {
                "percentage_dp": { "$ref": "#/$defs/optional_dp" },
                "state_dp": { "$ref": "#/$defs/optional_dp" },
                "voltage_dp": { "$ref": "#/$defs/optional_dp" },
                "low_threshold": { "type": "number", "minimum": 0, "maximum": 100 },
                "config": {
                    "type": "object",
                    "properties": {
                        "chemistry": { "type": "string" },
                        "min_voltage": { "type": "number" },
                        "max_voltage": { "type": "number" }
                    }
                }
            }
        },
        "heuristic_battery_threshold": { "type": "integer", "minimum": 0, "maximum": 255 },
        "datapoints": {
            "type": "array",
            "items": { "$ref": "#/$defs/mapping" }
        }
    },
    "$defs": {
        "optional_dp": {
            "type": ["integer", "null"],
            "minimum": 1,
            "maximum": 200
        },
        "mapping": {
            "type": "object",
            "required": ["dp"],
            "properties": {
                "dp": { "type": "integer", "minimum": 1, "maximum": 200 },
                "attribute": { "type": ["string", "null"] },
                "transform": { "$ref": "#/$defs/transform" },
                "valid": {
                    "type": "object",
                    "properties": {
                        "min": { "type": "number" },
                        "max": { "type": "number" }
                    }
                }
            }
        },
        "transform": {
            "type": "object",
            "required": ["kind"],
            "properties": {
                "kind": { "enum": ["identity", "scale", "bool", "invert_bool", "enum_map"] },
                "divisor": { "type": "number" },
                "values": {
                    "type": "object",
                    "propertyNames": { "pattern": "^[0-9]+$" },
                    "additionalProperties": { "type": "string" }
                }
            },
            "if": { "properties": { "kind": { "const": "scale" } } },
            "then": { "required": ["divisor"] },
            "else": {
                "if": { "properties": { "kind": { "const": "enum_map" } } },
                "then": { "required": ["values"] }
            }
        }
    }
}"##;

/// Compile the profile schema, closing every object schema when `strict`.
pub(crate) fn compile_profile_schema(strict: bool) -> Result<Validator> {
    let mut schema: Value = serde_json::from_str(PROFILE_SCHEMA)?;
    if strict {
        close_objects(&mut schema);
    }
    jsonschema::validator_for(&schema).map_err(|err| MappingError::CompileFailed(err.to_string()))
}

pub(crate) fn validate_document(source_name: &str, document: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(document);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(MappingError::InvalidProfile {
            source_name: source_name.to_string(),
            message,
        });
    }
    Ok(())
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for key in ["properties", "$defs"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(close_objects);
                }
            }
            if let Some(items) = map.get_mut("items") {
                close_objects(items);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    matches!(map.get("type"), Some(Value::String(kind)) if kind == "object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_schema_compiles_both_ways() {
        assert!(compile_profile_schema(false).is_ok());
        assert!(compile_profile_schema(true).is_ok());
    }

    #[test]
    fn accepts_full_document() {
        let validator = compile_profile_schema(true).unwrap();
        let doc = json!({
            "device": "acme:trv",
            "battery": { "percentage_dp": null, "voltage_dp": 35, "low_threshold": 15 },
            "datapoints": [
                { "dp": 2, "attribute": "target_temperature", "transform": { "kind": "scale", "divisor": 10 } },
                { "dp": 4, "attribute": "thermostat_mode", "transform": { "kind": "enum_map", "values": { "0": "auto" } } },
                { "dp": 107 }
            ]
        });
        assert!(validate_document("acme", &doc, &validator).is_ok());
    }

    #[test]
    fn rejects_out_of_range_dp_and_missing_divisor() {
        let validator = compile_profile_schema(false).unwrap();
        let bad_dp = json!({ "device": "x", "datapoints": [{ "dp": 201 }] });
        assert!(matches!(
            validate_document("x", &bad_dp, &validator),
            Err(MappingError::InvalidProfile { .. })
        ));

        let no_divisor = json!({
            "device": "x",
            "datapoints": [{ "dp": 1, "transform": { "kind": "scale" } }]
        });
        assert!(validate_document("x", &no_divisor, &validator).is_err());
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let doc = json!({ "device": "x", "vendor_notes": "n/a" });
        let permissive = compile_profile_schema(false).unwrap();
        let strict = compile_profile_schema(true).unwrap();
        assert!(validate_document("x", &doc, &permissive).is_ok());
        assert!(validate_document("x", &doc, &strict).is_err());

        let nested = json!({ "device": "x", "datapoints": [{ "dp": 1, "scale": 10 }] });
        assert!(validate_document("x", &nested, &strict).is_err());
    }
}
