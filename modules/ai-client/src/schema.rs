use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Types that can be requested from the model as a forced tool call.
///
/// The generated schema is closed (`additionalProperties: false`), lists every
/// property as required (optional fields stay nullable) and has all `$ref`s
/// inlined, which is what strict tool-input validation accepts.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn input_schema() -> Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        let definitions = match &mut value {
            Value::Object(map) => map.remove("definitions"),
            _ => None,
        };
        if let Some(defs) = definitions {
            inline_refs(&mut value, &defs);
        }
        close_objects(&mut value);

        if let Value::Object(map) = &mut value {
            map.remove("$schema");
        }
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
                let keys = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(required_keys);
                if let Some(keys) = keys {
                    map.insert("required".into(), Value::Array(keys));
                }
            }
            for (_, child) in map.iter_mut() {
                close_objects(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn required_keys(props: &Map<String, Value>) -> Vec<Value> {
    props.keys().cloned().map(Value::String).collect()
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let referenced = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(def) = referenced {
                *value = def;
                inline_refs(value, definitions);
                return;
            }

            let single_all_of = match map.get("allOf") {
                Some(Value::Array(parts)) if parts.len() == 1 => parts.first().cloned(),
                _ => None,
            };
            if let Some(inner) = single_all_of {
                *value = inner;
                inline_refs(value, definitions);
                return;
            }

            for (_, child) in map.iter_mut() {
                inline_refs(child, definitions);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, definitions)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Verdicts {
        relevant: Vec<bool>,
        note: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Entry {
        headline: String,
        implication: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Report {
        summary: String,
        entries: Vec<Entry>,
    }

    #[test]
    fn optional_fields_are_still_required() {
        let schema = Verdicts::input_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"relevant"));
        assert!(required.contains(&"note"));
        assert_eq!(schema["additionalProperties"], Value::Bool(false));
    }

    #[test]
    fn nested_definitions_are_inlined() {
        let schema = Report::input_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());

        let entry = &schema["properties"]["entries"]["items"];
        assert_eq!(entry["type"], "object");
        assert_eq!(entry["additionalProperties"], Value::Bool(false));
    }
}
