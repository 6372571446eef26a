use anyhow::{bail, Context, Result};
use serde_json::{Map, Number, Value};
use types::{Array, Dictionary, Variant};

/// Parses one command line argument. Anything that is not valid JSON is
/// taken as a plain string, so `hello` and `"hello"` mean the same thing.
pub fn parse_arg(text: &str) -> Result<Variant> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => from_json(&value),
        Err(_) => Ok(Variant::String(text.to_string())),
    }
}

pub fn from_json(value: &Value) -> Result<Variant> {
    Ok(match value {
        Value::Null => Variant::Nil,
        Value::Bool(b) => Variant::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Variant::Int(i),
            None => Variant::Float(n.as_f64().with_context(|| format!("number {n} out of range"))?),
        },
        Value::String(s) => Variant::String(s.clone()),
        Value::Array(items) => {
            let items = items.iter().map(from_json).collect::<Result<Vec<_>>>()?;
            Variant::Array(Array::from_vec(items))
        }
        Value::Object(entries) => {
            let dict = Dictionary::new();
            for (key, value) in entries {
                dict.set(Variant::String(key.clone()), from_json(value)?);
            }
            Variant::Dictionary(dict)
        }
    })
}

/// Renders a guest result as JSON. Packed bytes become a hex string and
/// types without a JSON counterpart fall back to their display form.
pub fn to_json(variant: &Variant) -> Result<Value> {
    Ok(match variant {
        Variant::Nil => Value::Null,
        Variant::Bool(b) => Value::Bool(*b),
        Variant::Int(i) => Value::Number((*i).into()),
        Variant::Float(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => bail!("{f} has no JSON representation"),
        },
        Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => Value::String(s.clone()),
        Variant::Array(items) => Value::Array(items.items().iter().map(to_json).collect::<Result<_>>()?),
        Variant::Dictionary(dict) => {
            let mut map = Map::new();
            for (key, value) in dict.keys().iter().zip(dict.values()) {
                map.insert(key.to_string(), to_json(&value)?);
            }
            Value::Object(map)
        }
        Variant::PackedByteArray(bytes) => Value::String(hex::encode(bytes)),
        other => Value::String(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_keep_their_kind() {
        assert_eq!(parse_arg("42").unwrap(), Variant::Int(42));
        assert_eq!(parse_arg("-1.5").unwrap(), Variant::Float(-1.5));
        assert_eq!(parse_arg("true").unwrap(), Variant::Bool(true));
        assert_eq!(parse_arg("null").unwrap(), Variant::Nil);
    }

    #[test]
    fn test_bare_words_are_strings() {
        assert_eq!(parse_arg("hello").unwrap(), Variant::from("hello"));
        assert_eq!(parse_arg("\"hello\"").unwrap(), Variant::from("hello"));
    }

    #[test]
    fn test_nested_containers() {
        let value = parse_arg(r#"{"xs": [1, 2], "name": "n"}"#).unwrap();
        let dict = value.as_dictionary().unwrap();
        let xs = dict.get(&Variant::from("xs")).unwrap();
        assert_eq!(xs.as_array().unwrap().to_vec(), vec![Variant::Int(1), Variant::Int(2)]);

        let back = to_json(&value).unwrap();
        assert_eq!(back["name"], Value::String("n".into()));
        assert_eq!(back["xs"][1], Value::Number(2.into()));
    }

    #[test]
    fn test_bytes_render_as_hex() {
        let json = to_json(&Variant::PackedByteArray(vec![0xde, 0xad])).unwrap();
        assert_eq!(json, Value::String("dead".into()));
        assert!(to_json(&Variant::Float(f64::NAN)).is_err());
    }
}
