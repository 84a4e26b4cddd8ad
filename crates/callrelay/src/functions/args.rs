//! Argument parsing for textual function calls.
//!
//! A call carries its arguments as the raw text after the second colon of
//! `FUNCTION:<name>:<arguments>`. Each definition owns an [`ArgumentParser`]
//! that turns that text into a JSON value. Parsed values can optionally be
//! checked against a JSON Schema with [`validate_arguments`].

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Closure-based parser for definitions registered from code.
pub type ParseFn = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

fn default_field() -> String {
    "input".into()
}

fn default_separator() -> String {
    "|".into()
}

/// How the raw argument text of a call becomes structured arguments.
///
/// Deserializes from configuration as `{"format": "text", "field": "query"}`,
/// `{"format": "json"}`, `{"format": "auto"}` or
/// `{"format": "delimited", "separator": ",", "fields": ["a", "b"]}`.
#[derive(Clone, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ArgumentParser {
    /// The whole raw text becomes `{field: raw}`.
    Text {
        #[serde(default = "default_field")]
        field: String,
    },
    /// The raw text must be a JSON object. Empty text parses as `{}`.
    Json,
    /// A JSON object if the text parses as one, otherwise `{field: raw}`.
    Auto {
        #[serde(default = "default_field")]
        field: String,
    },
    /// Positional values split on `separator`. The last field takes the
    /// remainder, so it may itself contain the separator.
    Delimited {
        #[serde(default = "default_separator")]
        separator: String,
        fields: Vec<String>,
    },
    #[serde(skip)]
    Custom(ParseFn),
}

impl Default for ArgumentParser {
    fn default() -> Self {
        Self::Auto {
            field: default_field(),
        }
    }
}

impl fmt::Debug for ArgumentParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { field } => f.debug_struct("Text").field("field", field).finish(),
            Self::Json => f.write_str("Json"),
            Self::Auto { field } => f.debug_struct("Auto").field("field", field).finish(),
            Self::Delimited { separator, fields } => f
                .debug_struct("Delimited")
                .field("separator", separator)
                .field("fields", fields)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl ArgumentParser {
    pub fn text(field: impl Into<String>) -> Self {
        Self::Text {
            field: field.into(),
        }
    }

    pub fn delimited(separator: impl Into<String>, fields: &[&str]) -> Self {
        Self::Delimited {
            separator: separator.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    pub fn custom<F>(parse: F) -> Self
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(parse))
    }

    /// Parse raw argument text.
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        match self {
            Self::Text { field } => Ok(single_field(field, raw)),
            Self::Json => parse_object(raw),
            Self::Auto { field } => {
                let trimmed = raw.trim();
                if trimmed.starts_with('{')
                    && let Ok(value) = parse_object(trimmed)
                {
                    return Ok(value);
                }
                Ok(single_field(field, raw))
            }
            Self::Delimited { separator, fields } => parse_delimited(raw, separator, fields),
            Self::Custom(parse) => parse(raw),
        }
    }

    /// Short argument syntax shown in the prompt's function catalog.
    pub fn hint(&self) -> String {
        match self {
            Self::Text { field } => format!("<{field}>"),
            Self::Json => "{json object}".into(),
            Self::Auto { field } => format!("<{field}> or {{json object}}"),
            Self::Delimited { separator, fields } => fields
                .iter()
                .map(|f| format!("<{f}>"))
                .collect::<Vec<_>>()
                .join(separator),
            Self::Custom(_) => "<arguments>".into(),
        }
    }
}

fn single_field(field: &str, raw: &str) -> Value {
    let mut map = Map::new();
    map.insert(field.to_string(), Value::String(raw.trim().to_string()));
    Value::Object(map)
}

fn parse_object(raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err("arguments must be a JSON object".into()),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}

fn parse_delimited(raw: &str, separator: &str, fields: &[String]) -> Result<Value, String> {
    if fields.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let parts: Vec<&str> = if separator.is_empty() {
        vec![raw]
    } else {
        raw.splitn(fields.len(), separator).collect()
    };
    if parts.len() < fields.len() {
        return Err(format!(
            "expected {} arguments separated by '{separator}', got {}",
            fields.len(),
            parts.len()
        ));
    }
    let map = fields
        .iter()
        .zip(parts)
        .map(|(field, part)| (field.clone(), Value::String(part.trim().to_string())))
        .collect();
    Ok(Value::Object(map))
}

// ── Schema validation ──────────────────────────────────────────────

/// Validate parsed arguments against a JSON Schema.
///
/// An invalid schema is not an error here: it is reported when the
/// definition is built from configuration.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("argument validation failed: {}", errors.join("; ")))
    }
}

/// Check that a schema compiles.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    jsonschema::validator_for(schema)
        .map(|_| ())
        .map_err(|e| format!("invalid parameters schema: {e}"))
}

// ── Templates ──────────────────────────────────────────────────────

/// Substitute `{{key}}` placeholders with top-level argument values.
///
/// Strings are inserted verbatim, `null` as nothing, anything else as its
/// JSON text. Placeholders without a matching argument are removed.
/// Substituted text is never scanned again, so braces inside argument
/// values survive as written.
pub fn render_template(template: &str, args: &Value) -> String {
    render_template_with(template, args, |s| s.to_string())
}

/// [`render_template`] with every substituted value passed through `encode`
/// (e.g. [`percent_encode`] for URLs).
pub fn render_template_with(template: &str, args: &Value, encode: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once("{{") {
        out.push_str(before);
        let Some((key, remainder)) = after.split_once("}}") else {
            // Unclosed: keep the rest literally.
            out.push_str("{{");
            rest = after;
            break;
        };
        match args.get(key) {
            Some(Value::String(s)) => out.push_str(&encode(s)),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&encode(&other.to_string())),
        }
        rest = remainder;
    }
    out.push_str(rest);

    out.trim().to_string()
}

/// Percent-encoding for values interpolated into URLs.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_wraps_trimmed_raw() {
        let parser = ArgumentParser::text("message");
        assert_eq!(
            parser.parse("  Build complete ").unwrap(),
            json!({"message": "Build complete"})
        );
    }

    #[test]
    fn json_requires_object() {
        assert_eq!(
            ArgumentParser::Json.parse(r#"{"a": 1}"#).unwrap(),
            json!({"a": 1})
        );
        assert!(ArgumentParser::Json.parse("[1, 2]").is_err());
        assert!(ArgumentParser::Json.parse("not json").is_err());
        assert_eq!(ArgumentParser::Json.parse("").unwrap(), json!({}));
    }

    #[test]
    fn auto_falls_back_to_text() {
        let parser = ArgumentParser::default();
        assert_eq!(parser.parse(r#"{"q": "x"}"#).unwrap(), json!({"q": "x"}));
        assert_eq!(parser.parse("{broken").unwrap(), json!({"input": "{broken"}));
        assert_eq!(parser.parse("plain").unwrap(), json!({"input": "plain"}));
    }

    #[test]
    fn delimited_last_field_keeps_remainder() {
        let parser = ArgumentParser::delimited(":", &["host", "note"]);
        assert_eq!(
            parser.parse("example.com:a:b").unwrap(),
            json!({"host": "example.com", "note": "a:b"})
        );
        let err = parser.parse("only-one").unwrap_err();
        assert!(err.contains("expected 2 arguments"));
    }

    #[test]
    fn custom_parser_errors_propagate() {
        let parser = ArgumentParser::custom(|raw| {
            raw.parse::<i64>()
                .map(|n| json!({"n": n}))
                .map_err(|e| e.to_string())
        });
        assert_eq!(parser.parse("42").unwrap(), json!({"n": 42}));
        assert!(parser.parse("x").is_err());
    }

    #[test]
    fn parser_deserializes_from_config() {
        let parser: ArgumentParser =
            serde_json::from_value(json!({"format": "delimited", "fields": ["a", "b"]})).unwrap();
        assert_eq!(parser.hint(), "<a>|<b>");
        let parser: ArgumentParser = serde_json::from_value(json!({"format": "text"})).unwrap();
        assert_eq!(parser.hint(), "<input>");
    }

    #[test]
    fn schema_validation_reports_path() {
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
            "required": ["count"]
        });
        assert!(validate_arguments(&schema, &json!({"count": 3})).is_ok());
        let err = validate_arguments(&schema, &json!({"count": "three"})).unwrap_err();
        assert!(err.contains("/count"));
        assert!(validate_arguments(&schema, &json!({})).is_err());
    }

    #[test]
    fn template_substitutes_and_strips() {
        let args = json!({"host": "example.com", "count": 3, "none": null});
        assert_eq!(
            render_template("ping -c {{count}} {{host}}{{none}} {{missing}}", &args),
            "ping -c 3 example.com"
        );
    }

    #[test]
    fn template_leaves_argument_text_alone() {
        assert_eq!(
            render_template("echo {{msg}}", &json!({"msg": "use {{name}} here", "name": "x"})),
            "echo use {{name}} here"
        );
        assert_eq!(
            render_template("echo {{a}}", &json!({"a": "{{b}}", "b": "secret"})),
            "echo {{b}}"
        );
    }

    #[test]
    fn template_keeps_unclosed_braces() {
        assert_eq!(render_template("a {{b", &json!({})), "a {{b");
    }

    #[test]
    fn url_template_encodes_values() {
        let args = json!({"q": "rust lang&more"});
        assert_eq!(
            render_template_with("https://api.test/search?q={{q}}", &args, percent_encode),
            "https://api.test/search?q=rust%20lang%26more"
        );
    }
}
