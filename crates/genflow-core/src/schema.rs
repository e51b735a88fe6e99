//! Schema contracts — statically declared input/output shapes for flows.
//!
//! A [`Shape`] is an ordered list of [`FieldSpec`]s describing a JSON object.
//! Shapes are plain data: they can be declared in Rust (see `catalog`) or
//! loaded from YAML alongside a flow definition:
//!
//! ```yaml
//! input:
//!   - name: concept
//!     type: string
//!     required: true
//!   - name: backgroundColor
//!     type: string
//!     format: hex-color
//!   - name: features
//!     type: array
//!     items:
//!       type: string
//! ```
//!
//! [`validate`] is pure: it never rewrites the value it checks, and reports
//! every violation it finds keyed by field path.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::media::MediaAsset;

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?[0-9A-Fa-f]{6}$").expect("hex color pattern compiles"));

/// Ordered set of fields describing a JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    pub fields: Vec<FieldSpec>,
}

/// One named field of a [`Shape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(flatten)]
    pub ty: FieldType,

    #[serde(default)]
    pub required: bool,

    /// Format constraint applied to string values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Primitive or composite type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array {
        items: Box<ItemSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    Object {
        fields: Shape,
    },
}

/// Element description for array fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    #[serde(flatten)]
    pub ty: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
}

/// Format constraints for string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// Six hex digits, optionally prefixed with `#`
    HexColor,
    /// `data:<mime-type>;base64,<payload>`
    DataUri,
    /// Absolute http(s) URL
    Url,
    /// Either a data URI or a URL
    Media,
    /// Not blank after trimming
    NonEmpty,
}

/// A single field-level problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

/// Every violation found while validating one value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.path, v.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Error with a single violation.
    pub fn single(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation {
                path: path.into(),
                reason: reason.into(),
            }],
        }
    }

    /// Violation reported for `path`, if any.
    pub fn reason_for(&self, path: &str) -> Option<&str> {
        self.violations
            .iter()
            .find(|v| v.path == path)
            .map(|v| v.reason.as_str())
    }
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl FieldSpec {
    fn of(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            format: None,
            description: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::of(name, FieldType::String)
    }

    pub fn integer(name: &str) -> Self {
        Self::of(name, FieldType::Integer)
    }

    pub fn number(name: &str) -> Self {
        Self::of(name, FieldType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::of(name, FieldType::Boolean)
    }

    pub fn array(name: &str, items: ItemSpec) -> Self {
        Self::of(
            name,
            FieldType::Array {
                items: Box::new(items),
                min_items: None,
                max_items: None,
            },
        )
    }

    pub fn object(name: &str, fields: Shape) -> Self {
        Self::of(name, FieldType::Object { fields })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Bound the length of an array field. No-op for other types.
    pub fn items_between(mut self, min: usize, max: usize) -> Self {
        if let FieldType::Array {
            min_items,
            max_items,
            ..
        } = &mut self.ty
        {
            *min_items = Some(min);
            *max_items = Some(max);
        }
        self
    }
}

impl ItemSpec {
    pub fn string() -> Self {
        Self {
            ty: FieldType::String,
            format: None,
        }
    }

    pub fn object(fields: Shape) -> Self {
        Self {
            ty: FieldType::Object { fields },
            format: None,
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }
}

/// Validate `value` against `shape`.
///
/// Returns the value unchanged when it conforms. Unknown fields are
/// rejected, `null` counts as absent.
pub fn validate(shape: &Shape, value: &Value) -> Result<Value, ValidationError> {
    let mut violations = Vec::new();
    match value.as_object() {
        Some(map) => check_object(&shape.fields, map, "", &mut violations),
        None => violations.push(Violation {
            path: "$".to_string(),
            reason: format!("expected an object, got {}", type_name(value)),
        }),
    }

    if violations.is_empty() {
        Ok(value.clone())
    } else {
        Err(ValidationError { violations })
    }
}

fn check_object(
    fields: &[FieldSpec],
    map: &Map<String, Value>,
    prefix: &str,
    violations: &mut Vec<Violation>,
) {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match map.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    violations.push(Violation {
                        path,
                        reason: "required field is missing".to_string(),
                    });
                }
            }
            Some(v) => check_value(&field.ty, field.format, v, &path, violations),
        }
    }

    for key in map.keys() {
        if !fields.iter().any(|f| &f.name == key) {
            violations.push(Violation {
                path: join_path(prefix, key),
                reason: "unknown field".to_string(),
            });
        }
    }
}

fn check_value(
    ty: &FieldType,
    format: Option<Format>,
    value: &Value,
    path: &str,
    violations: &mut Vec<Violation>,
) {
    let mismatch = |expected: &str| Violation {
        path: path.to_string(),
        reason: format!("expected {}, got {}", expected, type_name(value)),
    };

    match ty {
        FieldType::String => match value.as_str() {
            Some(s) => {
                if let Some(format) = format {
                    if let Err(reason) = check_format(format, s) {
                        violations.push(Violation {
                            path: path.to_string(),
                            reason,
                        });
                    }
                }
            }
            None => violations.push(mismatch("string")),
        },
        FieldType::Integer => {
            if value.as_i64().is_none() && value.as_u64().is_none() {
                violations.push(mismatch("integer"));
            }
        }
        FieldType::Number => {
            if !value.is_number() {
                violations.push(mismatch("number"));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                violations.push(mismatch("boolean"));
            }
        }
        FieldType::Array {
            items,
            min_items,
            max_items,
        } => match value.as_array() {
            Some(elements) => {
                if let Some(min) = min_items {
                    if elements.len() < *min {
                        violations.push(Violation {
                            path: path.to_string(),
                            reason: format!(
                                "expected at least {} item(s), got {}",
                                min,
                                elements.len()
                            ),
                        });
                    }
                }
                if let Some(max) = max_items {
                    if elements.len() > *max {
                        violations.push(Violation {
                            path: path.to_string(),
                            reason: format!(
                                "expected at most {} item(s), got {}",
                                max,
                                elements.len()
                            ),
                        });
                    }
                }
                for (i, element) in elements.iter().enumerate() {
                    let element_path = format!("{}[{}]", path, i);
                    check_value(&items.ty, items.format, element, &element_path, violations);
                }
            }
            None => violations.push(mismatch("array")),
        },
        FieldType::Object { fields } => match value.as_object() {
            Some(map) => check_object(&fields.fields, map, path, violations),
            None => violations.push(mismatch("object")),
        },
    }
}

fn check_format(format: Format, s: &str) -> Result<(), String> {
    match format {
        Format::HexColor => {
            if HEX_COLOR_RE.is_match(s) {
                Ok(())
            } else {
                Err("must be a 6-digit hex color code".to_string())
            }
        }
        Format::DataUri => MediaAsset::parse_data_uri(s)
            .map(|_| ())
            .map_err(|e| format!("must be a data URI: {}", e)),
        Format::Url => MediaAsset::parse_url(s)
            .map(|_| ())
            .map_err(|e| format!("must be a URL: {}", e)),
        Format::Media => MediaAsset::parse(s)
            .map(|_| ())
            .map_err(|e| format!("must be a data URI or URL: {}", e)),
        Format::NonEmpty => {
            if s.trim().is_empty() {
                Err("must not be empty".to_string())
            } else {
                Ok(())
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product_shape() -> Shape {
        Shape::new()
            .field(FieldSpec::string("productName").required().format(Format::NonEmpty))
            .field(FieldSpec::string("backgroundColor").format(Format::HexColor))
            .field(FieldSpec::array("features", ItemSpec::string()))
            .field(FieldSpec::integer("variation"))
            .field(FieldSpec::object(
                "dimensions",
                Shape::new().field(FieldSpec::number("width").required()),
            ))
    }

    #[test]
    fn test_valid_value_is_returned_unchanged() {
        let value = json!({
            "productName": "Mug",
            "backgroundColor": "#1a2B3c",
            "features": ["ceramic", "350ml"],
            "variation": 2,
            "dimensions": { "width": 8.5 }
        });
        let validated = validate(&product_shape(), &value).unwrap();
        assert_eq!(validated, value);
    }

    #[test]
    fn test_collects_every_violation_by_path() {
        let value = json!({
            "backgroundColor": "ZZZZZZ",
            "features": ["ok", 3],
            "variation": 1.5,
            "dimensions": {},
            "extra": true
        });
        let err = validate(&product_shape(), &value).unwrap_err();

        assert_eq!(err.reason_for("productName"), Some("required field is missing"));
        assert_eq!(
            err.reason_for("backgroundColor"),
            Some("must be a 6-digit hex color code")
        );
        assert_eq!(err.reason_for("features[1]"), Some("expected string, got number"));
        assert_eq!(err.reason_for("variation"), Some("expected integer, got number"));
        assert_eq!(err.reason_for("dimensions.width"), Some("required field is missing"));
        assert_eq!(err.reason_for("extra"), Some("unknown field"));
        assert_eq!(err.violations.len(), 6);
    }

    #[test]
    fn test_null_counts_as_absent() {
        let value = json!({ "productName": "Mug", "backgroundColor": null });
        assert!(validate(&product_shape(), &value).is_ok());

        let value = json!({ "productName": null });
        let err = validate(&product_shape(), &value).unwrap_err();
        assert_eq!(err.reason_for("productName"), Some("required field is missing"));
    }

    #[test]
    fn test_non_object_rejected_at_root() {
        let err = validate(&product_shape(), &json!("Mug")).unwrap_err();
        assert_eq!(err.reason_for("$"), Some("expected an object, got string"));
    }

    #[test]
    fn test_array_bounds() {
        let shape = Shape::new().field(
            FieldSpec::array("logos", ItemSpec::string().format(Format::Media))
                .required()
                .items_between(3, 3),
        );
        let err =
            validate(&shape, &json!({ "logos": ["https://cdn.example.com/a.png"] })).unwrap_err();
        assert_eq!(err.reason_for("logos"), Some("expected at least 3 item(s), got 1"));

        let err = validate(&shape, &json!({ "logos": ["a", "b", "c"] })).unwrap_err();
        assert!(err.reason_for("logos[0]").unwrap().starts_with("must be a data URI or URL"));
    }

    #[test]
    fn test_parse_shape_from_yaml() {
        let yaml = r#"
- name: image
  type: string
  required: true
  format: data-uri
- name: features
  type: array
  items:
    type: string
  max_items: 5
"#;
        let shape: Shape = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(shape.fields.len(), 2);
        assert_eq!(shape.fields[0].format, Some(Format::DataUri));
        assert!(shape.fields[0].required);
        assert!(matches!(
            shape.fields[1].ty,
            FieldType::Array { max_items: Some(5), .. }
        ));
    }
}
