//! Configuration fields of backends and authentication mechanisms.

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Value type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// Free text
    Text,
    /// Checkbox
    Boolean,
    /// Secret, rendered masked
    Password,
    /// Not shown to the user
    Hidden,
}

impl ParameterType {
    /// Numeric code used in the structured wire form
    pub fn code(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Boolean => 1,
            Self::Password => 2,
            Self::Hidden => 3,
        }
    }

    fn legacy_prefix(self) -> &'static str {
        match self {
            Self::Text => "",
            Self::Boolean => "!",
            Self::Password => "*",
            Self::Hidden => "#",
        }
    }
}

impl Serialize for ParameterType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One configuration field.
///
/// Parameters are declared once, when a backend is registered, and never
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionParameter {
    name: String,
    #[serde(rename = "value")]
    text: String,
    #[serde(rename = "type")]
    value_type: ParameterType,
    #[serde(rename = "flags", serialize_with = "serialize_optional_flag")]
    optional: bool,
}

fn serialize_optional_flag<S: Serializer>(optional: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*optional))
}

impl DefinitionParameter {
    /// Required text parameter
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            value_type: ParameterType::Text,
            optional: false,
        }
    }

    /// Change the value type
    #[must_use]
    pub fn with_type(mut self, value_type: ParameterType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Mark as optional
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Shorthand for a boolean parameter
    #[must_use]
    pub fn boolean(self) -> Self {
        self.with_type(ParameterType::Boolean)
    }

    /// Shorthand for a password parameter
    #[must_use]
    pub fn password(self) -> Self {
        self.with_type(ParameterType::Password)
    }

    /// Shorthand for a hidden parameter
    #[must_use]
    pub fn hidden(self) -> Self {
        self.with_type(ParameterType::Hidden)
    }

    /// Option key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable label
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Value type
    pub fn value_type(&self) -> ParameterType {
        self.value_type
    }

    /// Whether a value may be left out
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Label in the legacy prefixed form.
    ///
    /// `!` boolean, `*` password, `#` hidden; optional parameters get an
    /// additional leading `&`.
    pub fn legacy_text(&self) -> String {
        let mut out = String::new();
        if self.optional {
            out.push('&');
        }
        out.push_str(self.value_type.legacy_prefix());
        out.push_str(&self.text);
        out
    }

    /// Check a value against this parameter.
    ///
    /// Optional parameters accept anything. Boolean parameters require a
    /// JSON boolean. Everything else must be non-empty.
    pub fn validate_value(&self, value: Option<&Value>) -> bool {
        if self.optional {
            return true;
        }
        match self.value_type {
            ParameterType::Boolean => matches!(value, Some(Value::Bool(_))),
            _ => value.is_some_and(|v| !is_empty_value(v)),
        }
    }
}

/// Emptiness in the loose sense used by form input: null, `""`, `"0"`,
/// `false`, zero, and empty collections are empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
