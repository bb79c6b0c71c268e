//! Property (column) definitions consumed from the model schema.

use crate::value::Value;

/// Declared storage type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyType {
    /// Free text
    #[default]
    Text,
    /// Floating point number
    Number,
    /// Whole number
    Integer,
    /// True / false
    Boolean,
    /// Point in time (microseconds since epoch)
    Date,
    /// One of a fixed set of text values
    Enum(Vec<String>),
    /// Arbitrary JSON document
    Object,
    /// Raw bytes
    Binary,
    /// Auto-generated integer identity
    Serial,
}

impl PropertyType {
    /// Name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Enum(_) => "enum",
            PropertyType::Object => "object",
            PropertyType::Binary => "binary",
            PropertyType::Serial => "serial",
        }
    }
}

/// Metadata about one model property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Field name on the instance
    pub name: String,
    /// Declared type
    pub kind: PropertyType,
    /// Whether a null value fails validation of declared rules
    pub required: bool,
    /// Whether this property is (part of) the identity key
    pub key: bool,
    /// Value used to fill the slot when the payload does not carry one
    pub default_value: Option<Value>,
}

impl Property {
    /// Create a new property with minimal required data.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            key: false,
            default_value: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Date)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Object)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Binary)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            PropertyType::Enum(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Auto-generated identity column; implies `key`.
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Serial).key()
    }

    /// Mark as part of the identity key.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default slot value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Whether the store generates the value when none is supplied.
    pub fn is_serial(&self) -> bool {
        self.kind == PropertyType::Serial
    }

    /// Normalize `value` to this property's declared type.
    ///
    /// Conversions that cannot be performed leave the value unchanged; type
    /// enforcement belongs to validation rules, not to normalization.
    #[allow(clippy::cast_possible_truncation)]
    pub fn normalize(&self, value: Value) -> Value {
        match (&self.kind, value) {
            (_, Value::Null) => Value::Null,
            (PropertyType::Integer | PropertyType::Serial, Value::Text(s)) => {
                match s.trim().parse::<i64>() {
                    Ok(v) => Value::BigInt(v),
                    Err(_) => Value::Text(s),
                }
            }
            (PropertyType::Integer | PropertyType::Serial, Value::Double(v))
                if v.fract() == 0.0 && v.is_finite() =>
            {
                Value::BigInt(v as i64)
            }
            (PropertyType::Number, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(v) => Value::Double(v),
                Err(_) => Value::Text(s),
            },
            (PropertyType::Number, Value::Decimal(s)) => match s.parse::<f64>() {
                Ok(v) => Value::Double(v),
                Err(_) => Value::Decimal(s),
            },
            (PropertyType::Boolean, Value::BigInt(v)) => Value::Bool(v != 0),
            (PropertyType::Boolean, Value::Text(s)) => match s.as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::Text(s),
            },
            (PropertyType::Date, Value::BigInt(v)) => Value::Timestamp(v),
            (PropertyType::Text, Value::BigInt(v)) => Value::Text(v.to_string()),
            (PropertyType::Text, Value::Double(v)) => Value::Text(v.to_string()),
            (PropertyType::Object, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(s),
            },
            (_, other) => other,
        }
    }
}
