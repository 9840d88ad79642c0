//! Payload Codec
//!
//! Maps the declared fields of an event variant to and from the opaque
//! JSON object stored in the `payload` column.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Stored payload: field name to value, in declaration order.
pub type Payload = serde_json::Map<String, Value>;

static ABSENT: Value = Value::Null;

/// Payload codec errors
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Access to a field the variant never declared
    #[error("Field '{0}' is not declared for this event")]
    UndeclaredField(String),

    /// The value did not serialize to a JSON object
    #[error("Event payload must be a JSON object")]
    NotAnObject,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Declared field list of one event variant.
///
/// Declaring the same field twice keeps a single entry, positioned where it
/// was last declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadCodec {
    fields: Vec<&'static str>,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: &[&'static str]) -> Self {
        fields
            .iter()
            .fold(Self::new(), |codec, field| codec.declare(*field))
    }

    /// Declare one more field
    pub fn declare(mut self, field: &'static str) -> Self {
        self.fields.retain(|declared| *declared != field);
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    pub fn is_declared(&self, field: &str) -> bool {
        self.fields.iter().any(|declared| *declared == field)
    }

    /// Read a declared field. Missing fields (or a missing payload) read as
    /// `null`.
    pub fn get<'p>(
        &self,
        payload: Option<&'p Payload>,
        field: &str,
    ) -> Result<&'p Value, PayloadError> {
        self.check(field)?;
        Ok(payload.and_then(|p| p.get(field)).unwrap_or(&ABSENT))
    }

    /// Write a declared field, creating the payload on first write.
    pub fn set(
        &self,
        payload: &mut Option<Payload>,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), PayloadError> {
        self.check(field)?;
        payload
            .get_or_insert_with(Payload::new)
            .insert(field.to_string(), value.into());
        Ok(())
    }

    /// Keep only declared fields, in declaration order.
    pub fn scope(&self, mut fields: Payload) -> Payload {
        let mut scoped = Payload::new();
        for field in &self.fields {
            if let Some(value) = fields.remove(*field) {
                scoped.insert((*field).to_string(), value);
            }
        }

        if !fields.is_empty() {
            tracing::debug!(
                dropped = ?fields.keys().collect::<Vec<_>>(),
                "Dropping undeclared payload fields"
            );
        }

        scoped
    }

    /// Serialize a variant struct into its payload
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, PayloadError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(self.scope(fields)),
            _ => Err(PayloadError::NotAnObject),
        }
    }

    /// Deserialize a variant struct from its payload; an absent payload
    /// decodes as empty.
    pub fn decode<T: DeserializeOwned>(&self, payload: Option<&Payload>) -> Result<T, PayloadError> {
        let scoped = payload
            .map(|p| self.scope(p.clone()))
            .unwrap_or_default();
        Ok(serde_json::from_value(Value::Object(scoped))?)
    }

    fn check(&self, field: &str) -> Result<(), PayloadError> {
        if self.is_declared(field) {
            Ok(())
        } else {
            Err(PayloadError::UndeclaredField(field.to_string()))
        }
    }
}
