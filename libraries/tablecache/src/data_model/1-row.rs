//! # Row
//! A row is an arbitrary JSON object belonging to one table. The only field the cache looks at is `id`.
//! Backends hand out ids as numbers or as numeric strings (`5` vs `"5"`), and both must address the same row.
//! So the id is coerced to a [`RowId`] exactly once, when the row enters the cache, and every later comparison
//! is a plain integer comparison.

use std::fmt;

use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(i64);

impl RowId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Coerces a JSON id into its canonical numeric form.
    pub fn from_json(value: &Value) -> Result<Self, RowError> {
        match value {
            Value::Number(number) => {
                if let Some(id) = number.as_i64() {
                    return Ok(Self(id));
                }
                match number.as_f64() {
                    Some(id) if id.fract() == 0.0 && id.abs() < i64::MAX as f64 => {
                        Ok(Self(id as i64))
                    }
                    _ => Err(RowError::InvalidId(value.clone())),
                }
            }
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Self)
                .map_err(|_| RowError::InvalidId(value.clone())),
            _ => Err(RowError::InvalidId(value.clone())),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("row payload is not a JSON object: {0}")]
    NotAnObject(Value),
    #[error("row has no `id` field")]
    MissingId,
    #[error("row id {0} cannot be read as a number")]
    InvalidId(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    id: RowId,
    /// Every column except `id`.
    fields: Map<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<RowId>, fields: Map<String, Value>) -> Self {
        let mut fields = fields;
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn from_json(value: Value) -> Result<Self, RowError> {
        let Value::Object(mut fields) = value else {
            return Err(RowError::NotAnObject(value));
        };
        let id = fields.remove("id").ok_or(RowError::MissingId)?;
        let id = RowId::from_json(&id)?;
        Ok(Self { id, fields })
    }

    /// Converts a bulk read result (a JSON array of objects) into rows.
    pub fn many_from_json(value: Value) -> Result<Vec<Self>, RowError> {
        match value {
            Value::Array(values) => values.into_iter().map(Self::from_json).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(RowError::NotAnObject(other)),
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        if column == "id" {
            return None;
        }
        self.fields.get(column)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("id".to_string(), Value::from(self.id.0));
        object.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(object)
    }
}

impl serde::Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Row {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Row::from_json(value).map_err(serde::de::Error::custom)
    }
}
