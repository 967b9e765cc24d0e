//! World objects and the delta records that update them.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Object identifier, assigned by the server.
pub type ObjectId = String;

/// Separator between the positional fields of an encoded delta.
pub const FIELD_SEPARATOR: char = ';';

/// Number of positional fields before the free-form attributes.
const POSITIONAL_FIELDS: usize = 7;

/// Free-form attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Numeric-looking value.
    Number(f64),
    /// Anything else, kept verbatim.
    Text(String),
}

impl AttrValue {
    /// Numeric-looking values become numbers, everything else stays text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A mirrored world object.
///
/// Identity is `id`. Every other field is updated in place by
/// [`ObjectGraphStore::apply_delta`](crate::ObjectGraphStore::apply_delta).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    /// Unique object identifier.
    pub id: ObjectId,
    /// Parent object, `None` for a root.
    pub parent_id: Option<ObjectId>,
    /// Object type, e.g. `player` or `item`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Quality in `[0, 1]`.
    pub quality: f64,
    /// Damage in `[0, 1]`.
    pub damage: f64,
    /// Weight.
    pub weight: f64,
    /// Free-form attributes.
    #[serde(default)]
    pub extra: HashMap<String, AttrValue>,
}

impl GameObject {
    /// Create a record seeded only with its id.
    #[must_use]
    pub fn new(id: impl Into<ObjectId>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            kind: String::new(),
            name: String::new(),
            quality: 0.0,
            damage: 0.0,
            weight: 0.0,
            extra: HashMap::new(),
        }
    }

    /// `"<type> <name>"`, the label views show for an object.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.name)
    }

    /// Get a free-form attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.extra.get(key)
    }

    /// Merge the non-parent fields of a delta into this record.
    pub(crate) fn merge(&mut self, delta: &DeltaRecord) {
        if let Some(kind) = &delta.kind {
            self.kind.clone_from(kind);
        }
        if let Some(name) = &delta.name {
            self.name.clone_from(name);
        }
        if let Some(quality) = delta.quality {
            self.quality = quality;
        }
        if let Some(damage) = delta.damage {
            self.damage = damage;
        }
        if let Some(weight) = delta.weight {
            self.weight = weight;
        }
        for (key, value) in &delta.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Delta parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("Delta has {found} fields, expected at least {expected}")]
    MissingFields { found: usize, expected: usize },
    #[error("Delta has an empty object id")]
    MissingId,
    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Malformed attribute: {0:?}")]
    MalformedAttribute(String),
}

/// A partial or full update to one object plus its current parent.
///
/// Positional encoding:
/// `parent_id;id;type;name;quality;damage;weight;key1=val1;key2=val2;...`
///
/// An empty `parent_id` means the object is a root. Other empty positional
/// fields leave the stored value unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub id: ObjectId,
    pub parent_id: Option<ObjectId>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub quality: Option<f64>,
    pub damage: Option<f64>,
    pub weight: Option<f64>,
    pub extra: Vec<(String, AttrValue)>,
}

impl DeltaRecord {
    /// Create a delta that only asserts the object's parent.
    #[must_use]
    pub fn new(id: impl Into<ObjectId>, parent_id: Option<ObjectId>) -> Self {
        Self {
            id: id.into(),
            parent_id,
            kind: None,
            name: None,
            quality: None,
            damage: None,
            weight: None,
            extra: Vec::new(),
        }
    }

    /// Parse the positional encoding.
    ///
    /// # Errors
    /// Returns error if the record is truncated, has no id, carries a
    /// non-finite number, or has an attribute without `=`.
    pub fn parse(encoded: &str) -> Result<Self, DeltaError> {
        let parts: Vec<&str> = encoded.split(FIELD_SEPARATOR).collect();
        if parts.len() < POSITIONAL_FIELDS {
            return Err(DeltaError::MissingFields {
                found: parts.len(),
                expected: POSITIONAL_FIELDS,
            });
        }

        let id = parts[1].trim();
        if id.is_empty() {
            return Err(DeltaError::MissingId);
        }

        let mut extra = Vec::new();
        for piece in &parts[POSITIONAL_FIELDS..] {
            if piece.is_empty() {
                continue;
            }
            match piece.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    extra.push((key.to_string(), AttrValue::parse(value)));
                }
                _ => return Err(DeltaError::MalformedAttribute((*piece).to_string())),
            }
        }

        Ok(Self {
            id: id.to_string(),
            parent_id: non_empty(parts[0].trim()),
            kind: non_empty(parts[2]),
            name: non_empty(parts[3]),
            quality: parse_number("quality", parts[4])?.map(unit_interval),
            damage: parse_number("damage", parts[5])?.map(unit_interval),
            weight: parse_number("weight", parts[6])?,
            extra,
        })
    }

    /// Encode back into the positional form.
    #[must_use]
    pub fn encode(&self) -> String {
        let number = |n: Option<f64>| n.map(|n| n.to_string()).unwrap_or_default();
        let mut fields = vec![
            self.parent_id.clone().unwrap_or_default(),
            self.id.clone(),
            self.kind.clone().unwrap_or_default(),
            self.name.clone().unwrap_or_default(),
            number(self.quality),
            number(self.damage),
            number(self.weight),
        ];
        fields.extend(self.extra.iter().map(|(k, v)| format!("{k}={v}")));
        fields.join(&FIELD_SEPARATOR.to_string())
    }
}

impl FromStr for DeltaRecord {
    type Err = DeltaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn non_empty(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn parse_number(field: &'static str, raw: &str) -> Result<Option<f64>, DeltaError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(DeltaError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

fn unit_interval(n: f64) -> f64 {
    n.clamp(0.0, 1.0)
}
