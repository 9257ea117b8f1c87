//! Typed, defaulted settings backed by an ordered field schema.

use crate::filter::SelectOption;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One field descriptor in the settings schema.
///
/// The discriminant is the `type` string on the wire, so schemas and
/// persisted settings from earlier releases keep deserializing unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingField {
    Text {
        id: String,
        label: String,
        #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
    Number {
        id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
        #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
        default_value: Option<f64>,
    },
    Select {
        id: String,
        label: String,
        options: Vec<SelectOption>,
        #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
    Checkbox {
        id: String,
        label: String,
        #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
        default_value: Option<bool>,
    },
    Radio {
        id: String,
        label: String,
        #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
        default_value: Option<bool>,
    },
}

impl SettingField {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. }
            | Self::Number { id, .. }
            | Self::Select { id, .. }
            | Self::Checkbox { id, .. }
            | Self::Radio { id, .. } => id,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Text { label, .. }
            | Self::Number { label, .. }
            | Self::Select { label, .. }
            | Self::Checkbox { label, .. }
            | Self::Radio { label, .. } => label,
        }
    }

    /// The schema default as a stored value, if the field declares one.
    #[must_use]
    pub fn default_value(&self) -> Option<SettingValue> {
        match self {
            Self::Text { default_value, .. } | Self::Select { default_value, .. } => {
                default_value.clone().map(SettingValue::Text)
            }
            Self::Number { default_value, .. } => default_value.map(SettingValue::Number),
            Self::Checkbox { default_value, .. } | Self::Radio { default_value, .. } => {
                default_value.map(SettingValue::Flag)
            }
        }
    }
}

/// A stored settings scalar: string, number, or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl SettingValue {
    fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Self::Flag(b) => b.to_string(),
        }
    }

    fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    fn to_flag(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => !s.is_empty(),
        }
    }
}

/// The settings map: field id → stored scalar.
///
/// Serializes as a plain JSON object, which is the persisted record shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(HashMap<String, SettingValue>);

impl Settings {
    /// Seed from schema defaults: every field with a declared default
    /// contributes its value.
    #[must_use]
    pub fn from_schema(schema: &[SettingField]) -> Self {
        let map = schema
            .iter()
            .filter_map(|f| f.default_value().map(|v| (f.id().to_owned(), v)))
            .collect();
        Self(map)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SettingValue> {
        self.0.get(id)
    }

    /// Merge one value into the map.
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(id.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stored value for `field` as text; empty string when nothing sensible
    /// is stored. Never fails on a type mismatch.
    #[must_use]
    pub fn text_value(&self, field: &SettingField) -> String {
        match self.0.get(field.id()) {
            Some(v) => v.to_text(),
            None => field
                .default_value()
                .map(|v| v.to_text())
                .unwrap_or_default(),
        }
    }

    /// Stored value for `field` as a number, falling back to the field
    /// default and then to zero. Never fails on a type mismatch.
    #[must_use]
    pub fn number_value(&self, field: &SettingField) -> f64 {
        let fallback = field
            .default_value()
            .and_then(|v| v.to_number())
            .unwrap_or(0.0);
        self.0
            .get(field.id())
            .and_then(SettingValue::to_number)
            .unwrap_or(fallback)
    }

    /// Stored value for `field` as a boolean, falling back to the field
    /// default and then to false. Never fails on a type mismatch.
    #[must_use]
    pub fn bool_value(&self, field: &SettingField) -> bool {
        match self.0.get(field.id()) {
            Some(v) => v.to_flag(),
            None => field
                .default_value()
                .map(|v| v.to_flag())
                .unwrap_or(false),
        }
    }
}
