//! Field catalog — the ordered list of placeholders the dialogue asks for.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One fillable placeholder: its template key and the question asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Placeholder name in the template (`{{key}}`).
    pub key: String,
    /// Instruction shown to the user.
    pub prompt: String,
}

impl FieldDescriptor {
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
        }
    }
}

/// Ordered, validated field list. Order defines the question sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
}

impl FieldCatalog {
    /// Build a catalog, rejecting empty lists, blank keys or prompts and
    /// duplicate keys.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::InvalidCatalog("catalog has no fields".into()));
        }

        let mut seen = HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            if field.key.trim().is_empty() {
                return Err(ConfigError::InvalidCatalog(format!("field {i} has an empty key")));
            }
            if field.prompt.trim().is_empty() {
                return Err(ConfigError::InvalidCatalog(format!(
                    "field '{}' has an empty prompt",
                    field.key
                )));
            }
            if !seen.insert(field.key.as_str()) {
                return Err(ConfigError::InvalidCatalog(format!(
                    "duplicate key '{}'",
                    field.key
                )));
            }
        }

        Ok(Self { fields })
    }

    /// Load a catalog from a JSON array of `{"key": .., "prompt": ..}`.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let fields: Vec<FieldDescriptor> =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::new(fields)
    }

    pub fn get(&self, cursor: usize) -> Option<&FieldDescriptor> {
        self.fields.get(cursor)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }
}

impl Default for FieldCatalog {
    /// The letter-of-request form the bundled `template.docx` is written for.
    fn default() -> Self {
        let fields = [
            (
                "кому",
                "Укажите должность, ВУЗ и ФИО, например: Ректору МГУ Максакову Н.О.",
            ),
            (
                "Имяотчестворектора",
                "Укажите Имя, Отчество ректора, например: Никита Олегович",
            ),
            ("курс", "Укажите курс, например: 3"),
            ("группа", "Укажите номер группы, например: МГЕР-19-84"),
            ("ФИО", "Укажите ваше ФИО, например: Максаков Никита Олегович"),
            ("Дата", "Укажите дату мероприятия, например: 03.09.2025"),
            (
                "фио2",
                "Укажите ФИО студента в родительном падеже, например: Максакова Никиты Олеговича",
            ),
        ];

        Self {
            fields: fields
                .into_iter()
                .map(|(key, prompt)| FieldDescriptor::new(key, prompt))
                .collect(),
        }
    }
}
