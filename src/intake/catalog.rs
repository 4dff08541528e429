//! Static catalog of device categories, models, and services.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::event::MenuKind;
use crate::error::ConfigError;

const IPHONE_MODELS: &[&str] = &[
    "IPhone 16 Pro Max",
    "IPhone 16 Pro",
    "IPhone 16 Plus",
    "IPhone 16",
    "IPhone 15 Pro Max",
    "IPhone 15 Pro",
    "IPhone 15 Plus",
    "IPhone 15",
    "IPhone 14 Pro Max",
    "IPhone 14 Pro",
    "IPhone 14 Plus",
    "IPhone 14",
    "IPhone 13 Pro Max",
    "IPhone 13 Pro",
    "IPhone 13",
    "IPhone 13 mini",
    "IPhone 12 Pro Max",
    "IPhone 12 / 12 Pro",
    "IPhone 12 mini",
    "IPhone 11 Pro Max",
    "IPhone 11 Pro",
    "IPhone 11",
    "IPhone Xs Max",
    "IPhone Xs",
    "IPhone X",
];

const IPHONE_SERVICES: &[&str] = &[
    "Замена стекла (если трещины)",
    "Полировка стекла (царапины)",
    "Замена дисплея (оригинал )",
    "Замена корпуса (оригинал)",
    "Замена заднего стекла",
    "Замена аккумулятора (оригинал)",
    "Другие услуги ...",
];

const DEFAULT_SERVICES: &[&str] = &[
    "Замена экрана",
    "Замена батареи",
    "Диагностика",
    "Ремонт кнопок",
];

/// One category and the menus that follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    services: Option<Vec<String>>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: None,
            services: None,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = Some(services.into_iter().map(Into::into).collect());
        self
    }

    /// Models to offer, or `None` when the model stage is skipped.
    ///
    /// An empty list counts as absent.
    pub fn models(&self) -> Option<&[String]> {
        self.models.as_deref().filter(|m| !m.is_empty())
    }

    /// Services to offer, or `None` when the service stage is skipped.
    ///
    /// Always `None` for a category without models.
    pub fn services(&self) -> Option<&[String]> {
        self.models()?;
        self.services.as_deref().filter(|s| !s.is_empty())
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models().is_some_and(|m| m.iter().any(|x| x == model))
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.services().is_some_and(|s| s.iter().any(|x| x == service))
    }
}

/// Ordered, immutable set of categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog, rejecting anything the menus cannot render.
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, ConfigError> {
        let catalog = Self { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The Apple repair catalog the bot ships with.
    pub fn builtin() -> Self {
        let apple = |name: &str, models: &[&str], services: &[&str]| {
            CatalogEntry::new(name)
                .with_models(models.iter().copied())
                .with_services(services.iter().copied())
        };
        Self {
            entries: vec![
                apple("iPhone", IPHONE_MODELS, IPHONE_SERVICES),
                apple("iPad", &["iPad Air", "iPad Pro", "iPad Mini"], DEFAULT_SERVICES),
                apple(
                    "Apple Watch",
                    &["Apple Watch SE", "Apple Watch Ultra"],
                    DEFAULT_SERVICES,
                ),
                apple(
                    "Macbook",
                    &["Macbook Air", "Macbook Pro 14", "Macbook Pro 16"],
                    DEFAULT_SERVICES,
                ),
                CatalogEntry::new("Другая техника"),
            ],
        }
    }

    /// Parse a JSON array of `{ "name", "models"?, "services"? }` objects.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::new(entries)
    }

    /// Load a JSON catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn lookup(&self, category: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == category)
    }

    /// Category names in listed order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every label is renderable as a menu option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(invalid("catalog", "at least one category is required"));
        }

        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(invalid(
                    "catalog",
                    format!("duplicate category {:?}", entry.name),
                ));
            }
            check_label(MenuKind::Category, &entry.name, &entry.name)?;
            for model in entry.models().unwrap_or_default() {
                check_label(MenuKind::Model, &entry.name, model)?;
            }
            for service in entry.services().unwrap_or_default() {
                check_label(MenuKind::Service, &entry.name, service)?;
            }
        }
        Ok(())
    }
}

fn check_label(kind: MenuKind, category: &str, label: &str) -> Result<(), ConfigError> {
    if label.trim().is_empty() {
        return Err(invalid(
            format!("catalog.{category}"),
            "labels must not be empty",
        ));
    }
    if label.len() > kind.max_label_bytes() {
        return Err(invalid(
            format!("catalog.{category}"),
            format!(
                "label {label:?} is {} bytes, limit is {}",
                label.len(),
                kind.max_label_bytes()
            ),
        ));
    }
    Ok(())
}

fn invalid(key: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    }
}
