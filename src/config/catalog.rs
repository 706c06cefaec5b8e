//! Catalog reader
//!
//! Catalogs describe the plugins to load and the streams to compose. Each
//! catalog is a TOML document whose top-level tables are sections; section
//! order is preserved because stream composition depends on it.
//!
//! ```toml
//! [accel_datastream]
//! ID = 1
//! MULTI_STREAM = "DISABLE"
//! PROCESSOR_INPUT = ["accel_processor accel_proc0 accel_sensor"]
//! ```

use crate::error::{Result, SensordError};
use std::fmt;
use std::path::Path;

/// Key disabling a section
pub const KEY_DISABLE: &str = "DISABLE";
/// Key holding a plugin path
pub const KEY_PATH: &str = "PATH";
/// Key holding a stream id
pub const KEY_ID: &str = "ID";
/// Key controlling multi-stream composition
pub const KEY_MULTI_STREAM: &str = "MULTI_STREAM";
/// Key listing filter composite lines
pub const KEY_FILTER_INPUT: &str = "FILTER_INPUT";
/// Key listing processor composite lines
pub const KEY_PROCESSOR_INPUT: &str = "PROCESSOR_INPUT";

/// A scalar catalog value
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogValue {
    Text(String),
    Number(i64),
    Float(f64),
    Flag(bool),
}

impl CatalogValue {
    fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::String(s) => Some(CatalogValue::Text(s.clone())),
            toml::Value::Integer(i) => Some(CatalogValue::Number(*i)),
            toml::Value::Float(f) => Some(CatalogValue::Float(*f)),
            toml::Value::Boolean(b) => Some(CatalogValue::Flag(*b)),
            _ => None,
        }
    }

    /// Value as an integer, parsing text when needed
    pub fn as_number(&self) -> Option<i64> {
        match self {
            CatalogValue::Number(n) => Some(*n),
            CatalogValue::Float(f) => Some(*f as i64),
            CatalogValue::Text(s) => s.trim().parse().ok(),
            CatalogValue::Flag(_) => None,
        }
    }

    /// Case-insensitive text comparison; `true` flags match "yes"
    pub fn is(&self, word: &str) -> bool {
        match self {
            CatalogValue::Text(s) => s.trim().eq_ignore_ascii_case(word),
            CatalogValue::Flag(b) => *b && word.eq_ignore_ascii_case("yes"),
            _ => false,
        }
    }
}

impl fmt::Display for CatalogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogValue::Text(s) => write!(f, "{}", s),
            CatalogValue::Number(n) => write!(f, "{}", n),
            CatalogValue::Float(v) => write!(f, "{}", v),
            CatalogValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// An ordered set of named sections
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    sections: Vec<(String, toml::Table)>,
}

impl Catalog {
    /// Parse a catalog from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e| SensordError::Config(format!("Failed to parse catalog: {}", e)))?;

        let mut sections = Vec::with_capacity(table.len());
        for (name, value) in table {
            match value {
                toml::Value::Table(section) => sections.push((name, section)),
                _ => {
                    tracing::warn!("Ignoring top-level key {} outside of any section", name);
                }
            }
        }
        Ok(Self { sections })
    }

    /// Load a catalog file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SensordError::Config(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_toml_str(&text)
            .map_err(|e| e.with_context(format!("Catalog {}", path.display())))?;
        tracing::debug!(
            "Loaded catalog {} with {} sections",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Section names in file order
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Look up `key` in `section`.
    ///
    /// For array values `index` selects the element; a scalar answers only
    /// index 0. Returns `None` past the end, which callers use to stop
    /// iterating.
    pub fn value(&self, section: &str, key: &str, index: usize) -> Option<CatalogValue> {
        let table = self
            .sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, table)| table)?;
        match table.get(key)? {
            toml::Value::Array(items) => items.get(index).and_then(CatalogValue::from_toml),
            scalar if index == 0 => CatalogValue::from_toml(scalar),
            _ => None,
        }
    }

    /// Text of a scalar key
    pub fn text(&self, section: &str, key: &str) -> Option<String> {
        self.value(section, key, 0).map(|v| v.to_string())
    }

    /// All entries of a key, in order
    pub fn values(&self, section: &str, key: &str) -> Vec<CatalogValue> {
        (0..)
            .map_while(|index| self.value(section, key, index))
            .collect()
    }

    /// Whether `DISABLE = "yes"` (or `true`) is set for a section
    pub fn is_disabled(&self, section: &str) -> bool {
        self.value(section, KEY_DISABLE, 0)
            .map(|v| v.is("yes"))
            .unwrap_or(false)
    }
}
