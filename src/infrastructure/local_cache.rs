use crate::domain::models::{sorted_categories, Category};
use crate::infrastructure::entry_mapper::{NokoProject, NokoTag};
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const CATEGORIES_KEY: &str = "categories";
pub const NOKO_TAGS_KEY: &str = "noko-tags";
pub const NOKO_PROJECTS_KEY: &str = "noko-projects";

/// Raw key/value storage behind the local cache.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError>;
    fn set(&self, key: &str, value: Value) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

/// A single JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, InfraError> {
        self.guard
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("cache file lock poisoned: {error}")))
    }

    fn read_all(&self) -> Result<Map<String, Value>, InfraError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "discarding unreadable cache file");
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, map: Map<String, Value>) -> Result<(), InfraError> {
        let formatted = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, format!("{formatted}\n"))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError> {
        let _guard = self.lock()?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), InfraError> {
        let _guard = self.lock()?;
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(map)
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let _guard = self.lock()?;
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(map)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, InfraError> {
        self.values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("in-memory cache lock poisoned: {error}")))
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), InfraError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Typed view over a [`KeyValueStore`]. Reading is tolerant: records that do
/// not decode are skipped rather than failing the whole read.
pub struct LocalCache<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> LocalCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stored categories, upgraded to the current shape and sorted.
    pub fn load_categories(&self) -> Result<Vec<Category>, InfraError> {
        let Some(value) = self.store.get(CATEGORIES_KEY)? else {
            return Ok(Vec::new());
        };
        Ok(sorted_categories(&decode_stored_categories(&value)))
    }

    pub fn save_categories(&self, categories: &[Category]) -> Result<(), InfraError> {
        self.store
            .set(CATEGORIES_KEY, serde_json::to_value(categories)?)
    }

    pub fn load_tags(&self) -> Result<Option<Vec<NokoTag>>, InfraError> {
        Ok(self
            .store
            .get(NOKO_TAGS_KEY)?
            .map(|value| decode_records(&value, NOKO_TAGS_KEY)))
    }

    pub fn save_tags(&self, tags: &[NokoTag]) -> Result<(), InfraError> {
        self.store.set(NOKO_TAGS_KEY, serde_json::to_value(tags)?)
    }

    pub fn load_projects(&self) -> Result<Option<Vec<NokoProject>>, InfraError> {
        Ok(self
            .store
            .get(NOKO_PROJECTS_KEY)?
            .map(|value| decode_records(&value, NOKO_PROJECTS_KEY)))
    }

    pub fn save_projects(&self, projects: &[NokoProject]) -> Result<(), InfraError> {
        self.store
            .set(NOKO_PROJECTS_KEY, serde_json::to_value(projects)?)
    }

    pub fn remove(&self, key: &str) -> Result<(), InfraError> {
        self.store.remove(key)
    }
}

fn decode_records<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    let Some(items) = value.as_array() else {
        tracing::warn!(key, "cached value is not an array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::debug!(key, %error, "skipping invalid cached record");
                None
            }
        })
        .collect()
}

/// Accepts both stored category shapes: the first with `archived`, the
/// current one with `readonly`. A missing `order` defaults to the record's
/// position.
pub fn decode_stored_categories(value: &Value) -> Vec<Category> {
    let Some(items) = value.as_array() else {
        tracing::warn!("stored categories are not an array");
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let decoded = decode_stored_category(item, index);
            if decoded.is_none() {
                tracing::debug!(record = %item, "stored category is not valid");
            }
            decoded
        })
        .collect()
}

fn decode_stored_category(item: &Value, index: usize) -> Option<Category> {
    let object = item.as_object()?;
    let name = object.get("name")?.as_str()?.to_string();
    let project_id = object.get("projectId")?.as_i64()?;
    let noko_tags = object
        .get("nokoTags")?
        .as_array()?
        .iter()
        .map(|tag| tag.as_str().map(ToOwned::to_owned))
        .collect::<Option<Vec<_>>>()?;
    if noko_tags.is_empty() {
        return None;
    }
    let order = match object.get("order") {
        None | Some(Value::Null) => i64::try_from(index).ok()?,
        Some(order) => order.as_i64()?,
    };
    let readonly = match (object.get("readonly"), object.get("archived")) {
        (Some(flag), _) => flag.as_bool()?,
        (None, Some(flag)) => flag.as_bool()?,
        (None, None) => false,
    };
    let enabled = match object.get("enabled") {
        None | Some(Value::Null) => true,
        Some(flag) => flag.as_bool()?,
    };

    Some(Category {
        name,
        order,
        readonly,
        project_id: Some(project_id),
        noko_tags: Some(noko_tags),
        enabled,
        active_from: optional_date(object.get("activeFrom"))?,
        active_to: optional_date(object.get("activeTo"))?,
    })
}

// `None` when the value is present but not a yyyy-mm-dd string.
fn optional_date(value: Option<&Value>) -> Option<Option<NaiveDate>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(raw) => NaiveDate::parse_from_str(raw.as_str()?, "%Y-%m-%d")
            .ok()
            .map(Some),
    }
}
