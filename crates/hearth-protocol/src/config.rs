//! Immutable hierarchical config store addressed by dotted keys.
//!
//! A [`Config`] wraps one nested JSON object. It is built once at load time
//! and never mutated afterwards, so clones are cheap (`Arc`) and can be handed
//! to every worker without locking.
//!
//! ```text
//! { "database": { "pool": { "size": 8 } } }
//!
//! config.get("database.pool.size", 1)   => 8
//! config.get("database.pool.idle", 30)  => 30
//! config.section("database").get("pool.size", 1) => 8
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct Config {
    tree: Arc<Map<String, Value>>,
}

impl Config {
    /// An empty store.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(tree: Map<String, Value>) -> Self {
        Self { tree: Arc::new(tree) }
    }

    /// Build a store from a JSON value. Non-object values yield an empty store.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Self::empty(),
        }
    }

    /// Load a single source file that yields one nested map.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        match read_source(path)? {
            Value::Object(map) => Ok(Self::from_map(map)),
            _ => Err(ConfigError::NotAMap(path.to_path_buf())),
        }
    }

    /// Load every `.json`/`.toml` file in `dir`; each file's base name becomes a
    /// top-level key. Files that do not yield a map are skipped, as are files
    /// with other extensions.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ConfigError::Missing(dir.to_path_buf()));
        }

        let read_err = |source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        };
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && Format::of(&path).is_some() {
                files.push(path);
            }
        }
        // Stable key order when two files share a stem (`app.json` + `app.toml`).
        files.sort();

        let mut tree = Map::new();
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Value::Object(map) = read_source(&path)? {
                tree.insert(stem.to_string(), Value::Object(map));
            }
        }
        Ok(Self::from_map(tree))
    }

    /// Load from a file or a directory, whichever `path` points at.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_dir(path)
        } else {
            Self::from_file(path)
        }
    }

    /// Walk `key` one dotted segment at a time.
    ///
    /// Returns `None` as soon as a segment is absent or an intermediate value
    /// is not itself a map.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        let mut current = self.tree.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Resolve `key`, falling back to `default` when the path does not resolve.
    pub fn get(&self, key: &str, default: impl Into<Value>) -> Value {
        match self.lookup(key) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    /// Resolve `key` and deserialize the leaf into `T`.
    ///
    /// Returns `None` when the path is absent or the leaf has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// A new store scoped to the sub-map at `key`, or an empty store.
    pub fn section(&self, key: &str) -> Config {
        match self.lookup(key) {
            Some(Value::Object(map)) => Self::from_map(map.clone()),
            _ => Self::empty(),
        }
    }

    /// The full tree.
    pub fn all(&self) -> &Map<String, Value> {
        &self.tree
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Bind the whole store onto a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object((*self.tree).clone())).map_err(|source| {
            ConfigError::Invalid {
                key: String::new(),
                source,
            }
        })
    }

    /// Bind the section at `key` onto a typed struct. An absent section binds
    /// as an empty map, so `#[serde(default)]` types come out as defaults.
    pub fn deserialize_section<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let section = self.section(key);
        serde_json::from_value(Value::Object((*section.tree).clone())).map_err(|source| {
            ConfigError::Invalid {
                key: key.to_string(),
                source,
            }
        })
    }
}

impl From<Map<String, Value>> for Config {
    fn from(tree: Map<String, Value>) -> Self {
        Self::from_map(tree)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(Self::Json),
            Some("toml") => Some(Self::Toml),
            _ => None,
        }
    }
}

fn read_source(path: &Path) -> Result<Value, ConfigError> {
    let format =
        Format::of(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match format {
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}
