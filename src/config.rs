use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::classifier::DEFAULT_MESSAGE_LIMIT;
use crate::error::{ConfigError, ConfigResult};

/// Comma-separated list of catalog resource paths
pub const CATALOG_PATH: &str = "xmlbinder.catalog.path";

/// Comma-separated list of directories searched for relative resource paths
pub const RESOURCE_ROOTS: &str = "xmlbinder.resource.roots";

/// Truncation cap for input excerpts embedded in binding error messages
pub const MESSAGE_LIMIT: &str = "xmlbinder.message.limit";

const PROPERTY_FILE_NAMES: [&str; 4] = [
    "xml-binder.toml",
    "xml-binder.json",
    ".xml-binder.toml",
    ".xml-binder.json",
];

static ENV_KEY_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_env_key_regex() -> &'static Regex {
    ENV_KEY_REGEX
        .get_or_init(|| Regex::new(r"[^a-z0-9]").expect("Failed to compile env key regex"))
}

/// Trait for abstracting environment variable access
#[cfg_attr(test, mockall::automock)]
pub trait EnvProvider {
    /// All variables visible to the process.
    fn vars(&self) -> Vec<(String, String)>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// Lowercase the key and replace every non-alphanumeric character with `_`,
/// so that `a.b.c`, `A-B-C` and `a_b_c` compare equal.
pub fn normalize_env_key(key: &str) -> String {
    get_env_key_regex()
        .replace_all(&key.to_lowercase(), "_")
        .into_owned()
}

/// Process-level property store, consulted before the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyStore {
    properties: HashMap<String, String>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Build a store from a parsed TOML/JSON document.
    ///
    /// Nested tables become dotted keys, arrays are joined with commas and
    /// other scalars keep their textual form.
    fn from_document(document: &Value) -> Self {
        let mut store = Self::new();
        flatten_into(&mut store.properties, None, document);
        store
    }
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: Option<&str>, value: &Value) {
    let key = |name: &str| match prefix {
        Some(prefix) => format!("{}.{}", prefix, name),
        None => name.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (name, child) in map {
                flatten_into(out, Some(&key(name)), child);
            }
        }
        other => {
            if let Some(prefix) = prefix {
                out.insert(prefix.to_string(), scalar_text(other));
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolved, immutable configuration handed to the facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderConfig {
    /// Catalog resource paths, in declared order
    pub catalog_paths: Vec<String>,
    /// Directories searched for relative schema and catalog paths
    pub resource_roots: Vec<PathBuf>,
    /// Maximum number of input characters embedded in binding error messages
    pub message_limit: usize,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            catalog_paths: Vec::new(),
            resource_roots: vec![PathBuf::from(".")],
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }
}

impl BinderConfig {
    pub fn with_catalog_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.resource_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit;
        self
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Resolve configuration for the process: the first properties file
    /// found in the standard locations, then the environment.
    pub fn from_environment() -> ConfigResult<BinderConfig> {
        let properties = Self::find_properties_file()?.unwrap_or_default();
        Self::resolve(&properties, &SystemEnvProvider)
    }

    /// Resolve configuration with precedence: property store -> environment -> defaults
    pub fn resolve(properties: &PropertyStore, env: &impl EnvProvider) -> ConfigResult<BinderConfig> {
        let mut config = BinderConfig::default();

        if let Some(paths) = Self::lookup(CATALOG_PATH, properties, env) {
            config.catalog_paths = split_list(&paths);
        }

        if let Some(roots) = Self::lookup(RESOURCE_ROOTS, properties, env) {
            let roots: Vec<PathBuf> = split_list(&roots).into_iter().map(PathBuf::from).collect();
            if !roots.is_empty() {
                config.resource_roots = roots;
            }
        }

        if let Some(limit) = Self::lookup(MESSAGE_LIMIT, properties, env) {
            config.message_limit =
                limit
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: MESSAGE_LIMIT.to_string(),
                        value: limit.clone(),
                        reason: "expected a positive integer".to_string(),
                    })?;
        }

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Property store first, then an environment variable whose normalized
    /// name equals the normalized key.
    pub fn lookup(key: &str, properties: &PropertyStore, env: &impl EnvProvider) -> Option<String> {
        if let Some(value) = properties.get(key) {
            return Some(value.to_string());
        }

        let wanted = normalize_env_key(key);
        env.vars()
            .into_iter()
            .find(|(name, _)| normalize_env_key(name) == wanted)
            .map(|(_, value)| value)
    }

    /// Load a property store from a file (TOML or JSON)
    pub fn load_properties(path: &Path) -> ConfigResult<PropertyStore> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        let document: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml_to_json(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                match toml_to_json(&content) {
                    Ok(document) => document,
                    Err(_) => serde_json::from_str(&content)?,
                }
            }
        };

        Ok(PropertyStore::from_document(&document))
    }

    /// Find a property file in standard locations
    pub fn find_properties_file() -> ConfigResult<Option<PropertyStore>> {
        Self::find_properties_file_in(&Self::search_locations())
    }

    /// Current directory first, then the user config directory.
    pub fn search_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            locations.push(config_dir.join("xml-binder"));
        }
        locations
    }

    /// Load the first property file found in `locations`, in order.
    pub fn find_properties_file_in(locations: &[PathBuf]) -> ConfigResult<Option<PropertyStore>> {
        for location in locations {
            for name in &PROPERTY_FILE_NAMES {
                let path = location.join(name);
                if path.is_file() {
                    return Ok(Some(Self::load_properties(&path)?));
                }
            }
        }

        Ok(None)
    }

    /// Validate configuration values
    pub fn validate_config(config: &BinderConfig) -> ConfigResult<()> {
        if config.message_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: MESSAGE_LIMIT.to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if config.resource_roots.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: RESOURCE_ROOTS.to_string(),
                value: String::new(),
                reason: "at least one resource root must be specified".to_string(),
            });
        }

        Ok(())
    }
}

fn toml_to_json(content: &str) -> ConfigResult<Value> {
    let table: toml::Table = toml::from_str(content)?;
    Ok(serde_json::to_value(table)?)
}

/// Split a comma-separated value, trimming each entry and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
