//! Layered configuration.
//!
//! Settings come from four layers, lowest precedence first: built-in defaults,
//! the project configuration file (`.devbox/devbox.conf`), the process
//! environment and command-line flags. [`ConfigResolver`] folds them into a
//! single immutable [`Configuration`] that is threaded through every other
//! component; nothing else in the crate reads the process environment.
//!
//! - [`schema`]: the static settings table and setting names
//! - [`file`]: `KEY=value` file parsing
//! - [`resolver`]: layer folding, validation and environment capture
//! - [`template`]: the `devbox config` template

pub mod file;
pub mod resolver;
pub mod schema;
pub mod template;

pub use resolver::{ConfigLayers, ConfigResolver, ConfigWarning, EnvSnapshot, RawLayer, Resolution};
pub use schema::{Section, Setting, SettingKind, keys, lookup};
pub use template::{render_template, write_template};

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration source, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Defaults,
    File,
    Environment,
    Cli,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Defaults => write!(f, "built-in defaults"),
            Layer::File => write!(f, "configuration file"),
            Layer::Environment => write!(f, "environment"),
            Layer::Cli => write!(f, "command line"),
        }
    }
}

/// A validated setting value.
#[derive(Debug)]
pub enum Value {
    /// Optional setting with no value
    Unset,
    Text(String),
    Secret(SecretString),
    Port(u16),
    Bool(bool),
    Integer(u64),
    Path(PathBuf),
    Url(Url),
    List(Vec<String>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unset, Value::Unset) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Secret(a), Value::Secret(b)) => a.expose_secret() == b.expose_secret(),
            (Value::Port(a), Value::Port(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Url(a), Value::Url(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Whether the setting carries a value.
    pub fn is_set(&self) -> bool {
        !matches!(self, Value::Unset)
    }

    /// Human-readable rendering; secrets are masked.
    pub fn display(&self) -> String {
        match self {
            Value::Unset => "<unset>".to_string(),
            Value::Text(s) => s.clone(),
            Value::Secret(_) => "********".to_string(),
            Value::Port(p) => p.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Path(p) => p.display().to_string(),
            Value::Url(u) => mask_url_password(u),
            Value::List(items) => items.join(","),
        }
    }
}

/// Render a URL with any embedded password replaced.
pub(crate) fn mask_url_password(url: &Url) -> String {
    if url.password().is_some() {
        let mut masked = url.clone();
        let _ = masked.set_password(Some("********"));
        masked.to_string()
    } else {
        url.to_string()
    }
}

/// One resolved setting and the layer that supplied it.
#[derive(Debug, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub origin: Layer,
}

/// The resolved, immutable configuration for one invocation.
#[derive(Debug, PartialEq)]
pub struct Configuration {
    entries: BTreeMap<&'static str, Entry>,
}

impl Configuration {
    pub(crate) fn from_entries(entries: BTreeMap<&'static str, Entry>) -> Self {
        Self { entries }
    }

    /// Configuration with nothing but built-in defaults.
    pub fn defaults() -> Result<Self, ConfigurationError> {
        Ok(ConfigResolver::resolve(&ConfigLayers::default())?.configuration)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Layer that supplied the value of `key`.
    pub fn origin(&self, key: &str) -> Option<Layer> {
        self.entries.get(key).map(|e| e.origin)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(Value::is_set)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn secret(&self, key: &str) -> Option<&SecretString> {
        match self.get(key) {
            Some(Value::Secret(s)) => Some(s),
            _ => None,
        }
    }

    pub fn port(&self, key: &str) -> Option<u16> {
        match self.get(key) {
            Some(Value::Port(p)) => Some(*p),
            _ => None,
        }
    }

    /// Boolean setting; anything that is not a boolean reads as `false`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Value::Bool(true)))
    }

    pub fn integer(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn path(&self, key: &str) -> Option<&Path> {
        match self.get(key) {
            Some(Value::Path(p)) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn url(&self, key: &str) -> Option<&Url> {
        match self.get(key) {
            Some(Value::Url(u)) => Some(u),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> &[String] {
        match self.get(key) {
            Some(Value::List(items)) => items,
            _ => &[],
        }
    }

    /// Unmasked textual form of a non-secret value. Secrets and unset
    /// settings yield `None`.
    pub fn raw(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Unset | Value::Secret(_) => None,
            Value::Text(s) => Some(s.clone()),
            Value::Port(p) => Some(p.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Path(p) => Some(p.display().to_string()),
            Value::Url(u) => Some(u.to_string()),
            Value::List(items) => Some(items.join(",")),
        }
    }

    /// Settings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Entry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

/// Fatal configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// A value failed validation for its declared kind
    #[error("invalid value for `{key}` from {layer}: {reason}")]
    InvalidValue {
        key: String,
        layer: Layer,
        reason: String,
    },

    /// A configuration file line could not be parsed
    #[error("{path}:{line}: {reason}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The configuration file exists but could not be read
    #[error("failed to read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `devbox config` refused to overwrite an existing file
    #[error("configuration file {0} already exists")]
    TemplateExists(PathBuf),

    /// The template could not be written
    #[error("failed to write configuration template {path}: {source}")]
    TemplateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigurationError {
    /// Concrete next step for the user.
    pub fn remediation(&self) -> String {
        match self {
            ConfigurationError::InvalidValue { key, layer, .. } => match layer {
                Layer::Defaults => {
                    format!("report this: the built-in default for `{}` is invalid", key)
                }
                Layer::File => format!(
                    "edit `{}` in the configuration file ({}/{})",
                    key,
                    crate::env::DEVBOX_DIR_NAME,
                    crate::env::CONFIG_FILE_NAME
                ),
                Layer::Environment => format!("fix or unset the `{}` (or `DEVBOX_{}`) environment variable", key, key),
                Layer::Cli => format!("correct the `{}` value passed on the command line", key),
            },
            ConfigurationError::MalformedLine { path, .. } => {
                format!("fix the line in {} (expected KEY=value)", path.display())
            }
            ConfigurationError::Unreadable { path, .. } => {
                format!("check the permissions of {}", path.display())
            }
            ConfigurationError::TemplateExists(_) => {
                "pass --force to overwrite the existing configuration file".to_string()
            }
            ConfigurationError::TemplateWrite { path, .. } => {
                format!("make sure {} is writable", path.display())
            }
        }
    }
}
