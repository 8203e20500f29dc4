//! Layer folding and validation.

use super::schema::{SETTINGS, Setting, SettingKind, lookup};
use super::{Configuration, ConfigurationError, Entry, Layer, Value, file};
use regex::Regex;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

/// Prefix under which every setting can be supplied through the environment.
pub const ENV_PREFIX: &str = "DEVBOX_";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid name pattern")
});

static SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*[kKmMgG]?$").expect("valid size pattern"));

/// Unvalidated key/value pairs from one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLayer {
    pub layer: Layer,
    pub entries: BTreeMap<String, String>,
}

impl RawLayer {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entries<I, K, V>(layer: Layer, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            layer,
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The built-in defaults as a raw layer.
    pub fn defaults() -> Self {
        Self::with_entries(
            Layer::Defaults,
            SETTINGS.iter().map(|s| (s.name, s.default)),
        )
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The four inputs of a resolution.
#[derive(Debug, Clone)]
pub struct ConfigLayers {
    pub defaults: RawLayer,
    pub file: Option<RawLayer>,
    pub environment: RawLayer,
    pub cli: RawLayer,
}

impl Default for ConfigLayers {
    fn default() -> Self {
        Self {
            defaults: RawLayer::defaults(),
            file: None,
            environment: RawLayer::new(Layer::Environment),
            cli: RawLayer::new(Layer::Cli),
        }
    }
}

impl ConfigLayers {
    fn in_order(&self) -> impl Iterator<Item = &RawLayer> {
        std::iter::once(&self.defaults)
            .chain(self.file.as_ref())
            .chain(std::iter::once(&self.environment))
            .chain(std::iter::once(&self.cli))
    }
}

/// Non-fatal resolution findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A key that is not a known setting was ignored
    UnknownKey { key: String, layer: Layer },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::UnknownKey { key, layer } => {
                write!(f, "ignoring unknown setting `{}` from {}", key, layer)
            }
        }
    }
}

/// Result of a successful resolution.
#[derive(Debug)]
pub struct Resolution {
    pub configuration: Configuration,
    pub warnings: Vec<ConfigWarning>,
    /// Configuration file that was read, if one existed
    pub file: Option<PathBuf>,
}

/// Snapshot of the process environment, captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment. Non-UTF-8 variables are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Home directory of the invoking user (`HOME`, then `USERPROFILE`).
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get("HOME")
            .or_else(|| self.get("USERPROFILE"))
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }

    /// Extract the environment layer.
    ///
    /// `DEVBOX_<NAME>` always applies and wins over the bare name; ambient
    /// settings are also read from their bare name and aliases, skipping empty
    /// values. Unknown `DEVBOX_*` variables are kept under their full name so
    /// resolution can warn about them.
    pub fn to_layer(&self) -> RawLayer {
        let mut layer = RawLayer::new(Layer::Environment);

        for setting in SETTINGS {
            let prefixed = format!("{}{}", ENV_PREFIX, setting.name);
            if let Some(value) = self.get(&prefixed) {
                layer.set(setting.name, value);
                continue;
            }
            if !setting.ambient {
                continue;
            }
            let ambient_value = std::iter::once(setting.name)
                .chain(setting.aliases.iter().copied())
                .filter_map(|name| self.get(name))
                .find(|value| !value.is_empty());
            if let Some(value) = ambient_value {
                layer.set(setting.name, value);
            }
        }

        for (name, value) in &self.vars {
            if let Some(suffix) = name.strip_prefix(ENV_PREFIX) {
                if lookup(suffix).is_none() {
                    layer.set(name.clone(), value.clone());
                }
            }
        }

        layer
    }
}

/// Folds configuration layers into a [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config_file: PathBuf,
}

impl ConfigResolver {
    /// Resolver for the configuration file of a project.
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            config_file: crate::env::config_file_path(project_root),
        }
    }

    /// Resolver reading an explicit configuration file path.
    pub fn with_file(config_file: PathBuf) -> Self {
        Self { config_file }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Read the configuration file (if present) and resolve all layers.
    pub fn load(&self, env: &EnvSnapshot, cli: RawLayer) -> Result<Resolution, ConfigurationError> {
        let file = match file::read(&self.config_file)? {
            Some(entries) => {
                info!("Loading configuration from: {:?}", self.config_file);
                Some(RawLayer {
                    layer: Layer::File,
                    entries,
                })
            }
            None => {
                info!("No configuration file at {:?}, using defaults and environment", self.config_file);
                None
            }
        };
        let file_used = file.as_ref().map(|_| self.config_file.clone());

        let layers = ConfigLayers {
            defaults: RawLayer::defaults(),
            file,
            environment: env.to_layer(),
            cli,
        };

        let mut resolution = Self::resolve(&layers)?;
        resolution.file = file_used;
        Ok(resolution)
    }

    /// Left-fold the layers, later layers overwriting earlier keys.
    ///
    /// Unknown keys produce warnings and are never applied. The first value
    /// that fails validation aborts resolution with the key and layer named.
    pub fn resolve(layers: &ConfigLayers) -> Result<Resolution, ConfigurationError> {
        let mut entries: BTreeMap<&'static str, Entry> = BTreeMap::new();
        let mut warnings = Vec::new();

        for raw in layers.in_order() {
            for (key, raw_value) in &raw.entries {
                let Some(setting) = lookup(key) else {
                    let warning = ConfigWarning::UnknownKey {
                        key: key.clone(),
                        layer: raw.layer,
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                };

                let value = parse_value(setting, raw_value).map_err(|reason| {
                    ConfigurationError::InvalidValue {
                        key: setting.name.to_string(),
                        layer: raw.layer,
                        reason,
                    }
                })?;

                debug!("{} set by {}", setting.name, raw.layer);
                entries.insert(
                    setting.name,
                    Entry {
                        value,
                        origin: raw.layer,
                    },
                );
            }
        }

        // A defaults layer that omits a setting still yields an entry.
        for setting in SETTINGS {
            if !entries.contains_key(setting.name) {
                let value = parse_value(setting, setting.default).map_err(|reason| {
                    ConfigurationError::InvalidValue {
                        key: setting.name.to_string(),
                        layer: Layer::Defaults,
                        reason,
                    }
                })?;
                entries.insert(
                    setting.name,
                    Entry {
                        value,
                        origin: Layer::Defaults,
                    },
                );
            }
        }

        Ok(Resolution {
            configuration: Configuration::from_entries(entries),
            warnings,
            file: None,
        })
    }
}

/// Validate a raw string against the declared kind of `setting`.
pub fn parse_value(setting: &Setting, raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return if setting.optional {
            Ok(Value::Unset)
        } else {
            Err("a value is required".to_string())
        };
    }

    match setting.kind {
        SettingKind::Text => Ok(Value::Text(raw.to_string())),
        SettingKind::Name => {
            if NAME_PATTERN.is_match(raw) {
                Ok(Value::Text(raw.to_string()))
            } else {
                Err(format!(
                    "`{}` is not a valid name (letters, digits, `_`, `.`, `-`)",
                    raw
                ))
            }
        }
        SettingKind::Secret => Ok(Value::Secret(SecretString::from(raw.to_string()))),
        SettingKind::Port => match raw.parse::<u16>() {
            Ok(0) | Err(_) => Err(format!("`{}` is not a port number (1-65535)", raw)),
            Ok(port) => Ok(Value::Port(port)),
        },
        SettingKind::Bool => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| format!("`{}` is not a boolean (true/false)", raw)),
        SettingKind::Integer => raw
            .parse::<u64>()
            .map(Value::Integer)
            .map_err(|_| format!("`{}` is not a non-negative integer", raw)),
        SettingKind::Path => Ok(Value::Path(PathBuf::from(raw))),
        SettingKind::Url => parse_url(raw).map(Value::Url),
        // curl and pip accept `host:port` for a proxy, so the shell may too.
        SettingKind::ProxyUrl if !raw.contains("://") => {
            parse_url(&format!("http://{}", raw)).map(Value::Url)
        }
        SettingKind::ProxyUrl => parse_url(raw).map(Value::Url),
        SettingKind::List => Ok(Value::List(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        SettingKind::Size => {
            if SIZE_PATTERN.is_match(raw) {
                Ok(Value::Text(raw.to_lowercase()))
            } else {
                Err(format!("`{}` is not a size such as 256m or 1g", raw))
            }
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("not a valid URL: {}", e))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err("URL must include a scheme and a host".to_string());
    }
    Ok(url)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
