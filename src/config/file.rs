//! `KEY=value` configuration file parsing.

use super::ConfigurationError;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid key pattern"));

/// Parse configuration file text into raw key/value pairs.
///
/// Blank lines and lines starting with `#` are skipped, an `export ` prefix is
/// accepted, surrounding quotes are removed and a ` #` comment after an
/// unquoted value is dropped. When a key repeats, the last occurrence wins.
pub fn parse(path: &Path, content: &str) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let mut entries = BTreeMap::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigurationError::MalformedLine {
                path: path.to_path_buf(),
                line: line_no,
                reason: "missing `=`".to_string(),
            });
        };

        let key = key.trim();
        if !KEY_PATTERN.is_match(key) {
            return Err(ConfigurationError::MalformedLine {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("invalid setting name `{}`", key),
            });
        }

        let value = unquote(value.trim()).map_err(|reason| ConfigurationError::MalformedLine {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        })?;

        if entries.insert(key.to_string(), value).is_some() {
            warn!("{}:{}: `{}` set more than once, last value wins", path.display(), line_no, key);
        }
    }

    Ok(entries)
}

fn unquote(value: &str) -> Result<String, String> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            return match rest.find(quote) {
                Some(end) => {
                    let trailing = rest[end + 1..].trim();
                    if trailing.is_empty() || trailing.starts_with('#') {
                        Ok(rest[..end].to_string())
                    } else {
                        Err(format!("unexpected text after closing quote: `{}`", trailing))
                    }
                }
                None => Err("unterminated quoted value".to_string()),
            };
        }
    }

    let value = match value.find(" #") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    };
    Ok(value.to_string())
}

/// Read and parse a configuration file. A missing file yields `None`.
pub fn read(path: &Path) -> Result<Option<BTreeMap<String, String>>, ConfigurationError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(path, &content).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}
