//! The `devbox config` template.

use super::ConfigurationError;
use super::schema::{SETTINGS, Section};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Render the configuration template.
///
/// Required settings are written with their default value, optional ones are
/// commented out. Settings are grouped by [`Section`] and preceded by their
/// description.
pub fn render_template() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# devbox configuration");
    let _ = writeln!(
        out,
        "# Generated {} by devbox {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(out, "#");
    let _ = writeln!(
        out,
        "# Precedence: command line > environment (DEVBOX_<NAME>) > this file > defaults."
    );
    let _ = writeln!(
        out,
        "# Secrets are better supplied through the environment than stored here."
    );

    for section in Section::ALL {
        let _ = writeln!(out);
        let _ = writeln!(out, "# --- {} ---", section.title());
        for setting in SETTINGS.iter().filter(|s| s.section == section) {
            let _ = writeln!(out, "# {} ({})", setting.description, setting.kind);
            if setting.optional {
                let _ = writeln!(out, "# {}=", setting.name);
            } else {
                let _ = writeln!(out, "{}={}", setting.name, setting.default);
            }
        }
    }

    out
}

/// Write the template to `path`, creating the parent directory.
///
/// # Errors
///
/// Returns [`ConfigurationError::TemplateExists`] if the file exists and
/// `force` is false, and [`ConfigurationError::TemplateWrite`] if it cannot be
/// written.
pub fn write_template(path: &Path, force: bool) -> Result<(), ConfigurationError> {
    if path.exists() && !force {
        return Err(ConfigurationError::TemplateExists(path.to_path_buf()));
    }

    let write_err = |source| ConfigurationError::TemplateWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, render_template()).map_err(write_err)?;

    info!("Wrote configuration template to {:?}", path);
    Ok(())
}
