//! External tool detection.
//!
//! Tools are resolved from an explicit config path when that path exists,
//! and from `PATH` via [`which::which`] otherwise.

use std::path::{Path, PathBuf};

use mc_core::config::ToolsConfig;
use serde::{Deserialize, Serialize};

/// Tools the service depends on.
const KNOWN_TOOLS: &[&str] = &["ffmpeg"];

/// Availability information for a tool, returned by [`check_tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Locate `name`, preferring `custom` when it points at an existing file.
pub fn resolve_tool(name: &str, custom: Option<&Path>) -> Option<PathBuf> {
    match custom {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => {
            tracing::warn!(
                "Configured {name} path {} does not exist; searching PATH",
                p.display()
            );
            which::which(name).ok()
        }
        None => which::which(name).ok(),
    }
}

/// Check every known tool and report availability and version.
pub fn check_tools(config: &ToolsConfig) -> Vec<ToolInfo> {
    KNOWN_TOOLS
        .iter()
        .map(|&name| {
            let custom = match name {
                "ffmpeg" => config.ffmpeg_path.as_deref(),
                _ => None,
            };
            match resolve_tool(name, custom) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&path),
                    path: Some(path),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            }
        })
        .collect()
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
