//! Web app manifest (`manifest.json`)
//!
//! Read once at install time to pick the icons seeded into the static
//! bucket, and by the health check. Never written.

use crate::error::{HavenError, HavenResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Icon sizes every installable app is expected to ship
pub const DEFAULT_ICON_SIZES: [&str; 2] = ["192x192", "512x512"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    Fullscreen,
    #[default]
    Standalone,
    MinimalUi,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIcon {
    pub src: String,

    /// Space-separated list such as `"192x192 256x256"`
    #[serde(default)]
    pub sizes: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl ManifestIcon {
    pub fn has_size(&self, size: &str) -> bool {
        self.sizes.split_whitespace().any(|s| s.eq_ignore_ascii_case(size))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAppManifest {
    pub name: String,
    pub short_name: Option<String>,
    pub start_url: String,
    pub display: DisplayMode,
    pub icons: Vec<ManifestIcon>,
    pub scope: Option<String>,
    pub theme_color: Option<String>,
    pub background_color: Option<String>,
}

impl WebAppManifest {
    pub async fn from_file(path: &Path) -> HavenResult<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| HavenError::io(format!("reading manifest {}", path.display()), e))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> HavenResult<Self> {
        serde_json::from_str(content).map_err(|e| HavenError::ManifestInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// First icon declaring `size`
    pub fn icon(&self, size: &str) -> Option<&ManifestIcon> {
        self.icons.iter().find(|icon| icon.has_size(size))
    }

    /// The 192x192 and 512x512 icons, where declared
    pub fn default_icons(&self) -> Vec<&ManifestIcon> {
        DEFAULT_ICON_SIZES
            .iter()
            .filter_map(|size| self.icon(size))
            .collect()
    }

    /// Missing required members, empty when the manifest is installable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("missing name".to_string());
        }
        if self.start_url.trim().is_empty() {
            problems.push("missing start_url".to_string());
        }
        if self.icons.is_empty() {
            problems.push("no icons".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r##"{
        "name": "Ecomama",
        "short_name": "Ecomama",
        "start_url": "/",
        "display": "standalone",
        "theme_color": "#16a34a",
        "icons": [
            {"src": "/icons/icon-72x72.png", "sizes": "72x72", "type": "image/png"},
            {"src": "/icons/icon-192x192.png", "sizes": "192x192", "type": "image/png", "purpose": "any maskable"},
            {"src": "/icons/icon-512x512.png", "sizes": "512x512", "type": "image/png"}
        ]
    }"##;

    #[test]
    fn parses_and_picks_default_icons() {
        let manifest = WebAppManifest::parse(MANIFEST, Path::new("manifest.json")).unwrap();
        assert_eq!(manifest.display, DisplayMode::Standalone);
        let srcs: Vec<&str> = manifest.default_icons().iter().map(|i| i.src.as_str()).collect();
        assert_eq!(srcs, vec!["/icons/icon-192x192.png", "/icons/icon-512x512.png"]);
        assert!(manifest.problems().is_empty());
    }

    #[test]
    fn multi_size_icons() {
        let icon = ManifestIcon {
            src: "/i.png".to_string(),
            sizes: "48x48 192x192".to_string(),
            mime_type: None,
            purpose: None,
        };
        assert!(icon.has_size("192x192"));
        assert!(!icon.has_size("512x512"));
    }

    #[test]
    fn reports_missing_members() {
        let manifest = WebAppManifest::parse(r#"{"display": "minimal-ui"}"#, Path::new("m.json")).unwrap();
        assert_eq!(manifest.display, DisplayMode::MinimalUi);
        assert_eq!(manifest.problems().len(), 3);
    }

    #[tokio::test]
    async fn invalid_file_names_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest.json");
        tokio::fs::write(&path, "{ nope").await.unwrap();

        let err = WebAppManifest::from_file(&path).await.unwrap_err();
        assert!(matches!(err, HavenError::ManifestInvalid { .. }));
    }
}
