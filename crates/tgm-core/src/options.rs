//! Protocol client options shared by every session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options for the wrapped protocol client and its working directories.
///
/// Directory layout:
/// ```text
/// <directory>/
/// ├── <phone number>/       # canonical account directory
/// │   ├── db/
/// │   └── files/
/// └── <connection id>/      # ephemeral onboarding directory
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdOptions {
    pub api_id: i32,
    pub api_hash: String,
    /// Root of all working directories
    pub directory: PathBuf,
    /// How long onboarding disposal waits for a pending finalize
    #[serde(with = "duration_secs")]
    pub onboarding_timeout: Duration,
    pub chat_load_limit: i32,
    pub message_page_size: i32,
    pub system_language_code: String,
    pub device_model: String,
    pub system_version: String,
    pub application_version: String,
}

impl Default for TdOptions {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            directory: PathBuf::from("td"),
            onboarding_timeout: Duration::from_secs(60),
            chat_load_limit: 100,
            message_page_size: 50,
            system_language_code: "en".to_string(),
            device_model: "Server".to_string(),
            system_version: "tgm".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl TdOptions {
    /// Canonical working directory of a paired account
    pub fn account_dir(&self, phone_number: &str) -> PathBuf {
        self.directory.join(sanitize_segment(phone_number))
    }

    /// Ephemeral working directory of an onboarding connection
    pub fn onboarding_dir(&self, connection_id: &str) -> PathBuf {
        self.directory.join(sanitize_segment(connection_id))
    }

    /// Database and files sub-directories of a working directory
    pub fn client_paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join("db"), dir.join("files"))
    }
}

/// Keep path segments to a single component
fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = TdOptions::default();
        assert_eq!(opts.onboarding_timeout, Duration::from_secs(60));
        assert_eq!(opts.chat_load_limit, 100);
        assert_eq!(opts.message_page_size, 50);
        assert_eq!(opts.system_language_code, "en");
    }

    #[test]
    fn test_account_dir_uses_phone_number() {
        let opts = TdOptions {
            directory: PathBuf::from("/srv/td"),
            ..Default::default()
        };
        assert_eq!(opts.account_dir("380501112233"), PathBuf::from("/srv/td/380501112233"));
    }

    #[test]
    fn test_segments_cannot_escape_root() {
        let opts = TdOptions {
            directory: PathBuf::from("/srv/td"),
            ..Default::default()
        };
        let dir = opts.onboarding_dir("../etc");
        assert_eq!(dir, PathBuf::from("/srv/td/___etc"));
    }

    #[test]
    fn test_client_paths() {
        let (db, files) = TdOptions::client_paths(Path::new("/srv/td/1"));
        assert!(db.ends_with("db"));
        assert!(files.ends_with("files"));
    }

    #[test]
    fn test_options_from_toml_like_json() {
        let opts: TdOptions =
            serde_json::from_str(r#"{"api_id": 42, "api_hash": "abc", "onboarding_timeout": 5}"#)
                .unwrap();
        assert_eq!(opts.api_id, 42);
        assert_eq!(opts.onboarding_timeout, Duration::from_secs(5));
        assert_eq!(opts.message_page_size, 50);
    }
}
