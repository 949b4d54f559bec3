use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DunnError, Result};

/// The person dunning letters are sent on behalf of. These fields feed the
/// coll_* placeholders in the letter templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dunner {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mailing_address: String,
    #[serde(default)]
    pub shipping_address: String,
}

impl Default for Dunner {
    fn default() -> Self {
        Self {
            name: String::new(),
            title: "Collections Manager".to_string(),
            email: String::new(),
            phone: String::new(),
            mailing_address: String::new(),
            shipping_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Debug runs never dispatch mail; letters land in the outbox instead.
    #[serde(default)]
    pub debug: bool,
    /// Confirm each message with the operator before it is handed to the
    /// mail client.
    #[serde(default = "default_true")]
    pub safe_send: bool,
    /// Reroute every message to the dunner's own address.
    #[serde(default)]
    pub send_to_me: bool,
    /// Restrict a run to a single transaction number.
    #[serde(default)]
    pub debug_transaction: Option<i64>,
    /// Drop saved preflight rows whose transaction left the export.
    #[serde(default)]
    pub remove_closed_transactions: bool,
    #[serde(default = "default_almost_due_days")]
    pub almost_due_days: i64,
    /// Loans contacted within this many days are not dunned again.
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    /// Dunn counts at or above this insert a warning into the letter.
    #[serde(default = "default_warn_after")]
    pub warn_after: u32,
    /// Dunn counts at or above this escalate the letter to a supervisor.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
    /// Collection codes excluded from dunning.
    #[serde(default)]
    pub exclude_codes: Vec<String>,
    #[serde(default = "default_institution")]
    pub institution: String,
    /// Days granted for return when a letter asks for action.
    #[serde(default = "default_return_window_days")]
    pub return_window_days: i64,
    /// Command handed each outgoing message file. None = outbox only.
    #[serde(default)]
    pub mail_command: Option<String>,
    #[serde(default)]
    pub dunner: Dunner,
}

fn default_true() -> bool {
    true
}

fn default_almost_due_days() -> i64 {
    30
}

fn default_recent_days() -> i64 {
    30
}

fn default_warn_after() -> u32 {
    2
}

fn default_escalate_after() -> u32 {
    3
}

fn default_institution() -> String {
    "the Museum".to_string()
}

fn default_return_window_days() -> i64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            debug: false,
            safe_send: true,
            send_to_me: false,
            debug_transaction: None,
            remove_closed_transactions: false,
            almost_due_days: default_almost_due_days(),
            recent_days: default_recent_days(),
            warn_after: default_warn_after(),
            escalate_after: default_escalate_after(),
            exclude_codes: Vec::new(),
            institution: default_institution(),
            return_window_days: default_return_window_days(),
            mail_command: None,
            dunner: Dunner::default(),
        }
    }
}

fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DUNN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("dunn")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub fn components_path() -> PathBuf {
    config_dir().join("components.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("dunn")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| DunnError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

impl Settings {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn letters_dir(&self) -> PathBuf {
        self.data_dir().join("letters")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir().join("outbox")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.data_dir().join("groups")
    }

    pub fn preflight_path(&self) -> PathBuf {
        self.data_dir().join("preflight.csv")
    }

    pub fn default_export_path(&self) -> PathBuf {
        self.data_dir().join("export.csv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join("dunn.log")
    }
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/dunn-test".to_string(),
            escalate_after: 5,
            exclude_codes: vec!["ANT".to_string()],
            ..Settings::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/dunn-test");
        assert_eq!(loaded.escalate_after, 5);
        assert_eq!(loaded.exclude_codes, vec!["ANT".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.safe_send);
        assert!(!s.debug);
        assert_eq!(s.almost_due_days, 30);
        assert_eq!(s.warn_after, 2);
        assert_eq!(s.escalate_after, 3);
        assert!(s.mail_command.is_none());
    }

    #[test]
    fn test_partial_settings_merge_with_defaults() {
        let json = r#"{"data_dir": "/tmp/dunn-test", "debug": true}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert!(s.debug);
        assert!(s.safe_send);
        assert_eq!(s.recent_days, 30);
        assert_eq!(s.institution, "the Museum");
    }

    #[test]
    fn test_data_paths() {
        let s = Settings {
            data_dir: "/tmp/dunn-test".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.letters_dir(), PathBuf::from("/tmp/dunn-test/letters"));
        assert_eq!(s.groups_dir(), PathBuf::from("/tmp/dunn-test/groups"));
        assert_eq!(
            s.preflight_path(),
            PathBuf::from("/tmp/dunn-test/preflight.csv")
        );
    }
}
