use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const GROUP_SUCCEEDED: &str = "DMS_DunnSucceeded";
pub const GROUP_FAILED: &str = "DMS_DunnFailed";

/// A group file records which transaction IRNs were handled for one export
/// generation. The checksum ties the file to the export it was built from;
/// a new export invalidates old groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub export_checksum: String,
    pub irns: Vec<i64>,
}

pub fn succeeded_path(groups_dir: &Path, debug: bool) -> PathBuf {
    groups_dir.join(if debug {
        "dunn_succeeded_debug.json"
    } else {
        "dunn_succeeded.json"
    })
}

pub fn failed_path(groups_dir: &Path, debug: bool) -> PathBuf {
    groups_dir.join(if debug {
        "dunn_failed_debug.json"
    } else {
        "dunn_failed.json"
    })
}

/// IRNs already handled for this export. A group written against another
/// export checksum is stale and gets deleted.
pub fn load_irns(path: &Path, export_checksum: &str) -> Result<Vec<i64>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let group: Group = match serde_json::from_str(&content) {
        Ok(group) => group,
        Err(_) => {
            // Unreadable tracking data is worth less than a clean slate
            std::fs::remove_file(path)?;
            return Ok(Vec::new());
        }
    };
    if group.export_checksum != export_checksum {
        std::fs::remove_file(path)?;
        return Ok(Vec::new());
    }
    Ok(group.irns)
}

pub fn save(path: &Path, name: &str, export_checksum: &str, irns: &[i64]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let group = Group {
        name: name.to_string(),
        export_checksum: export_checksum.to_string(),
        irns: irns.to_vec(),
    };
    let json = serde_json::to_string_pretty(&group)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}
