use std::path::{Path, PathBuf};

use serde::Serialize;
use wingman_core::EntityKind;
use wingman_store_json::{JsonMirror, DIRECT_REPORTS_FILE, MANAGEMENT_TIPS_FILE};
use wingman_store_sqlite::{StoreOptions, DEFAULT_BUSY_TIMEOUT_MS};

pub const DEFAULT_DATABASE_FILE: &str = "wingman.sqlite3";

/// Where one deployment keeps its database file and file mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WingmanConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub direct_reports_file: String,
    pub management_tips_file: String,
    pub busy_timeout_ms: u64,
}

impl Default for WingmanConfig {
    fn default() -> Self {
        Self::in_dir(Path::new("."))
    }
}

impl WingmanConfig {
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            direct_reports_file: DIRECT_REPORTS_FILE.to_string(),
            management_tips_file: MANAGEMENT_TIPS_FILE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    #[must_use]
    pub fn mirror_path(&self, kind: EntityKind) -> PathBuf {
        match kind {
            EntityKind::DirectReport => self.data_dir.join(&self.direct_reports_file),
            EntityKind::ManagementTip => self.data_dir.join(&self.management_tips_file),
        }
    }

    #[must_use]
    pub fn mirror(&self) -> JsonMirror {
        JsonMirror::new(
            self.mirror_path(EntityKind::DirectReport),
            self.mirror_path(EntityKind::ManagementTip),
        )
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions { busy_timeout_ms: self.busy_timeout_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_prototype_file_names() {
        let config = WingmanConfig::in_dir(Path::new("/var/lib/wingman"));

        assert_eq!(config.database_path(), Path::new("/var/lib/wingman/wingman.sqlite3"));
        assert_eq!(
            config.mirror_path(EntityKind::DirectReport),
            Path::new("/var/lib/wingman/direct_reports.json")
        );
        assert_eq!(
            config.mirror().path(EntityKind::ManagementTip),
            Path::new("/var/lib/wingman/management_tips.json")
        );
        assert_eq!(config.store_options().busy_timeout_ms, 5000);
    }
}
