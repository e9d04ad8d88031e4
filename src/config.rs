//! Where the manager keeps its files.

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "QUARTZ_SQL_HOME";

/// Extension of database files.
pub const DATABASE_EXTENSION: &str = "qdb";

const DIR_NAME: &str = "quartz_sql";
const CACHE_FILE: &str = "databases.cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Directory holding one `<name>.qdb` file per database.
    pub data_dir: PathBuf,
    /// Records known databases and the last one used.
    pub cache_file: PathBuf,
    /// Save the active database after every mutating statement.
    pub autosave: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

impl ManagerConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            cache_file: data_dir.join(CACHE_FILE),
            data_dir,
            autosave: false,
        }
    }

    /// Default configuration, honouring [DATA_DIR_ENV] when set.
    pub fn from_env() -> Self {
        match env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::with_data_dir(dir),
            _ => Self::default(),
        }
    }

    pub fn autosave(mut self, enabled: bool) -> Self {
        self.autosave = enabled;
        self
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(name)
            .with_extension(DATABASE_EXTENSION)
    }
}

/// Per-user application data directory on Windows, a hidden directory in the
/// home directory elsewhere.
fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        if let Some(dir) = dirs::data_dir() {
            return dir.join(DIR_NAME);
        }
    }
    let hidden = format!(".{DIR_NAME}");
    dirs::home_dir()
        .map(|home| home.join(&hidden))
        .unwrap_or_else(|| Path::new(".").join(hidden))
}
