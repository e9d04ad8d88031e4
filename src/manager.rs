//! Persistence around a single active [Database].

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::{self, Decode, Encode};
use crate::config::{DATABASE_EXTENSION, ManagerConfig};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::executor::{self, Outcome, QueryResult};
use crate::parser::{parse_script, parse_statement};

/// Database activated when nothing was used before.
pub const DEFAULT_DATABASE: &str = "main";

const FALLBACK_PREFIX: &str = "fallback_";

/// Known database files and the one used last.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Cache {
    known: Vec<PathBuf>,
    last_used: Option<PathBuf>,
}

impl Cache {
    fn read(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(ciborium::from_reader(BufReader::new(file))?)
    }

    fn write(&self, path: &Path) -> Result<()> {
        write_atomically(path, |out| Ok(ciborium::into_writer(self, out)?))
    }

    fn remember(&mut self, path: &Path) {
        if !self.known.iter().any(|p| p == path) {
            self.known.push(path.to_path_buf());
        }
    }
}

/// Owns the active database and its file.
///
/// Exactly one database is active. Statements run through [Self::execute],
/// which also handles `CREATE DATABASE`, `USE` and `DROP DATABASE`.
#[derive(Debug)]
pub struct DatabaseManager {
    config: ManagerConfig,
    cache: Cache,
    active_name: String,
    database: Database,
    recovered_from: Option<String>,
}

impl DatabaseManager {
    /// Opens the data directory and activates the database used last, or
    /// [DEFAULT_DATABASE] on first use.
    ///
    /// A database file that cannot be loaded is replaced by a fresh fallback
    /// database, see [Self::recovered_from].
    pub fn open(config: ManagerConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let mut cache = if config.cache_file.exists() {
            Cache::read(&config.cache_file).unwrap_or_else(|e| {
                warn!(error = %e, path = %config.cache_file.display(), "discarding unreadable cache");
                Cache::default()
            })
        } else {
            Cache::default()
        };
        cache.known.retain(|p| p.is_file());
        for entry in fs::read_dir(&config.data_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == DATABASE_EXTENSION) {
                cache.remember(&path);
            }
        }

        let last_used = cache
            .last_used
            .as_deref()
            .filter(|p| p.is_file())
            .and_then(|p| p.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned());

        let mut manager = Self {
            config,
            cache,
            active_name: String::new(),
            database: Database::new(),
            recovered_from: None,
        };
        match last_used {
            Some(name) => manager.activate(&name)?,
            None if manager.database_exists(DEFAULT_DATABASE) => {
                manager.activate(DEFAULT_DATABASE)?
            }
            None => manager.create_database(DEFAULT_DATABASE)?,
        }
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn active_name(&self) -> &str {
        &self.active_name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Name of the database whose load failed when the active one is a
    /// fallback.
    pub fn recovered_from(&self) -> Option<&str> {
        self.recovered_from.as_deref()
    }

    /// Whether `name` has the shape given to fallback databases.
    pub fn is_fallback_name(name: &str) -> bool {
        name.strip_prefix(FALLBACK_PREFIX)
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.config.database_path(name).is_file()
    }

    /// Names of the known databases, sorted.
    pub fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cache
            .known
            .iter()
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Creates an empty database file and switches to it.
    ///
    /// # Errors
    /// [Error::DatabaseAlreadyExists] if the file is already there.
    pub fn create_database(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.database_exists(name) {
            return Err(Error::DatabaseAlreadyExists(name.to_string()));
        }
        self.leave_active()?;
        self.database = Database::new();
        self.active_name = name.to_string();
        self.recovered_from = None;
        self.save_database_file()?;
        self.touch_cache()?;
        info!(database = name, "database created");
        Ok(())
    }

    /// Saves the active database and switches to `name`.
    pub fn use_database(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if !self.database_exists(name) {
            return Err(Error::DatabaseNotFound(name.to_string()));
        }
        self.leave_active()?;
        self.activate(name)?;
        info!(database = %self.active_name, "switched database");
        Ok(())
    }

    /// Deletes a database file. The active database cannot be dropped.
    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if name == self.active_name {
            return Err(Error::InvalidOperation(format!(
                "cannot drop the active database {name}, switch to another one first"
            )));
        }
        let path = self.config.database_path(name);
        if !path.is_file() {
            return Err(Error::DatabaseNotFound(name.to_string()));
        }
        fs::remove_file(&path)?;
        self.cache.known.retain(|p| *p != path);
        self.cache.write(&self.config.cache_file)?;
        info!(database = name, "database dropped");
        Ok(())
    }

    /// Writes the active database to its file, replacing it atomically.
    pub fn save_database_file(&self) -> Result<()> {
        let bytes = codec::to_bytes(&self.database.serialize())?;
        let path = self.config.database_path(&self.active_name);
        write_atomically(&path, |out| Ok(out.write_all(&bytes)?))?;
        info!(database = %self.active_name, bytes = bytes.len(), "database saved");
        Ok(())
    }

    /// Reloads the active database from its file.
    ///
    /// A failed load is not returned as an error: the manager logs it and
    /// switches to a new `fallback_<n>` database instead.
    pub fn load_database_file(&mut self) -> Result<()> {
        let name = self.active_name.clone();
        self.activate(&name)
    }

    /// Runs one statement and saves afterwards when autosave is on and the
    /// statement can change state.
    pub fn execute(&mut self, sql: &str) -> Result<Outcome> {
        let statement = parse_statement(sql)?;
        let outcome = executor::execute(&statement, self)?;
        if self.config.autosave && statement.is_mutating() {
            self.save_database_file()?;
        }
        Ok(outcome)
    }

    /// Runs a `;`-separated script, stopping at the first failing statement.
    pub fn execute_script(&mut self, sql: &str) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::new();
        for statement in parse_script(sql)? {
            outcomes.push(executor::execute(&statement, self)?);
            if self.config.autosave && statement.is_mutating() {
                self.save_database_file()?;
            }
        }
        Ok(outcomes)
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        self.database.query(sql)
    }

    fn leave_active(&mut self) -> Result<()> {
        if self.active_name.is_empty() {
            return Ok(());
        }
        self.save_database_file()
    }

    /// Loads `name` and makes it active, falling back on failure.
    fn activate(&mut self, name: &str) -> Result<()> {
        let path = self.config.database_path(name);
        match read_database(&path) {
            Ok(database) => {
                self.database = database;
                self.active_name = name.to_string();
                self.recovered_from = None;
                self.touch_cache()?;
                info!(database = name, "database loaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, database = name, "failed to load database, creating a fallback");
                self.fall_back(name)
            }
        }
    }

    fn fall_back(&mut self, failed: &str) -> Result<()> {
        let name = loop {
            let candidate = format!("{FALLBACK_PREFIX}{}", rand::random::<u32>());
            if !self.database_exists(&candidate) {
                break candidate;
            }
        };
        self.database = Database::new();
        self.active_name = name;
        self.save_database_file()?;
        self.touch_cache()?;
        self.recovered_from = Some(failed.to_string());
        warn!(database = %self.active_name, recovered_from = failed, "switched to fallback database");
        Ok(())
    }

    fn touch_cache(&mut self) -> Result<()> {
        let path = self.config.database_path(&self.active_name);
        self.cache.remember(&path);
        self.cache.last_used = Some(path);
        self.cache.write(&self.config.cache_file)
    }
}

/// Database and table names allow letters, digits and `_`.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidOperation(format!(
            "invalid database name {name:?}, use letters, digits and '_'"
        )));
    }
    Ok(())
}

/// A zero-byte file is an empty database.
fn read_database(path: &Path) -> Result<Database> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Database::new());
    }
    Database::deserialize(codec::from_bytes(&bytes)?)
}

/// Writes next to `path` and renames over it once the content is complete.
fn write_atomically(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut out = BufWriter::new(fs::File::create(&tmp)?);
    let written = fill(&mut out).and_then(|()| {
        out.flush()?;
        Ok(())
    });
    drop(out);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::tempdir;

    fn open(dir: &Path) -> DatabaseManager {
        DatabaseManager::open(ManagerConfig::with_data_dir(dir)).unwrap()
    }

    // ─────────────────────────────────────────────
    // Test 1 : lifecycle
    // ─────────────────────────────────────────────

    #[test]
    fn test_first_open_creates_default_database() {
        let dir = tempdir().unwrap();
        let manager = open(dir.path());
        assert_eq!(manager.active_name(), DEFAULT_DATABASE);
        assert_eq!(manager.list_databases(), vec![DEFAULT_DATABASE]);
        assert!(dir.path().join("main.qdb").is_file());
        assert!(manager.recovered_from().is_none());
    }

    #[test]
    fn test_reopen_restores_last_used_database() {
        let dir = tempdir().unwrap();
        {
            let mut manager = open(dir.path());
            manager
                .execute_script(
                    "CREATE DATABASE shop;
                     CREATE TABLE items (id SERIAL PRIMARY KEY, name TEXT);
                     INSERT INTO items (name) VALUES ('pen'), ('ink');",
                )
                .unwrap();
            manager.save_database_file().unwrap();
        }

        let mut manager = open(dir.path());
        assert_eq!(manager.active_name(), "shop");
        assert_eq!(manager.list_databases(), vec!["main", "shop"]);
        manager.execute("INSERT INTO items (name) VALUES ('nib')").unwrap();
        let result = manager.query("SELECT id FROM items WHERE name = 'nib'").unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(3)]]);
    }

    #[test]
    fn test_use_saves_the_database_being_left() {
        let dir = tempdir().unwrap();
        let mut manager = open(dir.path());
        manager.execute("CREATE TABLE notes (body TEXT)").unwrap();
        manager.execute("CREATE DATABASE other").unwrap();
        assert!(manager.database().list_tables().is_empty());

        manager.execute("USE main").unwrap();
        assert_eq!(manager.database().list_tables(), vec!["notes"]);
        assert!(matches!(
            manager.use_database("nowhere"),
            Err(Error::DatabaseNotFound(_))
        ));
        assert!(matches!(
            manager.create_database("other"),
            Err(Error::DatabaseAlreadyExists(_))
        ));
    }

    #[test]
    fn test_drop_database() {
        let dir = tempdir().unwrap();
        let mut manager = open(dir.path());
        manager.create_database("scratch").unwrap();
        assert!(matches!(
            manager.execute("DROP DATABASE scratch"),
            Err(Error::InvalidOperation(_))
        ));

        manager.use_database("main").unwrap();
        manager.execute("DROP DATABASE scratch").unwrap();
        assert!(!manager.database_exists("scratch"));
        assert_eq!(manager.list_databases(), vec!["main"]);
        assert!(matches!(
            manager.execute("DROP DATABASE scratch"),
            Err(Error::DatabaseNotFound(_))
        ));
        manager.execute("DROP DATABASE IF EXISTS scratch").unwrap();
    }

    #[test]
    fn test_list_databases_procedure() {
        let dir = tempdir().unwrap();
        let mut manager = open(dir.path());
        manager.create_database("b_side").unwrap();
        let rows = manager
            .execute("CALL list_databases()")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows.columns, vec!["database"]);
        assert_eq!(
            rows.rows,
            vec![vec![Value::text("b_side")], vec![Value::text("main")]]
        );
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let dir = tempdir().unwrap();
        let mut manager = open(dir.path());
        assert!(matches!(
            manager.create_database("../escape"),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            manager.create_database(""),
            Err(Error::InvalidOperation(_))
        ));
    }

    // ─────────────────────────────────────────────
    // Test 2 : persistence details
    // ─────────────────────────────────────────────

    #[test]
    fn test_autosave_persists_mutations() {
        let dir = tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path()).autosave(true);
        let mut manager = DatabaseManager::open(config).unwrap();
        manager.execute("CREATE TABLE t (a INT)").unwrap();
        manager.execute("INSERT INTO t VALUES (7)").unwrap();

        let saved = read_database(&dir.path().join("main.qdb")).unwrap();
        assert_eq!(saved.query("SELECT a FROM t").unwrap().rows, vec![vec![Value::Int(7)]]);
    }

    #[test]
    fn test_empty_file_is_an_empty_database() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blank.qdb"), b"").unwrap();
        let mut manager = open(dir.path());
        manager.use_database("blank").unwrap();
        assert_eq!(manager.active_name(), "blank");
        assert!(manager.database().list_tables().is_empty());
        assert!(manager.recovered_from().is_none());
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempdir().unwrap();
        let mut manager = open(dir.path());
        manager.create_database("broken").unwrap();
        manager.use_database("main").unwrap();
        fs::write(dir.path().join("broken.qdb"), b"\xffnot a database").unwrap();

        manager.use_database("broken").unwrap();
        assert!(DatabaseManager::is_fallback_name(manager.active_name()));
        assert_eq!(manager.recovered_from(), Some("broken"));
        assert!(manager.database_exists(manager.active_name()));
        assert!(manager.database().list_tables().is_empty());
    }

    #[test]
    fn test_fallback_names() {
        assert!(DatabaseManager::is_fallback_name("fallback_42"));
        assert!(!DatabaseManager::is_fallback_name("fallback_"));
        assert!(!DatabaseManager::is_fallback_name("fallback_x1"));
        assert!(!DatabaseManager::is_fallback_name("main"));
    }
}
