use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::ManagerError;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";
const SQUASHED_DIR: &str = "squashed";

/// One versioned schema change.
///
/// Statements may contain `{{DATABASE}}`, `{{ON_CLUSTER}}` and
/// `{{REPLICATED}}` placeholders, expanded by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl Migration {
    pub fn new(version: u64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn up(mut self, sql: impl Into<String>) -> Self {
        self.up.push(sql.into());
        self
    }

    pub fn down(mut self, sql: impl Into<String>) -> Self {
        self.down.push(sql.into());
        self
    }
}

/// Squashed baseline migrations plus incremental ones, each sorted by version.
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    squashed: Vec<Migration>,
    migrations: Vec<Migration>,
}

impl MigrationCatalog {
    /// Versions must be unique across both sets.
    pub fn new(
        mut squashed: Vec<Migration>,
        mut migrations: Vec<Migration>,
    ) -> Result<Self, ManagerError> {
        let mut seen = HashSet::new();
        for migration in squashed.iter().chain(migrations.iter()) {
            if !seen.insert(migration.version) {
                return Err(ManagerError::DuplicateVersion {
                    version: migration.version,
                });
            }
        }

        squashed.sort_by_key(|m| m.version);
        migrations.sort_by_key(|m| m.version);
        Ok(Self {
            squashed,
            migrations,
        })
    }

    /// Load `<version>_<name>.up.sql` / `.down.sql` files from `dir`, and
    /// squashed ones from `dir/squashed` when that directory exists.
    pub fn from_dir(dir: &Path) -> Result<Self, ManagerError> {
        let migrations = read_migration_dir(dir)?;
        let squashed_dir = dir.join(SQUASHED_DIR);
        let squashed = if squashed_dir.is_dir() {
            read_migration_dir(&squashed_dir)?
        } else {
            Vec::new()
        };
        Self::new(squashed, migrations)
    }

    pub fn squashed(&self) -> &[Migration] {
        &self.squashed
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Look up an incremental migration.
    pub fn get(&self, version: u64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.squashed.is_empty() && self.migrations.is_empty()
    }
}

fn read_migration_dir(dir: &Path) -> Result<Vec<Migration>, ManagerError> {
    let io_err = |source| ManagerError::Catalog {
        path: dir.to_path_buf(),
        source,
    };

    let mut by_version: BTreeMap<u64, Migration> = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (stem, is_up) = if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
            (stem, true)
        } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
            (stem, false)
        } else {
            continue;
        };

        let (version, name) = parse_stem(stem).ok_or_else(|| ManagerError::CatalogEntry {
            name: file_name.to_string(),
        })?;
        let sql = fs::read_to_string(&path).map_err(|source| ManagerError::Catalog {
            path: path.clone(),
            source,
        })?;

        let migration = by_version
            .entry(version)
            .or_insert_with(|| Migration::new(version, name));
        if migration.name != name {
            return Err(ManagerError::CatalogEntry {
                name: file_name.to_string(),
            });
        }
        let statements = split_statements(&sql);
        if is_up {
            migration.up = statements;
        } else {
            migration.down = statements;
        }
    }

    Ok(by_version.into_values().collect())
}

fn parse_stem(stem: &str) -> Option<(u64, &str)> {
    let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
    version.parse().ok().map(|v| (v, name))
}

/// Split a SQL script on `;`. Fragments made only of comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|fragment| {
            fragment
                .lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with("--"))
        })
        .map(str::to_string)
        .collect()
}
