//! A persistent, append-only store of generated formula candidates backed by SQLite.
//!
//! Rows are keyed for lookup by heteroatom class label and nominal mass, and are unique
//! by composition. Rows are never updated or deleted. Each completed generation pass for
//! a class is recorded in a coverage ledger along with the [`GenerationBounds`] it ran
//! under, which is how a later request decides whether it needs to generate at all.
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use itertools::Itertools;
use rusqlite::{
    params, params_from_iter, types::Value, Connection, OpenFlags, TransactionBehavior,
};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::constraints::HeteroatomClass;
use crate::elements::{self, Element};
use crate::formula::{Composition, FormulaCandidate};
use crate::generator::{GenerationBounds, GenerationError};

/// The element columns a newly created cache has. Other elements must be added
/// with [`FormulaCache::migrate_add_element`].
pub const DEFAULT_SCHEMA_ELEMENTS: &[&str] = &["C", "H", "N", "O", "S", "P", "Cl", "Na", "K"];

const COVERAGE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS class_coverage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    class_label TEXT NOT NULL,
    c_min INTEGER NOT NULL,
    c_max INTEGER NOT NULL,
    h_min INTEGER NOT NULL,
    h_max INTEGER NOT NULL,
    dbe_min REAL NOT NULL,
    dbe_max REAL NOT NULL,
    hc_min REAL NOT NULL,
    hc_max REAL NOT NULL,
    oc_min REAL NOT NULL,
    oc_max REAL NOT NULL,
    candidate_count INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS class_coverage_label ON class_coverage (class_label);
";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("The formula cache at {path} is unavailable: {reason}")]
    CacheUnavailable { path: String, reason: String },
    #[error("The formula cache has no column for {element}, which class {class_label} requires")]
    SchemaMismatch { element: String, class_label: String },
    #[error("{0} is not a known element")]
    UnknownElement(String),
    #[error("A formula cache operation failed: {0}")]
    Storage(
        #[source]
        #[from]
        rusqlite::Error,
    ),
    #[error("Failed to generate formulas: {0}")]
    Generation(
        #[source]
        #[from]
        GenerationError,
    ),
}

impl CacheError {
    /// Whether this error is confined to the class being processed. Other errors
    /// mean the store itself can no longer be trusted.
    pub fn is_class_local(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. } | Self::Generation(_))
    }
}

/// Where the cache lives and how connections to it are managed
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheDescriptor {
    pub path: PathBuf,
    /// The number of idle connections to keep
    pub pool_size: usize,
    /// How long to wait on another writer before failing, in milliseconds
    pub busy_timeout_ms: u64,
    /// Create the database if it does not exist
    pub create: bool,
}

impl Default for CacheDescriptor {
    fn default() -> Self {
        Self {
            path: PathBuf::from("molecular_formulas.sqlite"),
            pool_size: 8,
            busy_timeout_ms: 30_000,
            create: true,
        }
    }
}

impl CacheDescriptor {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    fn unavailable(&self, reason: impl ToString) -> CacheError {
        CacheError::CacheUnavailable {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// What happened when a class was requested from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassGeneration {
    /// A previous generation pass already covered the request
    Hit,
    /// The class was generated and stored
    Miss { generated: usize, inserted: usize },
}

/// A row of the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub id: i64,
    /// The canonical composition string rows are unique by
    pub composition_key: String,
    pub candidate: FormulaCandidate,
}

/// A connection checked out of a [`FormulaCache`]'s pool. It is returned to the pool
/// when dropped.
pub struct PooledConnection<'a> {
    /// Only `None` once the connection has been handed back in `drop`
    conn: Option<Connection>,
    cache: &'a FormulaCache,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut idle = self
            .cache
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.cache.descriptor.pool_size {
            idle.push(conn);
        }
    }
}

#[derive(Debug)]
pub struct FormulaCache {
    descriptor: CacheDescriptor,
    idle: Mutex<Vec<Connection>>,
    /// The elements the `molecular_formula` table has a count column for
    columns: RwLock<Vec<&'static Element>>,
    /// Serializes generation of each class within this process
    class_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FormulaCache {
    /// Connect to the cache, creating its tables if they are missing.
    ///
    /// Any failure here is reported as [`CacheError::CacheUnavailable`].
    pub fn open(descriptor: CacheDescriptor) -> Result<Self, CacheError> {
        let conn = Self::connect(&descriptor)?;
        Self::initialize_schema(&conn).map_err(|e| descriptor.unavailable(e))?;
        let columns = Self::read_columns(&conn).map_err(|e| descriptor.unavailable(e))?;
        info!(
            "Opened formula cache {} with {} element columns",
            descriptor.path.display(),
            columns.len()
        );
        Ok(Self {
            descriptor,
            idle: Mutex::new(vec![conn]),
            columns: RwLock::new(columns),
            class_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    fn connect(descriptor: &CacheDescriptor) -> Result<Connection, CacheError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if descriptor.create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&descriptor.path, flags)
            .map_err(|e| descriptor.unavailable(e))?;
        conn.busy_timeout(Duration::from_millis(descriptor.busy_timeout_ms))
            .map_err(|e| descriptor.unavailable(e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| descriptor.unavailable(e))?;
        Ok(conn)
    }

    fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
        let element_columns = DEFAULT_SCHEMA_ELEMENTS
            .iter()
            .map(|sym| format!("    \"{sym}\" INTEGER NOT NULL DEFAULT 0"))
            .join(",\n");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS molecular_formula (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    composition TEXT NOT NULL UNIQUE,
    class_label TEXT NOT NULL,
    nominal_mass INTEGER NOT NULL,
    mass REAL NOT NULL,
    dbe REAL NOT NULL,
    h_c REAL NOT NULL,
    o_c REAL NOT NULL,
{element_columns}
);
CREATE INDEX IF NOT EXISTS molecular_formula_bucket ON molecular_formula (class_label, nominal_mass);
{COVERAGE_SCHEMA}"
        );
        conn.execute_batch(&sql)
    }

    fn read_columns(conn: &Connection) -> rusqlite::Result<Vec<&'static Element>> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('molecular_formula')")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut columns: Vec<&'static Element> =
            names.iter().filter_map(|n| elements::lookup(n)).collect();
        columns.sort_by_key(|e| e.position());
        Ok(columns)
    }

    /// Check out a connection, opening a new one when the pool is empty
    pub fn acquire(&self) -> Result<PooledConnection<'_>, CacheError> {
        let conn = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let conn = match conn {
            Some(conn) => conn,
            None => {
                trace!("Opening a new cache connection");
                Self::connect(&self.descriptor)?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            cache: self,
        })
    }

    /// The elements the cache can store counts of
    pub fn element_columns(&self) -> Vec<&'static str> {
        self.columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.symbol)
            .collect()
    }

    fn has_column(&self, symbol: &str) -> bool {
        self.columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.symbol == symbol)
    }

    fn refresh_columns(&self, conn: &Connection) -> Result<(), CacheError> {
        let columns = Self::read_columns(conn)?;
        *self.columns.write().unwrap_or_else(PoisonError::into_inner) = columns;
        Ok(())
    }

    /// Require a column for every element in `symbols`, re-reading the schema once in case
    /// another process migrated it.
    fn check_schema(&self, symbols: &[&str], class_label: &str) -> Result<(), CacheError> {
        if symbols.iter().all(|s| self.has_column(s)) {
            return Ok(());
        }
        let conn = self.acquire()?;
        self.refresh_columns(&conn)?;
        match symbols.iter().find(|s| !self.has_column(s)) {
            Some(missing) => Err(CacheError::SchemaMismatch {
                element: missing.to_string(),
                class_label: class_label.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Add a count column for `symbol`. Returns `false` if the column already existed.
    ///
    /// Existing rows get a count of zero, which is what they already implied.
    pub fn migrate_add_element(&self, symbol: &str) -> Result<bool, CacheError> {
        let element =
            elements::lookup(symbol).ok_or_else(|| CacheError::UnknownElement(symbol.into()))?;
        let mut conn = self.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::read_columns(&tx)?.contains(&element) {
            return Ok(false);
        }
        tx.execute_batch(&format!(
            "ALTER TABLE molecular_formula ADD COLUMN \"{}\" INTEGER NOT NULL DEFAULT 0",
            element.symbol
        ))?;
        tx.commit()?;
        self.refresh_columns(&conn)?;
        info!("Added {} to the formula cache schema", element.symbol);
        Ok(true)
    }

    /// Whether any candidate of `class_label` with `nominal_mass` has been stored
    pub fn exists(&self, class_label: &str, nominal_mass: i64) -> Result<bool, CacheError> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM molecular_formula WHERE class_label = ?1 AND nominal_mass = ?2)",
        )?;
        let found = stmt.query_row(params![class_label, nominal_mass], |row| row.get(0))?;
        Ok(found)
    }

    /// Every stored candidate of `class_label` with `nominal_mass`, ordered by mass
    pub fn fetch(
        &self,
        class_label: &str,
        nominal_mass: i64,
    ) -> Result<Vec<FormulaCandidate>, CacheError> {
        let columns = self
            .columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let conn = self.acquire()?;
        let column_list = columns
            .iter()
            .map(|e| format!("\"{}\"", e.symbol))
            .join(", ");
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT class_label, nominal_mass, mass, dbe, h_c, o_c, {column_list}
            FROM molecular_formula WHERE class_label = ?1 AND nominal_mass = ?2 ORDER BY mass, id"
        ))?;
        let rows = stmt.query_map(params![class_label, nominal_mass], |row| {
            let mut composition = Composition::new();
            for (i, element) in columns.iter().enumerate() {
                composition.set(*element, row.get(6 + i)?);
            }
            Ok(FormulaCandidate {
                composition,
                class_label: row.get(0)?,
                nominal_mass: row.get(1)?,
                mass: row.get(2)?,
                dbe: row.get(3)?,
                h_c: row.get(4)?,
                o_c: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// As [`FormulaCache::fetch`], keeping only candidates admissible under `bounds`
    pub fn fetch_within(
        &self,
        class_label: &str,
        nominal_mass: i64,
        bounds: &GenerationBounds,
    ) -> Result<Vec<FormulaCandidate>, CacheError> {
        let mut candidates = self.fetch(class_label, nominal_mass)?;
        candidates.retain(|c| bounds.admits(c));
        Ok(candidates)
    }

    /// Store `candidates`, skipping any whose composition is already present.
    ///
    /// Returns the number of rows added. Fails without inserting anything if any
    /// candidate contains an element the schema has no column for.
    pub fn insert_many(&self, candidates: &[FormulaCandidate]) -> Result<usize, CacheError> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = self.insert_in(&tx, candidates)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_in(
        &self,
        conn: &Connection,
        candidates: &[FormulaCandidate],
    ) -> Result<usize, CacheError> {
        let symbols: Vec<&'static str> = candidates
            .iter()
            .flat_map(|c| c.composition.iter().map(|(e, _)| e.symbol))
            .unique()
            .collect();
        self.check_schema(&symbols, "").map_err(|e| match e {
            CacheError::SchemaMismatch { element, .. } => CacheError::SchemaMismatch {
                class_label: candidates
                    .iter()
                    .find(|c| c.composition.get(&element) > 0)
                    .map(|c| c.class_label.clone())
                    .unwrap_or_default(),
                element,
            },
            e => e,
        })?;
        let columns = self
            .columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let column_list = columns
            .iter()
            .map(|e| format!("\"{}\"", e.symbol))
            .join(", ");
        let placeholders = (1..=(7 + columns.len())).map(|i| format!("?{i}")).join(", ");
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO molecular_formula
            (composition, class_label, nominal_mass, mass, dbe, h_c, o_c, {column_list})
            VALUES ({placeholders})"
        ))?;
        let mut inserted = 0;
        for cand in candidates {
            let mut values = vec![
                Value::Text(cand.composition.to_string()),
                Value::Text(cand.class_label.clone()),
                Value::Integer(cand.nominal_mass),
                Value::Real(cand.mass),
                Value::Real(cand.dbe),
                Value::Real(cand.h_c),
                Value::Real(cand.o_c),
            ];
            values.extend(
                columns
                    .iter()
                    .map(|e| Value::Integer(cand.composition.get(e.symbol) as i64)),
            );
            inserted += stmt.execute(params_from_iter(values.iter()))?;
        }
        Ok(inserted)
    }

    fn covered_in(
        conn: &Connection,
        class_label: &str,
        bounds: &GenerationBounds,
    ) -> Result<bool, CacheError> {
        let mut stmt = conn.prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM class_coverage WHERE class_label = ?1
                AND c_min <= ?2 AND c_max >= ?3 AND h_min <= ?4 AND h_max >= ?5
                AND dbe_min <= ?6 AND dbe_max >= ?7 AND hc_min <= ?8 AND hc_max >= ?9
                AND oc_min <= ?10 AND oc_max >= ?11)",
        )?;
        let found = stmt.query_row(
            params![
                class_label,
                bounds.carbon.0,
                bounds.carbon.1,
                bounds.hydrogen.0,
                bounds.hydrogen.1,
                bounds.dbe.0,
                bounds.dbe.1,
                bounds.h_c.0,
                bounds.h_c.1,
                bounds.o_c.0,
                bounds.o_c.1,
            ],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn record_coverage(
        conn: &Connection,
        class_label: &str,
        bounds: &GenerationBounds,
        candidate_count: usize,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT INTO class_coverage
            (class_label, c_min, c_max, h_min, h_max, dbe_min, dbe_max, hc_min, hc_max, oc_min, oc_max, candidate_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                class_label,
                bounds.carbon.0,
                bounds.carbon.1,
                bounds.hydrogen.0,
                bounds.hydrogen.1,
                bounds.dbe.0,
                bounds.dbe.1,
                bounds.h_c.0,
                bounds.h_c.1,
                bounds.o_c.0,
                bounds.o_c.1,
                candidate_count as i64,
            ],
        )?;
        Ok(())
    }

    /// Whether a previous generation pass for `class_label` covers `bounds`
    pub fn is_covered(
        &self,
        class_label: &str,
        bounds: &GenerationBounds,
    ) -> Result<bool, CacheError> {
        let conn = self.acquire()?;
        Self::covered_in(&conn, class_label, bounds)
    }

    fn class_lock(&self, class_label: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .class_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(class_label.to_string()).or_default().clone()
    }

    /// Make sure the cache holds every candidate of `class` admissible under `bounds`,
    /// calling `generate` to produce them if no previous pass covered the request.
    ///
    /// At most one caller generates a class at a time within this process, and the
    /// insertion and its coverage record commit in one write transaction which first
    /// re-checks coverage, so other processes sharing the cache never store the same
    /// pass twice. A failure leaves nothing behind for the class.
    pub fn ensure_class<F>(
        &self,
        class: &HeteroatomClass,
        bounds: &GenerationBounds,
        generate: F,
    ) -> Result<ClassGeneration, CacheError>
    where
        F: FnOnce() -> Result<Vec<FormulaCandidate>, GenerationError>,
    {
        let label = class.label();
        let symbols: Vec<&str> = ["C", "H"]
            .into_iter()
            .chain(class.iter().map(|(s, _)| s))
            .collect();
        self.check_schema(&symbols, label)?;
        if self.is_covered(label, bounds)? {
            debug!("{label} is cached");
            return Ok(ClassGeneration::Hit);
        }

        let lock = self.class_lock(label);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_covered(label, bounds)? {
            debug!("{label} was cached while waiting");
            return Ok(ClassGeneration::Hit);
        }

        let candidates = generate()?;

        let mut conn = self.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::covered_in(&tx, label, bounds)? {
            debug!("{label} was cached by another connection");
            return Ok(ClassGeneration::Hit);
        }
        let inserted = self.insert_in(&tx, &candidates)?;
        Self::record_coverage(&tx, label, bounds, candidates.len())?;
        tx.commit()?;
        debug!(
            "{label} generated {} candidates, {inserted} new",
            candidates.len()
        );
        Ok(ClassGeneration::Miss {
            generated: candidates.len(),
            inserted,
        })
    }

    /// The total number of stored candidates
    pub fn row_count(&self) -> Result<usize, CacheError> {
        let conn = self.acquire()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM molecular_formula", [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }

    /// The distinct class labels with at least one stored candidate
    pub fn class_labels(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.acquire()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT class_label FROM molecular_formula ORDER BY class_label")?;
        let labels = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    /// Every stored row in insertion order
    pub fn records(&self) -> Result<Vec<CacheRecord>, CacheError> {
        let columns = self
            .columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let conn = self.acquire()?;
        let column_list = columns
            .iter()
            .map(|e| format!("\"{}\"", e.symbol))
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, composition, class_label, nominal_mass, mass, dbe, h_c, o_c, {column_list}
            FROM molecular_formula ORDER BY id"
        ))?;
        let rows = stmt.query_map([], |row| {
            let mut composition = Composition::new();
            for (i, element) in columns.iter().enumerate() {
                composition.set(*element, row.get(8 + i)?);
            }
            Ok(CacheRecord {
                id: row.get(0)?,
                composition_key: row.get(1)?,
                candidate: FormulaCandidate {
                    composition,
                    class_label: row.get(2)?,
                    nominal_mass: row.get(3)?,
                    mass: row.get(4)?,
                    dbe: row.get(5)?,
                    h_c: row.get(6)?,
                    o_c: row.get(7)?,
                },
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The number of generation passes recorded for `class_label`
    pub fn coverage_count(&self, class_label: &str) -> Result<usize, CacheError> {
        let conn = self.acquire()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM class_coverage WHERE class_label = ?1",
            params![class_label],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::generator::FormulaGenerator;

    fn bounds() -> GenerationBounds {
        GenerationBounds {
            carbon: (1, 20),
            hydrogen: (4, 40),
            dbe: (0.0, 20.0),
            h_c: (0.3, 3.0),
            o_c: (0.0, 1.2),
            max_candidates: 100_000,
        }
    }

    fn generate(
        class: &HeteroatomClass,
        bounds: GenerationBounds,
    ) -> Result<Vec<FormulaCandidate>, GenerationError> {
        FormulaGenerator::new(class, bounds)?.generate()
    }

    #[test]
    fn test_insert_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FormulaCache::open(CacheDescriptor::new(dir.path().join("cache.db"))).unwrap();
        let class = HeteroatomClass::parse("O2").unwrap();
        let candidates = generate(&class, bounds()).unwrap();
        let n = cache.insert_many(&candidates).unwrap();
        assert_eq!(n, candidates.len());
        assert_eq!(cache.insert_many(&candidates).unwrap(), 0);
        assert_eq!(cache.row_count().unwrap(), candidates.len());

        let stored = &candidates[candidates.len() / 2];
        assert!(cache.exists("O2", stored.nominal_mass).unwrap());
        assert!(!cache.exists("O3", stored.nominal_mass).unwrap());
        let bucket = cache.fetch("O2", stored.nominal_mass).unwrap();
        assert!(bucket.contains(stored));
        assert!(bucket.iter().all(|c| c.nominal_mass == stored.nominal_mass));
        assert!(cache.fetch("O2", -5).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_class() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FormulaCache::open(CacheDescriptor::new(dir.path().join("cache.db"))).unwrap();
        let class = HeteroatomClass::parse("N1O1").unwrap();
        let first = cache
            .ensure_class(&class, &bounds(), || generate(&class, bounds()))
            .unwrap();
        let ClassGeneration::Miss { generated, inserted } = first else {
            panic!("expected a miss, got {first:?}")
        };
        assert_eq!(generated, inserted);

        let second = cache
            .ensure_class(&class, &bounds(), || panic!("should not regenerate"))
            .unwrap();
        assert_eq!(second, ClassGeneration::Hit);

        let mut narrower = bounds();
        narrower.carbon = (2, 10);
        assert!(cache.is_covered("N1O1", &narrower).unwrap());

        let mut wider = bounds();
        wider.carbon = (1, 30);
        let third = cache
            .ensure_class(&class, &wider, || generate(&class, wider))
            .unwrap();
        let ClassGeneration::Miss {
            generated: g2,
            inserted: i2,
        } = third
        else {
            panic!("expected a miss, got {third:?}")
        };
        assert!(g2 > generated);
        assert_eq!(i2, g2 - generated);
        assert_eq!(cache.coverage_count("N1O1").unwrap(), 2);
    }

    #[test]
    fn test_generation_failure_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FormulaCache::open(CacheDescriptor::new(dir.path().join("cache.db"))).unwrap();
        let class = HeteroatomClass::parse("O1").unwrap();
        let err = cache
            .ensure_class(&class, &bounds(), || {
                Err(GenerationError::CandidateLimitExceeded {
                    class_label: "O1".into(),
                    limit: 1,
                })
            })
            .unwrap_err();
        assert!(err.is_class_local());
        assert_eq!(cache.row_count().unwrap(), 0);
        assert_eq!(cache.coverage_count("O1").unwrap(), 0);
    }

    #[test]
    fn test_schema_mismatch_and_migration() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FormulaCache::open(CacheDescriptor::new(dir.path().join("cache.db"))).unwrap();
        let class = HeteroatomClass::parse("Br1").unwrap();
        let err = cache
            .ensure_class(&class, &bounds(), || generate(&class, bounds()))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::SchemaMismatch { ref element, ref class_label } if element == "Br" && class_label == "Br1"
        ));
        assert_eq!(cache.row_count().unwrap(), 0);

        let candidates = generate(&class, bounds()).unwrap();
        let mut mixed = vec![FormulaCandidate::from_composition("C6H6".parse().unwrap())];
        mixed.extend(candidates.iter().cloned());
        assert!(matches!(
            cache.insert_many(&mixed),
            Err(CacheError::SchemaMismatch { ref element, ref class_label }) if element == "Br" && class_label == "Br1"
        ));
        assert_eq!(cache.row_count().unwrap(), 0);

        assert!(cache.migrate_add_element("Br").unwrap());
        assert!(!cache.migrate_add_element("Br").unwrap());
        assert!(cache.element_columns().contains(&"Br"));
        let outcome = cache
            .ensure_class(&class, &bounds(), || generate(&class, bounds()))
            .unwrap();
        assert!(matches!(outcome, ClassGeneration::Miss { .. }));
        let stored = &candidates[0];
        assert!(cache
            .fetch("Br1", stored.nominal_mass)
            .unwrap()
            .contains(stored));
        assert!(matches!(
            cache.migrate_add_element("Qq"),
            Err(CacheError::UnknownElement(_))
        ));
    }

    #[test]
    fn test_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut descriptor = CacheDescriptor::new(dir.path().join("missing").join("cache.db"));
        assert!(matches!(
            FormulaCache::open(descriptor.clone()),
            Err(CacheError::CacheUnavailable { .. })
        ));
        descriptor.path = dir.path().join("absent.db");
        descriptor.create = false;
        assert!(matches!(
            FormulaCache::open(descriptor),
            Err(CacheError::CacheUnavailable { .. })
        ));
    }

    #[test]
    fn test_concurrent_generation() {
        use rayon::prelude::*;
        let dir = tempfile::tempdir().unwrap();
        let cache = FormulaCache::open(CacheDescriptor::new(dir.path().join("cache.db"))).unwrap();
        let class = HeteroatomClass::parse("O3").unwrap();
        let outcomes: Vec<_> = (0..8)
            .into_par_iter()
            .map(|_| {
                cache
                    .ensure_class(&class, &bounds(), || generate(&class, bounds()))
                    .unwrap()
            })
            .collect();
        let misses = outcomes
            .iter()
            .filter(|o| matches!(o, ClassGeneration::Miss { .. }))
            .count();
        assert_eq!(misses, 1);
        assert_eq!(cache.coverage_count("O3").unwrap(), 1);
        assert_eq!(
            cache.row_count().unwrap(),
            generate(&class, bounds()).unwrap().len()
        );
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let class = HeteroatomClass::parse("S1").unwrap();
        {
            let cache = FormulaCache::open(CacheDescriptor::new(&path)).unwrap();
            cache
                .ensure_class(&class, &bounds(), || generate(&class, bounds()))
                .unwrap();
        }
        let cache = FormulaCache::open(CacheDescriptor::new(&path)).unwrap();
        assert!(cache.is_covered("S1", &bounds()).unwrap());
        assert_eq!(cache.class_labels().unwrap(), vec!["S1".to_string()]);
        let records = cache.records().unwrap();
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| r.composition_key == r.candidate.composition.to_string()));
    }
}
