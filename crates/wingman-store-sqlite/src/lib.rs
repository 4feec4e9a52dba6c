use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use wingman_core::{
    format_iso_date, parse_iso_date, DirectReport, EntityKind, ManagementTip, Record, RecordId,
};

const CREATE_DIRECT_REPORTS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS direct_reports (
  id INTEGER PRIMARY KEY AUTOINCREMENT CHECK (id >= 1),
  first_name TEXT NOT NULL CHECK (length(trim(first_name)) > 0),
  last_name TEXT NOT NULL CHECK (length(trim(last_name)) > 0),
  street_address_1 TEXT,
  street_address_2 TEXT,
  city TEXT,
  state TEXT,
  zipcode TEXT,
  country TEXT,
  birthday TEXT,
  hire_date TEXT,
  current_role TEXT,
  role_start_date TEXT,
  partner_name TEXT
);
";

const CREATE_MANAGEMENT_TIPS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS management_tips (
  id INTEGER PRIMARY KEY AUTOINCREMENT CHECK (id >= 1),
  date TEXT,
  text TEXT NOT NULL CHECK (length(trim(text)) > 0),
  metadata TEXT NOT NULL DEFAULT '{}'
);
";

const DIRECT_REPORT_COLUMNS: &str = "id, first_name, last_name, street_address_1, street_address_2,
    city, state, zipcode, country, birthday, hire_date, current_role, role_start_date, partner_name";

const MANAGEMENT_TIP_COLUMNS: &str = "id, date, text, metadata";

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} already exists in the relational store")]
    DuplicateKey { kind: EntityKind, id: RecordId },
    #[error("{kind} {id} does not exist in the relational store")]
    NotFound { kind: EntityKind, id: RecordId },
    #[error("relational store failed to {action}: {source}")]
    Sqlite {
        action: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("relational store row {id} in {table} is malformed: {reason}")]
    CorruptRow { table: &'static str, id: i64, reason: String },
    #[error("relational store backup file does not exist: {path}")]
    MissingBackup { path: PathBuf },
    #[error("relational store failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

trait SqliteResultExt<T> {
    fn action(self, action: &'static str) -> Result<T, StoreError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn action(self, action: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Sqlite { action, source })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout_ms: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub row_counts: BTreeMap<String, i64>,
}

/// One table per entity kind; every write runs in its own transaction.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if absent) the database file and apply runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        }
        let conn = Connection::open(path).action("open database")?;
        Self::configure(conn, options)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error when `SQLite` cannot allocate the connection.
    pub fn open_in_memory(options: &StoreOptions) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().action("open in-memory database")?;
        Self::configure(conn, options)
    }

    fn configure(conn: Connection, options: &StoreOptions) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode = WAL;").action("configure journal mode")?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .action("configure busy timeout")?;
        Ok(Self { conn })
    }

    /// Create the table for `kind` when absent. Safe to call on every run.
    ///
    /// Returns `true` when the table was created by this call.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be inspected or created.
    pub fn ensure_schema(&self, kind: EntityKind) -> Result<bool, StoreError> {
        let existed = table_exists(&self.conn, kind.table_name())?;
        let sql = match kind {
            EntityKind::DirectReport => CREATE_DIRECT_REPORTS_SQL,
            EntityKind::ManagementTip => CREATE_MANAGEMENT_TIPS_SQL,
        };
        self.conn.execute_batch(sql).action("create table")?;
        if !existed {
            tracing::info!(kind = %kind, table = kind.table_name(), "relational table created");
        }
        Ok(!existed)
    }

    /// Insert one record.
    ///
    /// # Errors
    /// Returns [`StoreError::DuplicateKey`] when the id is taken, or a storage error.
    pub fn insert(&mut self, record: &Record) -> Result<(), StoreError> {
        let tx = self.conn.transaction().action("start insert transaction")?;
        insert_row(&tx, record)?;
        tx.commit().action("commit insert")?;
        tracing::debug!(kind = %record.kind(), id = %record.id(), "relational row inserted");
        Ok(())
    }

    /// Insert many records in one transaction; nothing is inserted if any insert fails.
    ///
    /// # Errors
    /// Returns [`StoreError::DuplicateKey`] when any id is taken, or a storage error.
    pub fn insert_all(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction().action("start bulk insert transaction")?;
        for record in records {
            insert_row(&tx, record)?;
        }
        tx.commit().action("commit bulk insert")?;
        Ok(records.len())
    }

    /// Overwrite every column of the row identified by the record's id.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no such row exists, or a storage error.
    pub fn update(&mut self, record: &Record) -> Result<(), StoreError> {
        let tx = self.conn.transaction().action("start update transaction")?;
        let changed = match record {
            Record::DirectReport(report) => tx
                .execute(
                    "UPDATE direct_reports SET
                        first_name = ?2, last_name = ?3, street_address_1 = ?4,
                        street_address_2 = ?5, city = ?6, state = ?7, zipcode = ?8,
                        country = ?9, birthday = ?10, hire_date = ?11, current_role = ?12,
                        role_start_date = ?13, partner_name = ?14
                     WHERE id = ?1",
                    params![
                        report.id.get(),
                        report.first_name,
                        report.last_name,
                        report.street_address_1,
                        report.street_address_2,
                        report.city,
                        report.state,
                        report.zipcode,
                        report.country,
                        report.birthday.map(format_iso_date),
                        report.hire_date.map(format_iso_date),
                        report.current_role,
                        report.role_start_date.map(format_iso_date),
                        report.partner_name,
                    ],
                )
                .action("update direct report")?,
            Record::ManagementTip(tip) => tx
                .execute(
                    "UPDATE management_tips SET date = ?2, text = ?3, metadata = ?4 WHERE id = ?1",
                    params![
                        tip.id.get(),
                        tip.date.map(format_iso_date),
                        tip.text,
                        metadata_json(tip)?,
                    ],
                )
                .action("update management tip")?,
        };
        if changed == 0 {
            return Err(StoreError::NotFound { kind: record.kind(), id: record.id() });
        }
        tx.commit().action("commit update")?;
        tracing::debug!(kind = %record.kind(), id = %record.id(), "relational row updated");
        Ok(())
    }

    /// Delete one row.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no such row exists, or a storage error.
    pub fn delete(&mut self, kind: EntityKind, id: RecordId) -> Result<(), StoreError> {
        let tx = self.conn.transaction().action("start delete transaction")?;
        let changed = tx
            .execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table_name()), params![id.get()])
            .action("delete row")?;
        if changed == 0 {
            return Err(StoreError::NotFound { kind, id });
        }
        tx.commit().action("commit delete")?;
        tracing::debug!(kind = %kind, id = %id, "relational row deleted");
        Ok(())
    }

    /// Delete every row of `kind`, returning how many were removed.
    ///
    /// # Errors
    /// Returns a storage error when the delete cannot be committed.
    pub fn delete_all(&mut self, kind: EntityKind) -> Result<usize, StoreError> {
        let tx = self.conn.transaction().action("start purge transaction")?;
        let removed =
            tx.execute(&format!("DELETE FROM {}", kind.table_name()), []).action("purge rows")?;
        tx.commit().action("commit purge")?;
        Ok(removed)
    }

    /// Every row of `kind`, ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        match kind {
            EntityKind::DirectReport => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {DIRECT_REPORT_COLUMNS} FROM direct_reports ORDER BY id ASC"))
                    .action("prepare direct report listing")?;
                let mut rows = stmt.query([]).action("list direct reports")?;
                let mut records = Vec::new();
                while let Some(row) = rows.next().action("read direct report row")? {
                    records.push(Record::DirectReport(direct_report_from_row(row)?));
                }
                Ok(records)
            }
            EntityKind::ManagementTip => {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "SELECT {MANAGEMENT_TIP_COLUMNS} FROM management_tips ORDER BY id ASC"
                    ))
                    .action("prepare management tip listing")?;
                let mut rows = stmt.query([]).action("list management tips")?;
                let mut records = Vec::new();
                while let Some(row) = rows.next().action("read management tip row")? {
                    records.push(Record::ManagementTip(management_tip_from_row(row)?));
                }
                Ok(records)
            }
        }
    }

    /// Highest id ever inserted for `kind`, including deleted rows.
    ///
    /// # Errors
    /// Returns an error when the autoincrement bookkeeping cannot be read.
    pub fn high_water_id(&self, kind: EntityKind) -> Result<Option<RecordId>, StoreError> {
        if !table_exists(&self.conn, "sqlite_sequence")? {
            return Ok(None);
        }
        let seq = self
            .conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                params![kind.table_name()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .action("read id high-water mark")?;
        Ok(seq.filter(|seq| *seq > 0).map(RecordId))
    }

    /// Run `PRAGMA quick_check` and count rows per entity table.
    ///
    /// # Errors
    /// Returns an error when any check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport, StoreError> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .action("run PRAGMA quick_check")?;

        let mut row_counts = BTreeMap::new();
        for kind in EntityKind::ALL {
            let table = kind.table_name();
            if !table_exists(&self.conn, table)? {
                continue;
            }
            let count = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
                .action("count rows")?;
            row_counts.insert(table.to_string(), count);
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            row_counts,
        })
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created or the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<(), StoreError> {
        if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::Io { path: out_file.to_path_buf(), source })?;
        }
        self.conn.backup(DatabaseName::Main, out_file, None).action("back up database")
    }

    /// Replace the database contents with a backup written by [`Self::backup_database`].
    ///
    /// # Errors
    /// Returns an error when the backup file is missing or the restore fails.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<(), StoreError> {
        if !in_file.exists() {
            return Err(StoreError::MissingBackup { path: in_file.to_path_buf() });
        }
        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .action("restore database")
    }
}

fn insert_row(conn: &Connection, record: &Record) -> Result<(), StoreError> {
    let kind = record.kind();
    if row_exists(conn, kind, record.id())? {
        return Err(StoreError::DuplicateKey { kind, id: record.id() });
    }

    match record {
        Record::DirectReport(report) => {
            conn.execute(
                &format!(
                    "INSERT INTO direct_reports({DIRECT_REPORT_COLUMNS}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14
                    )"
                ),
                params![
                    report.id.get(),
                    report.first_name,
                    report.last_name,
                    report.street_address_1,
                    report.street_address_2,
                    report.city,
                    report.state,
                    report.zipcode,
                    report.country,
                    report.birthday.map(format_iso_date),
                    report.hire_date.map(format_iso_date),
                    report.current_role,
                    report.role_start_date.map(format_iso_date),
                    report.partner_name,
                ],
            )
            .action("insert direct report")?;
        }
        Record::ManagementTip(tip) => {
            conn.execute(
                &format!("INSERT INTO management_tips({MANAGEMENT_TIP_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                params![tip.id.get(), tip.date.map(format_iso_date), tip.text, metadata_json(tip)?],
            )
            .action("insert management tip")?;
        }
    }
    Ok(())
}

fn row_exists(conn: &Connection, kind: EntityKind, id: RecordId) -> Result<bool, StoreError> {
    let exists = conn
        .query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", kind.table_name()),
            params![id.get()],
            |row| row.get::<_, i64>(0),
        )
        .action("check for existing row")?;
    Ok(exists == 1)
}

fn direct_report_from_row(row: &Row<'_>) -> Result<DirectReport, StoreError> {
    const TABLE: &str = "direct_reports";
    let id: i64 = row.get(0).action("read direct report id")?;
    let text = |index: usize| -> Result<Option<String>, StoreError> {
        row.get::<_, Option<String>>(index).action("read direct report column")
    };
    let date = |index: usize| -> Result<Option<Date>, StoreError> {
        parse_date_column(TABLE, id, text(index)?)
    };

    Ok(DirectReport {
        id: RecordId(id),
        first_name: text(1)?.unwrap_or_default(),
        last_name: text(2)?.unwrap_or_default(),
        street_address_1: text(3)?,
        street_address_2: text(4)?,
        city: text(5)?,
        state: text(6)?,
        zipcode: text(7)?,
        country: text(8)?,
        birthday: date(9)?,
        hire_date: date(10)?,
        current_role: text(11)?,
        role_start_date: date(12)?,
        partner_name: text(13)?,
    })
}

fn management_tip_from_row(row: &Row<'_>) -> Result<ManagementTip, StoreError> {
    const TABLE: &str = "management_tips";
    let id: i64 = row.get(0).action("read management tip id")?;
    let date: Option<String> = row.get(1).action("read management tip date")?;
    let text: String = row.get(2).action("read management tip text")?;
    let metadata_raw: String = row.get(3).action("read management tip metadata")?;
    let metadata = serde_json::from_str::<BTreeMap<String, Value>>(&metadata_raw).map_err(|err| {
        StoreError::CorruptRow { table: TABLE, id, reason: format!("metadata is not a JSON object: {err}") }
    })?;

    Ok(ManagementTip { id: RecordId(id), date: parse_date_column(TABLE, id, date)?, text, metadata })
}

fn parse_date_column(
    table: &'static str,
    id: i64,
    raw: Option<String>,
) -> Result<Option<Date>, StoreError> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_iso_date(&raw).map(Some).ok_or_else(|| StoreError::CorruptRow {
            table,
            id,
            reason: format!("invalid ISO 8601 date {raw:?}"),
        }),
    }
}

fn metadata_json(tip: &ManagementTip) -> Result<String, StoreError> {
    serde_json::to_string(&tip.metadata).map_err(|err| StoreError::CorruptRow {
        table: "management_tips",
        id: tip.id.get(),
        reason: format!("metadata cannot be serialized: {err}"),
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool, StoreError> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .action("check if table exists")?;
    Ok(exists == 1)
}
