use std::fmt::{Display, Formatter};
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::Date;
use wingman_core::{
    upcoming_milestones, validate, validate_update, DirectReport, EntityKind, FieldSet, Milestone,
    Record, RecordId, ValidationError,
};
use wingman_store_json::{JsonMirror, MirrorError};
use wingman_store_sqlite::{IntegrityReport, SqliteStore, StoreError};

mod config;
mod reader;

pub use config::{WingmanConfig, DEFAULT_DATABASE_FILE};
pub use reader::{Divergence, DualListing};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreName {
    Relational,
    FileMirror,
}

impl Display for StoreName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relational => f.write_str("relational store"),
            Self::FileMirror => f.write_str("file mirror"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Purge,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Purge => "purge",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{kind} {id} already exists")]
    DuplicateKey { kind: EntityKind, id: RecordId },
    #[error("{kind} {id} does not exist")]
    NotFound { kind: EntityKind, id: RecordId },
    #[error("{kind} file mirror failed")]
    Io {
        kind: EntityKind,
        #[source]
        source: MirrorError,
    },
    #[error(
        "{operation} of {kind}{} committed to the {committed} but the {stale} is stale; re-sync the mirror",
        .id.map(|id| format!(" {id}")).unwrap_or_default()
    )]
    PartialSync {
        operation: Operation,
        kind: EntityKind,
        id: Option<RecordId>,
        committed: StoreName,
        stale: StoreName,
        #[source]
        source: MirrorError,
    },
    #[error("relational store failed{}", .kind.map(|kind| format!(" for {kind}")).unwrap_or_default())]
    Storage {
        kind: Option<EntityKind>,
        #[source]
        source: StoreError,
    },
    #[error("failed to prepare data directory {path}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    fn from_store(kind: EntityKind, err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { kind, id } => Self::DuplicateKey { kind, id },
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Storage { kind: Some(kind), source: other },
        }
    }

    fn partial(operation: Operation, kind: EntityKind, id: Option<RecordId>, source: MirrorError) -> Self {
        Self::PartialSync {
            operation,
            kind,
            id,
            committed: StoreName::Relational,
            stale: StoreName::FileMirror,
            source,
        }
    }

    /// The store that failed, when the error came from one.
    #[must_use]
    pub fn failed_store(&self) -> Option<StoreName> {
        match self {
            Self::Validation(_) | Self::DataDir { .. } => None,
            Self::DuplicateKey { .. } | Self::NotFound { .. } | Self::Storage { .. } => {
                Some(StoreName::Relational)
            }
            Self::Io { .. } | Self::PartialSync { .. } => Some(StoreName::FileMirror),
        }
    }
}

/// What startup found and did for one entity kind.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KindStartup {
    pub kind: EntityKind,
    pub table_created: bool,
    pub seeded_from_file_mirror: usize,
    pub loaded: usize,
    pub next_id: RecordId,
    pub divergence: Divergence,
    /// Set when the file mirror could not be read; divergence is then unknown.
    pub file_mirror_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StartupReport {
    pub kinds: Vec<KindStartup>,
}

impl StartupReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.kinds
            .iter()
            .all(|kind| kind.divergence.is_empty() && kind.file_mirror_error.is_none())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KindStatus {
    pub kind: EntityKind,
    pub file_mirror_path: PathBuf,
    pub in_memory: usize,
    pub file_mirror: usize,
    pub relational: usize,
    pub next_id: RecordId,
    pub divergence: Divergence,
}

#[derive(Debug)]
struct Collection {
    records: Vec<Record>,
    next_id: RecordId,
}

impl Default for Collection {
    fn default() -> Self {
        Self { records: Vec::new(), next_id: RecordId::FIRST }
    }
}

impl Collection {
    fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|record| record.id() == id)
    }
}

/// Sole writer of both stores. Every mutation validates, applies in memory, commits to the
/// relational store (rolling memory back on failure), then rewrites the file mirror.
pub struct SyncCoordinator {
    store: SqliteStore,
    mirror: JsonMirror,
    direct_reports: Collection,
    management_tips: Collection,
}

impl SyncCoordinator {
    /// Open both stores described by `config`, creating them on first run, and load the
    /// in-memory collections from the relational store.
    ///
    /// # Errors
    /// Returns [`SyncError`] when the data directory or database cannot be opened, or when a
    /// newly created table cannot be seeded from the file mirror.
    pub fn open(config: &WingmanConfig) -> Result<(Self, StartupReport), SyncError> {
        fs::create_dir_all(&config.data_dir)
            .map_err(|source| SyncError::DataDir { path: config.data_dir.clone(), source })?;
        let store = SqliteStore::open(&config.database_path(), &config.store_options())
            .map_err(|source| SyncError::Storage { kind: None, source })?;
        Self::bootstrap(store, config.mirror())
    }

    /// Bring an already opened store in line with `mirror` and load the collections.
    ///
    /// A table created by this call is seeded with the mirror's records. Otherwise the
    /// relational store wins and any disagreement with the mirror is reported, not repaired.
    ///
    /// # Errors
    /// Returns [`SyncError`] when the schema cannot be ensured, seeding fails, or the
    /// relational rows cannot be loaded.
    pub fn bootstrap(store: SqliteStore, mirror: JsonMirror) -> Result<(Self, StartupReport), SyncError> {
        let mut coordinator = Self {
            store,
            mirror,
            direct_reports: Collection::default(),
            management_tips: Collection::default(),
        };
        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            kinds.push(coordinator.bootstrap_kind(kind)?);
        }
        Ok((coordinator, StartupReport { kinds }))
    }

    fn bootstrap_kind(&mut self, kind: EntityKind) -> Result<KindStartup, SyncError> {
        let table_created =
            self.store.ensure_schema(kind).map_err(|err| SyncError::from_store(kind, err))?;
        // A new table can only be seeded from a readable mirror. An existing table is
        // authoritative, so an unreadable mirror there is reported and startup continues.
        let file_records = match self.mirror.read_all(kind) {
            Ok(records) => Ok(records),
            Err(source) if table_created => return Err(SyncError::Io { kind, source }),
            Err(err) => Err(err.to_string()),
        };

        let mut seeded_from_file_mirror = 0;
        if let (true, Ok(records)) = (table_created, &file_records) {
            seeded_from_file_mirror =
                self.store.insert_all(records).map_err(|err| SyncError::from_store(kind, err))?;
            if seeded_from_file_mirror > 0 {
                tracing::info!(kind = %kind, records = seeded_from_file_mirror, "relational table seeded from file mirror");
            }
        }

        let records = self.store.list(kind).map_err(|err| SyncError::from_store(kind, err))?;
        let high_water =
            self.store.high_water_id(kind).map_err(|err| SyncError::from_store(kind, err))?;
        let next_id = records
            .iter()
            .map(Record::id)
            .chain(high_water)
            .max()
            .map_or(RecordId::FIRST, RecordId::next);

        let (divergence, file_mirror_error) = match file_records {
            Ok(file_records) => (Divergence::between(&file_records, &records), None),
            Err(err) => (Divergence::default(), Some(err)),
        };
        if let Some(err) = &file_mirror_error {
            tracing::warn!(kind = %kind, error = %err, "file mirror unreadable at startup");
        } else if !divergence.is_empty() {
            tracing::warn!(
                kind = %kind,
                only_in_file_mirror = ?divergence.only_in_file_mirror,
                only_in_relational = ?divergence.only_in_relational,
                mismatched = ?divergence.mismatched,
                duplicated_in_file_mirror = ?divergence.duplicated_in_file_mirror,
                "file mirror and relational store disagree; relational store loaded"
            );
        }

        let loaded = records.len();
        *self.collection_mut(kind) = Collection { records, next_id };
        Ok(KindStartup {
            kind,
            table_created,
            seeded_from_file_mirror,
            loaded,
            next_id,
            divergence,
            file_mirror_error,
        })
    }

    fn collection(&self, kind: EntityKind) -> &Collection {
        match kind {
            EntityKind::DirectReport => &self.direct_reports,
            EntityKind::ManagementTip => &self.management_tips,
        }
    }

    fn collection_mut(&mut self, kind: EntityKind) -> &mut Collection {
        match kind {
            EntityKind::DirectReport => &mut self.direct_reports,
            EntityKind::ManagementTip => &mut self.management_tips,
        }
    }

    /// In-memory records of `kind`, in insertion order.
    #[must_use]
    pub fn records(&self, kind: EntityKind) -> &[Record] {
        &self.collection(kind).records
    }

    #[must_use]
    pub fn next_id(&self, kind: EntityKind) -> RecordId {
        self.collection(kind).next_id
    }

    #[must_use]
    pub fn mirror_path(&self, kind: EntityKind) -> &Path {
        self.mirror.path(kind)
    }

    /// Validate `fields`, assign the next id, and persist the new record to both stores.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] before any store is touched, a relational error
    /// after rolling memory back, or [`SyncError::PartialSync`] when only the file mirror
    /// write failed.
    pub fn create(&mut self, kind: EntityKind, fields: &FieldSet) -> Result<Record, SyncError> {
        let validated = validate(kind, fields)?;
        let id = self.collection(kind).next_id;
        let record = validated.into_record(id);

        self.collection_mut(kind).records.push(record.clone());
        if let Err(err) = self.store.insert(&record) {
            self.collection_mut(kind).records.pop();
            tracing::debug!(kind = %kind, id = %id, error = %err, "create rolled back");
            return Err(SyncError::from_store(kind, err));
        }
        self.collection_mut(kind).next_id = id.next();

        self.write_mirror(Operation::Create, kind, Some(id))?;
        tracing::info!(kind = %kind, id = %id, "record created");
        Ok(record)
    }

    /// Overlay `fields` on record `id` and persist the result to both stores.
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] or [`SyncError::Validation`] before any store is
    /// touched, a relational error after rolling memory back, or
    /// [`SyncError::PartialSync`] when only the file mirror write failed.
    pub fn update(&mut self, kind: EntityKind, id: RecordId, fields: &FieldSet) -> Result<Record, SyncError> {
        let collection = self.collection_mut(kind);
        let index = collection.position(id).ok_or(SyncError::NotFound { kind, id })?;
        let updated = validate_update(&collection.records[index], fields)?;
        let previous = mem::replace(&mut collection.records[index], updated.clone());

        if let Err(err) = self.store.update(&updated) {
            self.collection_mut(kind).records[index] = previous;
            tracing::debug!(kind = %kind, id = %id, error = %err, "update rolled back");
            return Err(SyncError::from_store(kind, err));
        }

        self.write_mirror(Operation::Update, kind, Some(id))?;
        tracing::info!(kind = %kind, id = %id, "record updated");
        Ok(updated)
    }

    /// Remove record `id` from both stores. The id is never handed out again.
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] before any store is touched, a relational error
    /// after rolling memory back, or [`SyncError::PartialSync`] when only the file mirror
    /// write failed.
    pub fn delete(&mut self, kind: EntityKind, id: RecordId) -> Result<RecordId, SyncError> {
        let collection = self.collection_mut(kind);
        let index = collection.position(id).ok_or(SyncError::NotFound { kind, id })?;
        let removed = collection.records.remove(index);

        if let Err(err) = self.store.delete(kind, id) {
            self.collection_mut(kind).records.insert(index, removed);
            tracing::debug!(kind = %kind, id = %id, error = %err, "delete rolled back");
            return Err(SyncError::from_store(kind, err));
        }

        self.write_mirror(Operation::Delete, kind, Some(id))?;
        tracing::info!(kind = %kind, id = %id, "record deleted");
        Ok(id)
    }

    /// Remove every record of `kind` from both stores, returning the relational row count.
    ///
    /// # Errors
    /// Same contract as [`Self::delete`].
    pub fn purge(&mut self, kind: EntityKind) -> Result<usize, SyncError> {
        let previous = mem::take(&mut self.collection_mut(kind).records);

        let removed = match self.store.delete_all(kind) {
            Ok(removed) => removed,
            Err(err) => {
                self.collection_mut(kind).records = previous;
                tracing::debug!(kind = %kind, error = %err, "purge rolled back");
                return Err(SyncError::from_store(kind, err));
            }
        };

        self.write_mirror(Operation::Purge, kind, None)?;
        tracing::info!(kind = %kind, removed, "records purged");
        Ok(removed)
    }

    fn write_mirror(&self, operation: Operation, kind: EntityKind, id: Option<RecordId>) -> Result<(), SyncError> {
        self.mirror.write_all(kind, self.records(kind)).map_err(|err| {
            tracing::warn!(
                kind = %kind,
                operation = %operation,
                error = %err,
                "relational store committed but file mirror write failed"
            );
            SyncError::partial(operation, kind, id, err)
        })
    }

    /// Read both stores for `kind` and return them separately.
    ///
    /// # Errors
    /// Returns [`SyncError::Io`] when the file mirror cannot be read, or
    /// [`SyncError::Storage`] when the relational rows cannot be listed.
    pub fn list(&self, kind: EntityKind) -> Result<DualListing, SyncError> {
        let file_mirror =
            self.mirror.read_all(kind).map_err(|source| SyncError::Io { kind, source })?;
        let relational = self.store.list(kind).map_err(|err| SyncError::from_store(kind, err))?;
        Ok(DualListing { kind, file_mirror, relational })
    }

    /// Snapshot of every kind: counts per store and where they disagree.
    ///
    /// # Errors
    /// Same contract as [`Self::list`].
    pub fn status(&self) -> Result<Vec<KindStatus>, SyncError> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| -> Result<KindStatus, SyncError> {
                let listing = self.list(kind)?;
                Ok(KindStatus {
                    kind,
                    file_mirror_path: self.mirror.path(kind).to_path_buf(),
                    in_memory: self.records(kind).len(),
                    file_mirror: listing.file_mirror.len(),
                    relational: listing.relational.len(),
                    next_id: self.next_id(kind),
                    divergence: listing.divergence(),
                })
            })
            .collect()
    }

    /// Existing record with the same content key as `fields` would have once created.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] when `fields` would not be accepted by create.
    pub fn find_duplicate(&self, kind: EntityKind, fields: &FieldSet) -> Result<Option<&Record>, SyncError> {
        let key = validate(kind, fields)?.dedup_key();
        Ok(self.records(kind).iter().find(|record| record.dedup_key() == key))
    }

    /// Rewrite the file mirror of `kind` from the in-memory collection.
    ///
    /// # Errors
    /// Returns [`SyncError::Io`] when the mirror cannot be written.
    pub fn resync_mirror(&self, kind: EntityKind) -> Result<usize, SyncError> {
        let records = self.records(kind);
        self.mirror.write_all(kind, records).map_err(|source| SyncError::Io { kind, source })?;
        tracing::info!(kind = %kind, records = records.len(), "file mirror re-synced");
        Ok(records.len())
    }

    #[must_use]
    pub fn milestones(&self, today: Date, range_days: u32) -> Vec<Milestone> {
        let reports = self
            .records(EntityKind::DirectReport)
            .iter()
            .filter_map(Record::as_direct_report)
            .cloned()
            .collect::<Vec<DirectReport>>();
        upcoming_milestones(&reports, today, range_days)
    }

    /// # Errors
    /// Returns [`SyncError::Storage`] when the check cannot run.
    pub fn integrity_check(&self) -> Result<IntegrityReport, SyncError> {
        self.store.integrity_check().map_err(|source| SyncError::Storage { kind: None, source })
    }

    /// # Errors
    /// Returns [`SyncError::Storage`] when the backup cannot be written.
    pub fn backup_database(&self, out_file: &Path) -> Result<(), SyncError> {
        self.store.backup_database(out_file).map_err(|source| SyncError::Storage { kind: None, source })
    }

    /// Replace the relational store with a backup and reload the collections from it.
    ///
    /// The file mirror is left as it was; the returned report shows where it now disagrees.
    ///
    /// # Errors
    /// Returns [`SyncError::Storage`] when the restore fails, or any error [`Self::bootstrap`]
    /// can return while reloading.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<StartupReport, SyncError> {
        self.store
            .restore_database(in_file)
            .map_err(|source| SyncError::Storage { kind: None, source })?;
        tracing::info!(path = %in_file.display(), "relational store restored from backup");

        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            kinds.push(self.bootstrap_kind(kind)?);
        }
        Ok(StartupReport { kinds })
    }
}
