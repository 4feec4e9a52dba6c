use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use wingman_core::{DirectReport, EntityKind, ManagementTip, Record};

pub const DIRECT_REPORTS_FILE: &str = "direct_reports.json";
pub const MANAGEMENT_TIPS_FILE: &str = "management_tips.json";

const LEGACY_DIRECT_REPORT_KEYS: [(&str, &str); 5] = [
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("birthdate", "birthday"),
    ("hireDate", "hire_date"),
    ("partnerName", "partner_name"),
];

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("failed to {action} file mirror {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("file mirror {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("file mirror {path} must contain a JSON array of records")]
    NotAnArray { path: PathBuf },
    #[error("file mirror {path}: entry {index} is not a valid {kind}: {reason}")]
    InvalidEntry { path: PathBuf, kind: EntityKind, index: usize, reason: String },
    #[error("cannot write a {found} record into the {expected} file mirror")]
    KindMismatch { expected: EntityKind, found: EntityKind },
}

impl MirrorError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io { action, path: path.to_path_buf(), source }
    }
}

/// Flat-file snapshot of each entity kind: one pretty-printed JSON array per file.
#[derive(Debug, Clone)]
pub struct JsonMirror {
    direct_reports: PathBuf,
    management_tips: PathBuf,
}

impl JsonMirror {
    #[must_use]
    pub fn new(direct_reports: PathBuf, management_tips: PathBuf) -> Self {
        Self { direct_reports, management_tips }
    }

    /// Mirror files under `dir` with the default file names.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DIRECT_REPORTS_FILE), dir.join(MANAGEMENT_TIPS_FILE))
    }

    #[must_use]
    pub fn path(&self, kind: EntityKind) -> &Path {
        match kind {
            EntityKind::DirectReport => &self.direct_reports,
            EntityKind::ManagementTip => &self.management_tips,
        }
    }

    /// Replace the mirror of `kind` with a snapshot of `records`, in the given order.
    ///
    /// The snapshot goes to a temp file in the same directory which is synced and renamed
    /// over the target. Until that rename the previous file is untouched, and a temp file
    /// left by a failed call is deleted when it drops.
    ///
    /// # Errors
    /// Returns [`MirrorError::KindMismatch`] for records of another kind and
    /// [`MirrorError::Io`] when the temp file cannot be written or renamed.
    pub fn write_all(&self, kind: EntityKind, records: &[Record]) -> Result<(), MirrorError> {
        if let Some(found) = records.iter().map(Record::kind).find(|found| *found != kind) {
            return Err(MirrorError::KindMismatch { expected: kind, found });
        }

        let path = self.path(kind);
        let parent = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| MirrorError::io("create directory for", path, err))?;

        let mut bytes = serde_json::to_vec_pretty(records)
            .map_err(|source| MirrorError::Format { path: path.to_path_buf(), source })?;
        bytes.push(b'\n');

        let mut temp = NamedTempFile::new_in(parent)
            .map_err(|err| MirrorError::io("create temp file for", path, err))?;
        temp.write_all(&bytes).map_err(|err| MirrorError::io("write", path, err))?;
        temp.as_file().sync_all().map_err(|err| MirrorError::io("sync", path, err))?;
        temp.persist(path).map_err(|err| MirrorError::io("replace", path, err.error))?;
        sync_parent_dir(path).map_err(|err| MirrorError::io("sync directory of", path, err))?;

        tracing::debug!(kind = %kind, records = records.len(), path = %path.display(), "file mirror written");
        Ok(())
    }

    /// Load every record of `kind` in file order. A missing or blank file is an empty
    /// collection.
    ///
    /// Older file shapes are accepted: camelCase direct-report keys, tips stored as bare
    /// strings, and entries without a positive id (numbered after the largest id present).
    ///
    /// # Errors
    /// Returns [`MirrorError`] when the file cannot be read or does not hold an array of
    /// records of `kind`.
    pub fn read_all(&self, kind: EntityKind) -> Result<Vec<Record>, MirrorError> {
        let path = self.path(kind);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(MirrorError::io("read", path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|source| MirrorError::Format { path: path.to_path_buf(), source })?;
        let Value::Array(entries) = value else {
            return Err(MirrorError::NotAnArray { path: path.to_path_buf() });
        };

        let invalid = |index: usize, reason: String| MirrorError::InvalidEntry {
            path: path.to_path_buf(),
            kind,
            index,
            reason,
        };

        let mut objects = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| normalize_entry(kind, entry).map_err(|reason| invalid(index, reason)))
            .collect::<Result<Vec<_>, _>>()?;
        assign_missing_ids(&mut objects);

        objects
            .into_iter()
            .enumerate()
            .map(|(index, object)| {
                let value = Value::Object(object);
                let record = match kind {
                    EntityKind::DirectReport => {
                        serde_json::from_value::<DirectReport>(value).map(Record::DirectReport)
                    }
                    EntityKind::ManagementTip => {
                        serde_json::from_value::<ManagementTip>(value).map(Record::ManagementTip)
                    }
                };
                let record = record.map_err(|err| invalid(index, err.to_string()))?;
                record.check_required().map_err(|err| invalid(index, err.to_string()))?;
                Ok(record)
            })
            .collect()
    }
}

fn normalize_entry(kind: EntityKind, entry: Value) -> Result<Map<String, Value>, String> {
    let mut object = match (kind, entry) {
        (_, Value::Object(object)) => object,
        // Bare-string tips load undated.
        (EntityKind::ManagementTip, Value::String(text)) => {
            let mut object = Map::new();
            object.insert("text".to_string(), Value::String(text.trim().to_string()));
            object
        }
        (_, other) => return Err(format!("expected an object, found {other}")),
    };

    match kind {
        EntityKind::DirectReport => {
            for (legacy, current) in LEGACY_DIRECT_REPORT_KEYS {
                if let Some(value) = object.remove(legacy) {
                    object.entry(current.to_string()).or_insert(value);
                }
            }
        }
        EntityKind::ManagementTip => {
            // Timestamps keep only their calendar date.
            if let Some(Value::String(date)) = object.get_mut("date") {
                if date.len() > 10 && date.is_char_boundary(10) {
                    date.truncate(10);
                }
            }
        }
    }

    let id = object.get("id").and_then(positive_id).map_or(Value::Null, Value::from);
    object.insert("id".to_string(), id);
    Ok(object)
}

fn positive_id(value: &Value) -> Option<i64> {
    let id = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

fn assign_missing_ids(objects: &mut [Map<String, Value>]) {
    let mut next = objects.iter().filter_map(|object| object.get("id")?.as_i64()).max().unwrap_or(0);
    for object in objects.iter_mut().filter(|object| object.get("id").is_some_and(Value::is_null)) {
        next += 1;
        object.insert("id".to_string(), Value::from(next));
    }
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
