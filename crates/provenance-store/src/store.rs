use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use provenance_engine::{traverse, OperationId, OperationLog, OperationLookup};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StoreError;

const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    /// File that [`LogStore::save`] writes to.
    pub persist_path: Option<PathBuf>,
}

/// Ask for the provenance of character `char_index` of the result of log `log_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraverseRequest {
    pub log_id: OperationId,
    pub char_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalStepRecord {
    pub operation_log: OperationLog,
    pub char_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraverseResponse {
    pub steps: Vec<TraversalStepRecord>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    logs: Vec<&'a OperationLog>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    logs: Vec<OperationLog>,
}

/// Keeps operation logs received from executions and answers traversal requests by id.
#[derive(Debug, Default)]
pub struct LogStore {
    logs: BTreeMap<OperationId, OperationLog>,
    options: StoreOptions,
}

impl LogStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            logs: BTreeMap::new(),
            options,
        }
    }

    /// Load the store persisted at `path`, or start an empty one if the file does not exist
    /// yet. Later [`save`](Self::save) calls write back to `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut store = Self::new(StoreOptions {
            persist_path: Some(path.to_path_buf()),
        });
        if !path.exists() {
            log::debug!("no log store at {}, starting empty", path.display());
            return Ok(store);
        }

        let file: StoreFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }
        store.store_logs(file.logs);
        log::debug!("loaded {} logs from {}", store.len(), path.display());
        Ok(store)
    }

    /// Add logs, replacing any stored log with the same id. Returns how many were added.
    pub fn store_logs(&mut self, logs: impl IntoIterator<Item = OperationLog>) -> usize {
        let mut count = 0;
        for entry in logs {
            if let Some(previous) = self.logs.insert(entry.id, entry) {
                log::warn!("replaced operation log #{}", previous.id);
            }
            count += 1;
        }
        count
    }

    pub fn load_log(&self, id: OperationId) -> Result<&OperationLog, StoreError> {
        self.logs.get(&id).ok_or(StoreError::UnknownLog(id))
    }

    pub fn traverse(&self, request: &TraverseRequest) -> Result<TraverseResponse, StoreError> {
        self.load_log(request.log_id)?;
        let steps = traverse(self, request.log_id, request.char_index)
            .map(|step| TraversalStepRecord {
                operation_log: step.operation.clone(),
                char_index: step.char_index,
            })
            .collect();
        Ok(TraverseResponse { steps })
    }

    /// Write all logs to the configured persist path.
    pub fn save(&self) -> Result<(), StoreError> {
        let path = self
            .options
            .persist_path
            .as_deref()
            .ok_or(StoreError::NoPersistPath)?;
        self.save_to(path)
    }

    /// Write all logs to `path`, replacing it atomically.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(
                &mut writer,
                &StoreFileRef {
                    version: FORMAT_VERSION,
                    logs: self.logs.values().collect(),
                },
            )?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        log::debug!("saved {} logs to {}", self.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.logs.keys().copied()
    }
}

impl OperationLookup for LogStore {
    fn operation(&self, id: OperationId) -> Option<&OperationLog> {
        self.logs.get(&id)
    }

    fn operation_count(&self) -> usize {
        self.logs.len()
    }
}
