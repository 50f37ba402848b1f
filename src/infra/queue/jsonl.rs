//! File-backed request store.
//!
//! Every transition is appended to a JSON-lines journal and synced to disk
//! before `persist` returns. On replay the last record for an id wins. The
//! journal is compacted (one line per request) when opened and on flush.

use std::collections::HashMap;
use std::fs::{create_dir_all, rename, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{Request, RequestId, RequestStore, SchedulerError};

/// Journal-backed durable store.
pub struct JsonlRequestStore {
    path: PathBuf,
    stream: String,
    journal: Option<File>,
    /// Records appended since the last compaction.
    appended: usize,
}

impl JsonlRequestStore {
    /// Create a store writing `<stream>.jsonl` inside `path`.
    pub fn new(path: impl AsRef<Path>, stream: impl Into<String>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(SchedulerError::storage)?;
        Ok(Self {
            path,
            stream: stream.into(),
            journal: None,
            appended: 0,
        })
    }

    /// Path of the journal file.
    pub fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    fn read_journal(&self) -> Result<Vec<Request>, SchedulerError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&file_path).map_err(SchedulerError::storage)?;
        let mut order: Vec<RequestId> = Vec::new();
        let mut latest: HashMap<RequestId, Request> = HashMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(SchedulerError::storage)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    if latest.insert(request.id, request.clone()).is_none() {
                        order.push(request.id);
                    }
                }
                // A torn final write from a crash; everything before it is intact.
                Err(e) => tracing::warn!(line = line_no + 1, error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(order.into_iter().filter_map(|id| latest.remove(&id)).collect())
    }

    fn rewrite_disk(&mut self, requests: &[Request]) -> Result<(), SchedulerError> {
        let tmp_path = self.path.join(format!("{}.jsonl.tmp", self.stream));
        {
            let file = File::create(&tmp_path).map_err(SchedulerError::storage)?;
            let mut writer = BufWriter::new(file);
            for request in requests {
                let line = serde_json::to_string(request).map_err(SchedulerError::storage)?;
                writeln!(writer, "{line}").map_err(SchedulerError::storage)?;
            }
            let file = writer.into_inner().map_err(SchedulerError::storage)?;
            file.sync_all().map_err(SchedulerError::storage)?;
        }
        self.journal = None;
        rename(&tmp_path, self.file_path()).map_err(SchedulerError::storage)?;
        self.appended = 0;
        Ok(())
    }

    fn journal(&mut self) -> Result<&mut File, SchedulerError> {
        if self.journal.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_path())
                .map_err(SchedulerError::storage)?;
            self.journal = Some(file);
        }
        self.journal
            .as_mut()
            .ok_or_else(|| SchedulerError::Storage("journal unavailable".into()))
    }
}

impl RequestStore for JsonlRequestStore {
    fn load(&mut self) -> Result<Vec<Request>, SchedulerError> {
        let requests = self.read_journal()?;
        self.rewrite_disk(&requests)?;
        Ok(requests)
    }

    fn persist(&mut self, request: &Request) -> Result<(), SchedulerError> {
        let line = serde_json::to_string(request).map_err(SchedulerError::storage)?;
        let file = self.journal()?;
        writeln!(file, "{line}").map_err(SchedulerError::storage)?;
        file.sync_data().map_err(SchedulerError::storage)?;
        self.appended += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SchedulerError> {
        if self.appended == 0 {
            return Ok(());
        }
        let requests = self.read_journal()?;
        tracing::debug!(records = requests.len(), appended = self.appended, "compacting request journal");
        self.rewrite_disk(&requests)
    }

    fn backend(&self) -> &'static str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RequestStatus;

    #[test]
    fn test_replay_keeps_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = Request::queued("hello", 1, 0);
        {
            let mut store = JsonlRequestStore::new(dir.path(), "requests").unwrap();
            store.load().unwrap();
            store.persist(&req).unwrap();
            req.status = RequestStatus::Processing;
            store.persist(&req).unwrap();
        }

        let mut store = JsonlRequestStore::new(dir.path(), "requests").unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![req]);
    }

    #[test]
    fn test_flush_compacts_journal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlRequestStore::new(dir.path(), "requests").unwrap();
        store.load().unwrap();
        let mut req = Request::queued("x", 1, 0);
        store.persist(&req).unwrap();
        req.status = RequestStatus::Processing;
        store.persist(&req).unwrap();
        req.status = RequestStatus::Completed;
        store.persist(&req).unwrap();

        store.flush().unwrap();
        let contents = std::fs::read_to_string(store.file_path()).unwrap();
        assert_eq!(contents.lines().count(), 1);

        store.persist(&Request::queued("y", 2, 1)).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_torn_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::queued("ok", 1, 0);
        let path = dir.path().join("requests.jsonl");
        let mut body = serde_json::to_string(&req).unwrap();
        body.push_str("\n{\"id\":\"trunc");
        std::fs::write(&path, body).unwrap();

        let mut store = JsonlRequestStore::new(dir.path(), "requests").unwrap();
        assert_eq!(store.load().unwrap(), vec![req]);
    }
}
