//! Deadline store: the `deadlines.json` file on disk.
//!
//! The file is always rewritten whole through [`AtomicWriter`]. There is no
//! locking; another process editing the file is noticed through
//! [`StoreToken`] and the last writer wins.

use crate::atomic_write::{AtomicWriter, CreateOutcome, WriteOptions};
use crate::error::DeadlineError;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_FILE_NAME: &str = "deadlines.json";
pub const BOOTSTRAP_DATE_TIME: &str = "01/01/2024 - 00:00";
pub const BOOTSTRAP_ZONE: &str = "UTC";

/// One persisted entry, exactly as it appears in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeadline {
    #[serde(rename = "Date_Time")]
    pub date_time: String,
    #[serde(rename = "TZ")]
    pub tz: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub deadlines: Vec<RawDeadline>,
    /// Keys other tools may have added next to `deadlines`; kept on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl StoreDocument {
    pub fn new(deadlines: Vec<RawDeadline>) -> Self {
        Self {
            deadlines,
            extra: Map::new(),
        }
    }

    /// Content written when no store exists yet: one placeholder deadline.
    pub fn bootstrap() -> Self {
        Self::new(vec![RawDeadline {
            date_time: BOOTSTRAP_DATE_TIME.to_string(),
            tz: BOOTSTRAP_ZONE.to_string(),
        }])
    }

    fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self).context("Failed to serialize deadlines")?;
        out.push('\n');
        Ok(out)
    }
}

/// Staleness token: modification time plus length, captured after each read
/// and write. Metadata-only touches count as changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreToken {
    modified: Option<SystemTime>,
    len: u64,
}

impl StoreToken {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeadlineStore {
    path: PathBuf,
    writer: AtomicWriter,
}

impl DeadlineStore {
    pub fn new(path: impl Into<PathBuf>, options: WriteOptions) -> Self {
        Self {
            path: path.into(),
            writer: AtomicWriter::new(options),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store, creating it with the placeholder deadline when absent.
    pub fn load(&self) -> Result<(StoreDocument, StoreToken)> {
        match self.read() {
            Err(err) if is_not_found(&err) => {
                let doc = StoreDocument::bootstrap();
                match self.writer.write_new(&self.path, doc.to_json()?.as_bytes())? {
                    CreateOutcome::Created(stats) => info!(
                        "store.bootstrap path={} bytes={}",
                        self.path.display(),
                        stats.bytes_written
                    ),
                    CreateOutcome::AlreadyExists => debug!(
                        "store.bootstrap path={} raced=true",
                        self.path.display()
                    ),
                }
                self.read()
            }
            other => other,
        }
    }

    /// Read the store without creating it. A missing or unreadable file is a
    /// [`DeadlineError::TransientRead`].
    pub fn read(&self) -> Result<(StoreDocument, StoreToken)> {
        // Metadata before the content: a write landing in between leaves the
        // token older than the document, so the next check reloads.
        let token = self.current_token()?;
        let content = fs::read_to_string(&self.path).map_err(|source| {
            DeadlineError::TransientRead {
                path: self.path.clone(),
                source,
            }
        })?;
        let doc: StoreDocument =
            serde_json::from_str(&content).map_err(|source| DeadlineError::MalformedStore {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            "store.load path={} entries={}",
            self.path.display(),
            doc.deadlines.len()
        );
        Ok((doc, token))
    }

    /// Replace the whole file with `doc` and return the fresh token.
    pub fn save(&self, doc: &StoreDocument) -> Result<StoreToken> {
        let json = doc.to_json()?;
        let stats = self
            .writer
            .write_str(&self.path, &json)
            .with_context(|| format!("Failed to save deadlines to {}", self.path.display()))?;
        debug!(
            "store.save path={} entries={} bytes={} fsyncs={} elapsed_us={}",
            self.path.display(),
            doc.deadlines.len(),
            stats.bytes_written,
            stats.fsync_count,
            stats.elapsed.as_micros()
        );
        self.current_token()
    }

    /// True when the on-disk file no longer matches `token`.
    pub fn has_changed_since(&self, token: &StoreToken) -> Result<bool> {
        Ok(self.current_token()? != *token)
    }

    fn current_token(&self) -> Result<StoreToken> {
        let meta = fs::metadata(&self.path).map_err(|source| DeadlineError::TransientRead {
            path: self.path.clone(),
            source,
        })?;
        Ok(StoreToken::from_metadata(&meta))
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DeadlineError>(),
        Some(DeadlineError::TransientRead { source, .. }) if source.kind() == ErrorKind::NotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> DeadlineStore {
        DeadlineStore::new(tmp.path().join(DEFAULT_FILE_NAME), WriteOptions::fast())
    }

    #[test]
    fn load_bootstraps_missing_file() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let (doc, _) = store.load().unwrap();
        assert_eq!(doc, StoreDocument::bootstrap());

        let on_disk: JsonValue =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["deadlines"][0]["Date_Time"], "01/01/2024 - 00:00");
        assert_eq!(on_disk["deadlines"][0]["TZ"], "UTC");
    }

    #[test]
    fn load_keeps_existing_file() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(
            store.path(),
            r#"{"deadlines":[{"Date_Time":"12/25/2024 - 09:00","TZ":"Europe/Paris"}]}"#,
        )
        .unwrap();

        let (doc, _) = store.load().unwrap();
        assert_eq!(doc.deadlines.len(), 1);
        assert_eq!(doc.deadlines[0].tz, "Europe/Paris");
    }

    #[test]
    fn malformed_file_is_typed_and_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let garbage = r#"{"deadlines": [{"Date_Time": 5}]}"#;
        fs::write(store.path(), garbage).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeadlineError>(),
            Some(DeadlineError::MalformedStore { .. })
        ));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), garbage);
    }

    #[test]
    fn missing_deadlines_key_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(store.path(), r#"{"items": []}"#).unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeadlineError>(),
            Some(DeadlineError::MalformedStore { .. })
        ));
    }

    #[test]
    fn read_without_file_is_transient() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let err = store.read().unwrap_err();
        assert!(is_not_found(&err));
        assert!(!store.path().exists());
    }

    #[test]
    fn save_round_trips_and_keeps_extra_keys() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(store.path(), r#"{"deadlines":[],"owner":"me"}"#).unwrap();

        let (mut doc, _) = store.read().unwrap();
        doc.deadlines.push(RawDeadline {
            date_time: "12/25/2024 - 09:00".into(),
            tz: "UTC".into(),
        });
        store.save(&doc).unwrap();

        let (reloaded, _) = store.read().unwrap();
        assert_eq!(reloaded, doc);
        assert_eq!(reloaded.extra.get("owner"), Some(&JsonValue::from("me")));
    }

    #[test]
    fn token_tracks_external_rewrites() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let (_, token) = store.load().unwrap();
        assert!(!store.has_changed_since(&token).unwrap());

        fs::write(
            store.path(),
            r#"{"deadlines":[{"Date_Time":"12/31/2030 - 23:59","TZ":"UTC"},{"Date_Time":"01/01/2031 - 00:00","TZ":"UTC"}]}"#,
        )
        .unwrap();
        assert!(store.has_changed_since(&token).unwrap());
    }

    #[test]
    fn read_token_describes_file_as_read() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.load().unwrap();

        let (doc, token) = store.read().unwrap();
        assert!(!store.has_changed_since(&token).unwrap());

        let mut next = doc.clone();
        next.deadlines.push(RawDeadline {
            date_time: "12/25/2024 - 09:00".into(),
            tz: "UTC".into(),
        });
        fs::write(store.path(), serde_json::to_string(&next).unwrap()).unwrap();
        assert!(store.has_changed_since(&token).unwrap());

        let (reread, fresh) = store.read().unwrap();
        assert_eq!(reread, next);
        assert_ne!(fresh, token);
    }

    #[test]
    fn own_save_refreshes_token() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.load().unwrap();

        let token = store.save(&StoreDocument::new(Vec::new())).unwrap();
        assert!(!store.has_changed_since(&token).unwrap());
    }

    #[test]
    fn changed_check_on_missing_file_is_transient() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let (_, token) = store.load().unwrap();
        fs::remove_file(store.path()).unwrap();

        let err = store.has_changed_since(&token).unwrap_err();
        assert!(err
            .downcast_ref::<DeadlineError>()
            .is_some_and(DeadlineError::is_transient));
    }
}
