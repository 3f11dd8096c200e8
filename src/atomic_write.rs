use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    Durable,
    Fast,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub durability: DurabilityMode,
    pub preserve_permissions: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::Durable,
            preserve_permissions: true,
        }
    }
}

impl WriteOptions {
    pub fn durable() -> Self {
        Self::default()
    }

    pub fn fast() -> Self {
        Self {
            durability: DurabilityMode::Fast,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteStats {
    pub bytes_written: u64,
    pub fsync_count: u32,
    pub elapsed: Duration,
}

/// Outcome of [`AtomicWriter::write_new`].
#[derive(Debug)]
pub enum CreateOutcome {
    Created(WriteStats),
    AlreadyExists,
}

/// Writes whole files through a temp file in the same directory and a rename,
/// so readers see either the old content or the new content, never a prefix.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    options: WriteOptions,
}

impl AtomicWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    pub fn write_str(&self, path: &Path, content: &str) -> Result<WriteStats> {
        self.write_bytes(path, content.as_bytes())
    }

    /// Replace `path` with `content`, creating it (and its parent) if needed.
    pub fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<WriteStats> {
        let start = Instant::now();
        let parent = parent_dir(path)?;

        let existing_meta = match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to stat {}", path.display()));
            }
        };

        if existing_meta.is_none() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory for {}", path.display())
            })?;
        }

        let (temp_file, mut fsync_count) = self.stage(parent, path, content)?;

        if self.options.preserve_permissions {
            if let Some(meta) = existing_meta.as_ref() {
                fs::set_permissions(temp_file.path(), meta.permissions()).with_context(|| {
                    format!(
                        "Failed to preserve permissions while writing {}",
                        path.display()
                    )
                })?;
            }
        }

        temp_file.persist(path).map_err(|e| {
            anyhow::Error::new(e.error)
                .context(format!("Failed to atomically replace {}", path.display()))
        })?;

        fsync_count += self.sync_parent(parent)?;

        Ok(WriteStats {
            bytes_written: content.len() as u64,
            fsync_count,
            elapsed: start.elapsed(),
        })
    }

    /// Create `path` only if nothing exists there yet. A concurrent creator
    /// wins and its content is left alone.
    pub fn write_new(&self, path: &Path, content: &[u8]) -> Result<CreateOutcome> {
        let start = Instant::now();
        let parent = parent_dir(path)?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory for {}", path.display()))?;

        let (temp_file, mut fsync_count) = self.stage(parent, path, content)?;

        match temp_file.persist_noclobber(path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                return Ok(CreateOutcome::AlreadyExists);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e.error)
                    .context(format!("Failed to create {}", path.display())));
            }
        }

        fsync_count += self.sync_parent(parent)?;

        Ok(CreateOutcome::Created(WriteStats {
            bytes_written: content.len() as u64,
            fsync_count,
            elapsed: start.elapsed(),
        }))
    }

    fn stage(&self, parent: &Path, path: &Path, content: &[u8]) -> Result<(NamedTempFile, u32)> {
        let mut temp_file = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            writer
                .write_all(content)
                .with_context(|| format!("Failed to write {} bytes to temp file", content.len()))?;
            writer.flush().context("Failed to flush temp file")?;
        }

        let mut fsync_count = 0;
        if self.options.durability == DurabilityMode::Durable {
            temp_file
                .as_file()
                .sync_data()
                .with_context(|| format!("Failed to sync temp data for {}", path.display()))?;
            fsync_count += 1;
        }
        Ok((temp_file, fsync_count))
    }

    fn sync_parent(&self, parent: &Path) -> Result<u32> {
        if self.options.durability != DurabilityMode::Durable {
            return Ok(0);
        }
        fsync_parent_dir(parent)
            .with_context(|| format!("Failed to sync parent dir {}", parent.display()))?;
        Ok(1)
    }
}

// A bare file name like "deadlines.json" has an empty parent; that means ".".
fn parent_dir(path: &Path) -> Result<&Path> {
    let parent = path.parent().with_context(|| {
        format!(
            "Cannot write to {}: path has no parent directory",
            path.display()
        )
    })?;
    Ok(if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    })
}

#[cfg(unix)]
fn fsync_parent_dir(parent: &Path) -> Result<()> {
    let dir = fs::File::open(parent)
        .with_context(|| format!("Failed to open parent dir {}", parent.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync parent dir {}", parent.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_parent_dir(_parent: &Path) -> Result<()> {
    Ok(())
}
