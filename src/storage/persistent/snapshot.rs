//! Atomic snapshot files.
//!
//! A snapshot file is a codec header followed by two framed entries: a
//! [`SnapshotHeader`] and the payload. Files are written to a uniquely named
//! temp file, fsynced and renamed into place, so a crash leaves either the
//! old snapshot or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec;
use crate::containers::{ContainerSnapshot, IntidContainedStorage};
use crate::error::{IntIdError, IntIdResult};
use crate::registry::{IntIds, IntIdsConfig, RegistrySnapshot};
use crate::storage::ObjectStore;

/// Metadata written ahead of every snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Codec version the file was written with.
    pub version: u8,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

fn io_err(path: &Path, err: &IoError) -> IntIdError {
    IntIdError::storage(format!("{}: {err}", path.display()))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".tmp.{}", Uuid::new_v4()));
    path.with_file_name(name)
}

fn write_to(temp: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)?;
    let mut writer = BufWriter::new(file);
    codec::write_header(&mut writer)?;
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Write `value` to `path` atomically.
///
/// # Errors
/// Returns `Storage` on serialization or IO failure; `path` is untouched.
pub fn write_snapshot<T: Serialize>(path: impl AsRef<Path>, value: &T) -> IntIdResult<()> {
    let path = path.as_ref();
    let header = SnapshotHeader {
        version: codec::CODEC_VERSION,
        created_at: Utc::now(),
    };
    let mut bytes = codec::encode(&header).map_err(|e| io_err(path, &e))?;
    bytes.extend(codec::encode(value).map_err(|e| io_err(path, &e))?);

    let temp = temp_path_for(path);
    if let Err(err) = write_to(&temp, &bytes) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %cleanup, "failed to remove temp snapshot");
            }
        }
        return Err(io_err(path, &err));
    }
    fs::rename(&temp, path).map_err(|e| io_err(path, &e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote snapshot");
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`].
///
/// # Errors
/// Returns `Storage` if the file is missing, truncated, has the wrong
/// magic or version, or fails its checksum.
pub fn read_snapshot<T: DeserializeOwned>(path: impl AsRef<Path>) -> IntIdResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| io_err(path, &e))?;
    let mut reader = BufReader::new(file);

    let version = codec::read_header(&mut reader).map_err(|e| io_err(path, &e))?;
    if version != codec::CODEC_VERSION {
        return Err(IntIdError::storage(format!(
            "{}: unsupported snapshot version {version}",
            path.display()
        )));
    }
    let header: SnapshotHeader = codec::decode(&mut reader).map_err(|e| io_err(path, &e))?;
    let value = codec::decode(&mut reader).map_err(|e| io_err(path, &e))?;
    debug!(path = %path.display(), created_at = %header.created_at, "read snapshot");
    Ok(value)
}

/// A registry together with its container index, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: DeserializeOwned"
))]
pub struct IndexSnapshot<K> {
    /// Registry mappings.
    pub registry: RegistrySnapshot<K>,
    /// Container index, if one was saved.
    pub containers: Option<ContainerSnapshot>,
}

impl<K> IndexSnapshot<K> {
    /// Capture `intids` and, optionally, a container index over it.
    ///
    /// # Errors
    /// Returns `Internal` if a lock is poisoned.
    pub fn capture<S>(
        intids: &IntIds<S>,
        containers: Option<&IntidContainedStorage<S>>,
    ) -> IntIdResult<Self>
    where
        S: ObjectStore<Key = K> + 'static,
    {
        Ok(Self {
            registry: intids.snapshot()?,
            containers: containers.map(IntidContainedStorage::snapshot).transpose()?,
        })
    }

    /// Rebuild the registry (and container index) over `store`.
    ///
    /// # Errors
    /// Returns `CorruptSnapshot` if either part fails validation.
    #[allow(clippy::type_complexity)]
    pub fn restore<S>(
        self,
        store: Arc<S>,
        cfg: IntIdsConfig,
    ) -> IntIdResult<(Arc<IntIds<S>>, Option<IntidContainedStorage<S>>)>
    where
        S: ObjectStore<Key = K> + 'static,
    {
        let intids = Arc::new(IntIds::restore(self.registry, store, cfg)?);
        let containers = self
            .containers
            .map(|snapshot| IntidContainedStorage::restore(Arc::clone(&intids), snapshot))
            .transpose()?;
        Ok((intids, containers))
    }
}
