use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::fs;

use ghmon_core::{PullRequestId, PullRequestWrapper};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {path:?}: {underlying_error}")]
    Io {
        path: PathBuf,
        underlying_error: std::io::Error,
    },
    #[error("Failed to (de)serialize {path:?}: {underlying_error}")]
    Serialization {
        path: PathBuf,
        underlying_error: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One JSON file per pull request wrapper, named `<id>.json`.
pub struct SnapshotStore {
    folder: PathBuf,
}

impl SnapshotStore {
    pub async fn open<P: AsRef<Path>>(folder: P) -> Result<SnapshotStore> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)
            .await
            .map_err(|e| StoreError::Io {
                path: folder.clone(),
                underlying_error: e,
            })?;
        Ok(SnapshotStore { folder })
    }

    fn wrapper_path(&self, id: PullRequestId) -> PathBuf {
        self.folder.join(format!("{id}.json"))
    }

    pub async fn load(&self, id: PullRequestId) -> Result<Option<PullRequestWrapper>> {
        let path = self.wrapper_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path,
                    underlying_error: e,
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization {
                path,
                underlying_error: e,
            })
    }

    pub async fn store(&self, wrapper: &PullRequestWrapper) -> Result<()> {
        let path = self.wrapper_path(wrapper.id);
        let bytes = serde_json::to_vec(wrapper).map_err(|e| StoreError::Serialization {
            path: path.clone(),
            underlying_error: e,
        })?;

        // write to the side so readers never see a half written snapshot
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| StoreError::Io {
                path: tmp_path.clone(),
                underlying_error: e,
            })?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::Io {
                path,
                underlying_error: e,
            })
    }

    pub async fn delete(&self, id: PullRequestId) -> Result<()> {
        let path = self.wrapper_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path,
                underlying_error: e,
            }),
        }
    }

    pub async fn list_known_ids(&self) -> Result<Vec<PullRequestId>> {
        let io_error = |e: std::io::Error| StoreError::Io {
            path: self.folder.clone(),
            underlying_error: e,
        };

        let mut entries = fs::read_dir(&self.folder).await.map_err(io_error)?;
        let mut ids = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<PullRequestId>().ok())
            else {
                log::debug!("Ignoring unexpected file {:?} in snapshot folder", file_name);
                continue;
            };
            ids.push(id);
        }
        ids.sort_unstable();

        Ok(ids)
    }
}
