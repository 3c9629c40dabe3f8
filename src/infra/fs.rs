//! Filesystem persistence.
//!
//! Layout under the storage root:
//!
//! ```text
//! documents/<uuid>.json   one serde_json document each
//! blobs/<short-ref>       raw payload bytes; the mime type is recovered from
//!                         the reference's extension
//! polls/ballots.json      every ballot ever cast
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into place, so
//! readers observe either the old or the new file and a failed write leaves
//! nothing behind.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{BlobsRepo, DocumentsRepo, PollsRepo, RepoError};
use crate::domain::attachments::{Payload, ShortRef, mime_for_name};
use crate::domain::documents::{Document, DocumentId};
use crate::domain::polls::Ballot;

use super::error::InfraError;

const DOCUMENTS_DIR: &str = "documents";
const BLOBS_DIR: &str = "blobs";
const POLLS_DIR: &str = "polls";
const BALLOTS_FILE: &str = "polls/ballots.json";
const TEMP_MARKER: &str = ".tmp-";

#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    ballots: Mutex<()>,
}

impl FsStore {
    /// Open storage rooted at `root`, creating the directory layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let root = root.into();
        for dir in [DOCUMENTS_DIR, BLOBS_DIR, POLLS_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            ballots: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, RepoError> {
        let path = Path::new(relative);
        if path.is_absolute()
            || path.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            })
        {
            return Err(RepoError::invalid_input(format!(
                "storage path `{relative}` escapes the storage root"
            )));
        }
        Ok(self.root.join(path))
    }

    fn document_path(&self, id: DocumentId) -> Result<PathBuf, RepoError> {
        self.resolve(&format!("{DOCUMENTS_DIR}/{id}.json"))
    }

    fn blob_path(&self, reference: &ShortRef) -> Result<PathBuf, RepoError> {
        self.resolve(&format!("{BLOBS_DIR}/{reference}"))
    }

    async fn read_ballots(&self) -> Result<Vec<Ballot>, RepoError> {
        let path = self.resolve(BALLOTS_FILE)?;
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                RepoError::integrity(format!("{} is not a ballot list: {err}", path.display()))
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepoError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RepoError::invalid_input(format!("{} has no file name", path.display())))?;
    let temp = path.with_file_name(format!(".{file_name}{TEMP_MARKER}{}", Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(err) = result {
        warn!(
            target = "infra::fs",
            path = %path.display(),
            error = %err,
            "Write failed; removing temporary file"
        );
        if let Err(cleanup) = fs::remove_file(&temp)
            .await
            .or_else(|cleanup| match cleanup.kind() {
                std::io::ErrorKind::NotFound => Ok(()),
                _ => Err(cleanup),
            })
        {
            warn!(
                target = "infra::fs",
                path = %temp.display(),
                error = %cleanup,
                "Temporary file could not be removed"
            );
        }
        return Err(RepoError::from_persistence(err));
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, RepoError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RepoError::from_persistence(err)),
    }
}

async fn file_names(dir: &Path) -> Result<Vec<String>, RepoError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(RepoError::from_persistence(err)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(RepoError::from_persistence)?
    {
        let is_file = entry
            .file_type()
            .await
            .map_err(RepoError::from_persistence)?
            .is_file();
        if !is_file {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.contains(TEMP_MARKER) => names.push(name),
            Ok(_) | Err(_) => {}
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl DocumentsRepo for FsStore {
    async fn load_document(&self, id: DocumentId) -> Result<Option<Document>, RepoError> {
        let path = self.document_path(id)?;
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            RepoError::integrity(format!("{} is not a document: {err}", path.display()))
        })
    }

    async fn save_document(&self, document: &Document) -> Result<(), RepoError> {
        let path = self.document_path(document.id)?;
        let bytes = serde_json::to_vec_pretty(document).map_err(RepoError::from_persistence)?;
        write_atomic(&path, &bytes).await?;
        debug!(
            target = "infra::fs",
            document_id = %document.id,
            bytes = bytes.len(),
            "Wrote document"
        );
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentId>, RepoError> {
        let names = file_names(&self.root.join(DOCUMENTS_DIR)).await?;
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let parsed = name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<DocumentId>().ok());
            match parsed {
                Some(id) => ids.push(id),
                None => warn!(
                    target = "infra::fs",
                    file = %name,
                    "Skipping unexpected file in documents directory"
                ),
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl BlobsRepo for FsStore {
    async fn load_blobs(&self) -> Result<BTreeMap<ShortRef, Payload>, RepoError> {
        let dir = self.root.join(BLOBS_DIR);
        let mut blobs = BTreeMap::new();
        for name in file_names(&dir).await? {
            let Ok(reference) = ShortRef::parse(&name) else {
                warn!(
                    target = "infra::fs",
                    file = %name,
                    "Skipping unexpected file in blobs directory"
                );
                continue;
            };
            let bytes = fs::read(dir.join(&name))
                .await
                .map_err(RepoError::from_persistence)?;
            let payload = Payload::new(mime_for_name(&name), bytes);
            blobs.insert(reference, payload);
        }
        Ok(blobs)
    }

    async fn put_blob(&self, reference: &ShortRef, payload: &Payload) -> Result<(), RepoError> {
        let path = self.blob_path(reference)?;
        write_atomic(&path, payload.bytes()).await?;
        debug!(
            target = "infra::fs",
            reference = %reference,
            bytes = payload.len(),
            "Wrote blob"
        );
        Ok(())
    }
}

#[async_trait]
impl PollsRepo for FsStore {
    async fn load_ballots(&self) -> Result<Vec<Ballot>, RepoError> {
        let _guard = self.ballots.lock().await;
        self.read_ballots().await
    }

    async fn record_ballot(&self, ballot: &Ballot) -> Result<(), RepoError> {
        let _guard = self.ballots.lock().await;
        let mut ballots = self.read_ballots().await?;
        ballots.push(ballot.clone());
        let bytes = serde_json::to_vec_pretty(&ballots).map_err(RepoError::from_persistence)?;
        write_atomic(&self.resolve(BALLOTS_FILE)?, &bytes).await
    }
}
