//! JSON sidecar persistence for annotation collections, one file per
//! document keyed by its path-derived id.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::model::Annotation;
use crate::backend::{DocumentId, DocumentInfo};

pub const SIDECAR_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSnapshot {
    pub version: u32,
    pub document: DocumentId,
    pub pdf_path: PathBuf,
    pub saved_at: DateTime<Utc>,
    pub annotations: Vec<Annotation>,
}

impl AnnotationSnapshot {
    pub fn new(doc: &DocumentInfo, annotations: Vec<Annotation>) -> Self {
        Self {
            version: SIDECAR_VERSION,
            document: doc.id,
            pdf_path: doc.path.clone(),
            saved_at: Utc::now(),
            annotations,
        }
    }
}

pub trait AnnotationStore: Send + Sync {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<AnnotationSnapshot>>;
    fn save(&self, doc: &DocumentInfo, snapshot: &AnnotationSnapshot) -> Result<()>;
}

pub struct FileAnnotationStore {
    root: PathBuf,
}

impl FileAnnotationStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create annotation directory at {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn sidecar_path(&self, doc: &DocumentInfo) -> PathBuf {
        self.root.join(format!("{}.json", doc.id))
    }
}

impl AnnotationStore for FileAnnotationStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<AnnotationSnapshot>> {
        let path = self.sidecar_path(doc);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open sidecar {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let snapshot: AnnotationSnapshot = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode sidecar {:?}", path))?;
        if snapshot.version > SIDECAR_VERSION {
            bail!(
                "sidecar {:?} has version {}, newer than supported {}",
                path,
                snapshot.version,
                SIDECAR_VERSION
            );
        }
        Ok(Some(snapshot))
    }

    fn save(&self, doc: &DocumentInfo, snapshot: &AnnotationSnapshot) -> Result<()> {
        let path = self.sidecar_path(doc);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(snapshot)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp sidecar {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move sidecar into place at {:?}", path))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAnnotationStore {
    inner: Mutex<HashMap<DocumentId, AnnotationSnapshot>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<AnnotationSnapshot>> {
        Ok(self.inner.lock().get(&doc.id).cloned())
    }

    fn save(&self, doc: &DocumentInfo, snapshot: &AnnotationSnapshot) -> Result<()> {
        self.inner.lock().insert(doc.id, snapshot.clone());
        Ok(())
    }
}
