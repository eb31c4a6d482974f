use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use serde_json::Value;
use tracing::{info, warn};
use crate::assets::AssetStore;
use crate::error::{Error, Result};
use crate::fields::FieldResolver;
use crate::form::index_form;
use crate::graph::loader::load_document_from_file;
use crate::graph::GraphDocument;
use crate::inputs::InputStore;
use crate::outputs::OutputRecord;

/// A loaded workflow: the read-only document plus its typed inputs.
#[derive(Debug)]
pub struct Workflow {
    document: GraphDocument,
    pub inputs: InputStore,
}

impl Workflow {
    /// Index and resolve `document`. Aborts on the first structural or
    /// resolution failure.
    pub fn from_document(document: GraphDocument, resolver: &FieldResolver) -> Result<Self> {
        let seeds = index_form(&document)?;
        let inputs = InputStore::resolve(&document, seeds, resolver)?;
        info!(nodes = document.nodes.len(), inputs = inputs.len(), "Loaded workflow");
        Ok(Self { document, inputs })
    }

    pub fn load(raw: Value) -> Result<Self> {
        Self::load_with(raw, &FieldResolver::new())
    }

    pub fn load_with(raw: Value, resolver: &FieldResolver) -> Result<Self> {
        Self::from_document(GraphDocument::from_value(raw)?, resolver)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Self::from_document(GraphDocument::from_json(raw)?, &FieldResolver::new())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_document(load_document_from_file(path)?, &FieldResolver::new())
    }

    pub fn document(&self) -> &GraphDocument {
        &self.document
    }
}

/// Download every artifact of `records` into `dir`, one file per name.
///
/// Names come from the remote service; anything other than a bare file name
/// is rejected before the first fetch.
pub async fn download_outputs(
    store: &dyn AssetStore,
    records: &BTreeMap<String, OutputRecord>,
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    for name in records.values().flat_map(|r| &r.artifacts) {
        if !is_plain_file_name(name) {
            warn!(artifact = %name, "Rejected artifact name");
            return Err(Error::UnsafeArtifactName(name.clone()));
        }
    }
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::new();
    for record in records.values() {
        for name in &record.artifacts {
            let bytes = store.fetch(name).await?;
            let path = dir.join(name);
            tokio::fs::write(&path, &bytes).await?;
            info!(node_id = %record.node_id, artifact = %name, path = %path.display(), "Downloaded artifact");
            written.push(path);
        }
    }
    Ok(written)
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Delete every artifact of `records` from the remote store. Keeps going past
/// individual failures and returns how many were deleted.
pub async fn cleanup_outputs(store: &dyn AssetStore, records: &BTreeMap<String, OutputRecord>) -> usize {
    let mut deleted = 0;
    for record in records.values() {
        for name in &record.artifacts {
            match store.delete(name).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(node_id = %record.node_id, artifact = %name, "Failed to delete artifact: {}", e),
            }
        }
    }
    deleted
}
