use std::fs;
use std::path::Path;
use tracing::debug;
use crate::error::Result;
use crate::graph::GraphDocument;

/// Read and parse an exported workflow document from disk.
pub fn load_document_from_file(path: impl AsRef<Path>) -> Result<GraphDocument> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)?;
    let document = GraphDocument::from_json(&raw)?;

    debug!(
        path = %path.display(),
        nodes = document.nodes.len(),
        edges = document.edges.len(),
        form_elements = document.form.elements.len(),
        "Loaded workflow document"
    );
    Ok(document)
}

/// Serialize a document back to disk, keeping every key it was loaded with.
pub fn save_document_to_file(document: &GraphDocument, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path, document.to_json()?)?;
    Ok(())
}
