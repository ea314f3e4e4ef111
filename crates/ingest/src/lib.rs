pub mod error;
pub mod formats;
pub mod reader;

pub use error::{FormatError, IngestError};
pub use formats::{ArtifactFormat, parse_artifact};
pub use reader::{FileReader, RawArtifact};

use extract::RecordSet;
use extract::normalizer::normalize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Main normalization pipeline: read, parse and merge every input.
pub async fn load_paths(paths: &[PathBuf]) -> Result<RecordSet, IngestError> {
    let artifacts = FileReader::read_paths(paths).await?;
    let records = normalize_artifacts(&artifacts)?;

    if artifacts.is_empty() || (records.is_empty() && !artifacts.iter().any(|a| a.explicit)) {
        let path = paths.first().cloned().unwrap_or_default();
        return Err(IngestError::NoArtifacts(path));
    }

    Ok(records)
}

/// Parse already-read artifacts into one record set.
///
/// Files named explicitly must parse. Files found by walking a directory
/// may be other LightRAG stores (document status, LLM cache, chunk vectors)
/// and are skipped when no parser recognizes them.
pub fn normalize_artifacts(artifacts: &[RawArtifact]) -> Result<RecordSet, FormatError> {
    let mut records = RecordSet::new();

    for artifact in artifacts {
        match parse_artifact(&artifact.bytes, &artifact.name) {
            Ok((format, parsed)) => {
                info!(
                    path = %artifact.path.display(),
                    format = format.name(),
                    entities = parsed.entity_count(),
                    relationships = parsed.relationship_count(),
                    "Loaded artifact"
                );
                records.extend(parsed);
            }
            Err(FormatError::Unrecognized { .. }) if !artifact.explicit => {
                warn!(path = %artifact.path.display(), "Skipping file with no graph records");
            }
            Err(e) => return Err(e),
        }
    }

    resolve_endpoints(&mut records);
    Ok(records)
}

/// Point relationship endpoints that name an entity (rather than its id) at
/// that entity's id.
pub fn resolve_endpoints(records: &mut RecordSet) {
    let mut by_name: HashMap<String, String> = HashMap::new();
    for entity in records.entities.values() {
        by_name
            .entry(normalize(&entity.name))
            .or_insert_with(|| entity.id.clone());
    }

    for rel in &mut records.relationships {
        for endpoint in [&mut rel.source_id, &mut rel.target_id] {
            if records.entities.contains_key(endpoint.as_str()) {
                continue;
            }
            if let Some(id) = by_name.get(&normalize(endpoint)) {
                *endpoint = id.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_directory_skips_non_graph_stores() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("vdb_entities.json"),
            r#"{"data": [{"entity_name": "Grill"}, {"entity_name": "Fryer"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("vdb_relationships.json"),
            r#"{"data": [{"src_id": "grill", "tgt_id": "FRYER", "content": "near"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("kv_store_doc_status.json"),
            r#"{"doc-1": {"status": "processed", "chunks_count": 4}}"#,
        )
        .unwrap();

        let records = load_paths(&[dir.path().to_path_buf()]).await.unwrap();

        assert_eq!(records.entity_count(), 2);
        // Endpoints given by name resolve to the entity ids.
        assert_eq!(records.relationships[0].source_id, "Grill");
        assert_eq!(records.relationships[0].target_id, "Fryer");
        assert_eq!(records.entities["Grill"].source_document, "vdb_entities");
    }

    #[tokio::test]
    async fn test_one_bad_node_does_not_drop_the_graph_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("graph.json"),
            r#"{
                "nodes": [{"id": "Grill"}, {"id": "Fryer"}, {"description": "stray node"}],
                "links": [{"source": "Grill", "target": "Fryer", "keywords": "near"}]
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("vdb_entities.json"),
            r#"{"data": [{"entity_name": "Oil"}]}"#,
        )
        .unwrap();

        let records = load_paths(&[dir.path().to_path_buf()]).await.unwrap();

        let ids: Vec<&str> = records.entities.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["Fryer", "Grill", "Oil"]);
        assert_eq!(records.relationship_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_unrecognized_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv_store_doc_status.json");
        std::fs::write(&path, r#"{"doc-1": {"status": "processed"}}"#).unwrap();

        let err = load_paths(&[path]).await.unwrap_err();
        assert!(matches!(err, IngestError::Format(FormatError::Unrecognized { .. })));
    }

    #[tokio::test]
    async fn test_missing_path() {
        let err = load_paths(&[PathBuf::from("/definitely/not/here.json")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[tokio::test]
    async fn test_directory_without_graph_data() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.json"), r#"{"hello": "world"}"#).unwrap();

        let err = load_paths(&[dir.path().to_path_buf()]).await.unwrap_err();
        assert!(matches!(err, IngestError::NoArtifacts(_)));
    }
}
