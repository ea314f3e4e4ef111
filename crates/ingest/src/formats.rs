//! Parsers for the JSON shapes LightRAG leaves on disk.
//!
//! Each shape is one variant of [`ArtifactFormat`]; [`parse_artifact`] tries
//! them in [`ArtifactFormat::PRIORITY`] order and keeps the first that
//! accepts the document.

use crate::error::FormatError;
use extract::{EntityRecord, RecordSet, RelationshipRecord};
use serde_json::{Map, Value};
use tracing::{debug, warn};

type Object = Map<String, Value>;

const ENTITY_ID_KEYS: &[&str] = &["id", "entity_id", "entity_name", "name"];
const ENTITY_NAME_KEYS: &[&str] = &["name", "entity_name", "id", "entity_id"];
const ENTITY_TYPE_KEYS: &[&str] = &["type", "entity_type", "label"];
const ENTITY_SOURCE_KEYS: &[&str] = &["source_document", "file_path", "document"];
const DESCRIPTION_KEYS: &[&str] = &["description", "content"];

const REL_SOURCE_KEYS: &[&str] = &["source_id", "source", "src_id", "from"];
const REL_TARGET_KEYS: &[&str] = &["target_id", "target", "tgt_id", "to"];
const REL_TYPE_KEYS: &[&str] = &["relation_type", "relation", "type", "keywords", "label"];
const REL_WEIGHT_KEYS: &[&str] = &["weight", "confidence"];
const REL_SOURCE_DOC_KEYS: &[&str] = &["source_document", "file_path"];

pub const DEFAULT_RELATION_TYPE: &str = "RELATED_TO";
pub const DEFAULT_ENTITY_TYPE: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// `{"entities": [...], "relationships": [...]}`
    Flat,
    /// Graph storage dump: `{"nodes": [...], "edges"|"links": [...]}`
    NodeLink,
    /// nano-vectordb dump: `{"data": [{"entity_name": ...}, {"src_id": ...}]}`
    VectorDb,
    /// KV store: `{"<id>": {...}, ...}`
    KeyedMap,
    /// Bare array of entity and/or relationship objects.
    Array,
}

impl ArtifactFormat {
    pub const PRIORITY: [ArtifactFormat; 5] = [
        ArtifactFormat::Flat,
        ArtifactFormat::NodeLink,
        ArtifactFormat::VectorDb,
        ArtifactFormat::KeyedMap,
        ArtifactFormat::Array,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArtifactFormat::Flat => "flat",
            ArtifactFormat::NodeLink => "node-link",
            ArtifactFormat::VectorDb => "vector-db",
            ArtifactFormat::KeyedMap => "keyed-map",
            ArtifactFormat::Array => "array",
        }
    }

    /// `None` when the document does not have this shape.
    pub fn parse(self, doc: &Value, artifact: &str) -> Option<RecordSet> {
        match self {
            ArtifactFormat::Flat => parse_flat(doc.as_object()?, artifact),
            ArtifactFormat::NodeLink => parse_node_link(doc.as_object()?, artifact),
            ArtifactFormat::VectorDb => parse_vector_db(doc.as_object()?, artifact),
            ArtifactFormat::KeyedMap => parse_keyed_map(doc.as_object()?, artifact),
            ArtifactFormat::Array => parse_array(doc.as_array()?, artifact),
        }
    }
}

/// Parse one artifact, trying every known format in priority order.
pub fn parse_artifact(bytes: &[u8], artifact: &str) -> Result<(ArtifactFormat, RecordSet), FormatError> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|error| FormatError::Malformed {
        artifact: artifact.to_string(),
        error,
    })?;

    let mut tried = Vec::with_capacity(ArtifactFormat::PRIORITY.len());
    for format in ArtifactFormat::PRIORITY {
        tried.push(format.name());
        if let Some(records) = format.parse(&doc, artifact) {
            debug!(
                artifact,
                format = format.name(),
                entities = records.entity_count(),
                relationships = records.relationship_count(),
                "Parsed artifact"
            );
            return Ok((format, records));
        }
    }

    Err(FormatError::Unrecognized {
        artifact: artifact.to_string(),
        tried,
    })
}

/// Records gathered from one artifact. Items that cannot become a record
/// are counted and skipped so one bad row never costs the rest of the file.
struct Collector<'a> {
    artifact: &'a str,
    set: RecordSet,
    skipped: usize,
}

impl<'a> Collector<'a> {
    fn new(artifact: &'a str) -> Self {
        Self {
            artifact,
            set: RecordSet::new(),
            skipped: 0,
        }
    }

    fn entity(&mut self, item: &Value, key: Option<&str>) {
        match item.as_object().and_then(|o| entity_from(o, key, self.artifact)) {
            Some(entity) => self.set.insert_entity(entity),
            None => self.skipped += 1,
        }
    }

    fn relationship(&mut self, item: &Value) {
        match item.as_object().and_then(|o| relationship_from(o, self.artifact)) {
            Some(rel) => self.set.push_relationship(rel),
            None => self.skipped += 1,
        }
    }

    fn skip(&mut self) {
        self.skipped += 1;
    }

    fn finish(self) -> RecordSet {
        if self.skipped > 0 {
            warn!(
                artifact = self.artifact,
                skipped = self.skipped,
                "Skipped records without usable identifiers"
            );
        }
        self.set
    }
}

fn parse_flat(obj: &Object, artifact: &str) -> Option<RecordSet> {
    let entities = obj.get("entities").and_then(Value::as_array);
    let relationships = obj
        .get("relationships")
        .or_else(|| obj.get("relations"))
        .and_then(Value::as_array);
    if entities.is_none() && relationships.is_none() {
        return None;
    }

    let mut records = Collector::new(artifact);
    for item in entities.into_iter().flatten() {
        records.entity(item, None);
    }
    for item in relationships.into_iter().flatten() {
        records.relationship(item);
    }
    Some(records.finish())
}

fn parse_node_link(obj: &Object, artifact: &str) -> Option<RecordSet> {
    let nodes = obj.get("nodes")?.as_array()?;
    let edges = obj.get("edges").or_else(|| obj.get("links")).and_then(Value::as_array);

    let mut records = Collector::new(artifact);
    for node in nodes {
        records.entity(node, None);
    }
    for edge in edges.into_iter().flatten() {
        records.relationship(edge);
    }
    Some(records.finish())
}

fn has_any_key(obj: &Object, keys: &[&str]) -> bool {
    keys.iter().any(|k| obj.contains_key(*k))
}

fn is_vector_row(row: &Value) -> bool {
    row.as_object()
        .is_some_and(|o| has_any_key(o, &["entity_name", "src_id", "tgt_id"]))
}

fn parse_vector_db(obj: &Object, artifact: &str) -> Option<RecordSet> {
    let rows = obj.get("data")?.as_array()?;
    // Chunk vectors share the layout but carry no graph rows.
    if !rows.is_empty() && !rows.iter().any(is_vector_row) {
        return None;
    }

    let mut records = Collector::new(artifact);
    for row in rows {
        match row.as_object() {
            Some(o) if has_any_key(o, &["src_id", "tgt_id"]) => records.relationship(row),
            Some(o) if o.contains_key("entity_name") => records.entity(row, None),
            _ => records.skip(),
        }
    }
    Some(records.finish())
}

fn is_graph_value(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| is_relationship(o) || looks_like_entity(o))
}

fn parse_keyed_map(obj: &Object, artifact: &str) -> Option<RecordSet> {
    if !obj.values().any(is_graph_value) {
        return None;
    }

    let mut records = Collector::new(artifact);
    for (key, value) in obj {
        match value.as_object() {
            Some(o) if is_relationship(o) => records.relationship(value),
            Some(o) if looks_like_entity(o) => records.entity(value, Some(key)),
            _ => records.skip(),
        }
    }
    Some(records.finish())
}

fn parse_array(items: &[Value], artifact: &str) -> Option<RecordSet> {
    if !items.is_empty() && !items.iter().any(Value::is_object) {
        return None;
    }

    let mut records = Collector::new(artifact);
    for item in items {
        match item.as_object() {
            Some(o) if is_relationship(o) => records.relationship(item),
            Some(_) => records.entity(item, None),
            None => records.skip(),
        }
    }
    Some(records.finish())
}

fn is_relationship(obj: &Object) -> bool {
    first_string(obj, REL_SOURCE_KEYS).is_some() && first_string(obj, REL_TARGET_KEYS).is_some()
}

fn looks_like_entity(obj: &Object) -> bool {
    ["id", "name", "entity_name", "entity_id", "entity_type"]
        .iter()
        .any(|k| obj.contains_key(*k))
}

/// Best-effort entity extraction: `name` falls back to `id` and vice versa,
/// missing text fields default to empty.
fn entity_from(obj: &Object, key: Option<&str>, artifact: &str) -> Option<EntityRecord> {
    let id = first_string(obj, ENTITY_ID_KEYS).or_else(|| key.map(str::to_string))?;
    let name = first_string(obj, ENTITY_NAME_KEYS).unwrap_or_else(|| id.clone());
    let entity_type = first_string(obj, ENTITY_TYPE_KEYS).unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());

    Some(
        EntityRecord::new(id, name, entity_type)
            .with_description(first_string(obj, DESCRIPTION_KEYS).unwrap_or_default())
            .with_source(first_string(obj, ENTITY_SOURCE_KEYS).unwrap_or_else(|| artifact.to_string())),
    )
}

fn relationship_from(obj: &Object, artifact: &str) -> Option<RelationshipRecord> {
    let source = first_string(obj, REL_SOURCE_KEYS)?;
    let target = first_string(obj, REL_TARGET_KEYS)?;
    let relation_type = first_string(obj, REL_TYPE_KEYS).unwrap_or_else(|| DEFAULT_RELATION_TYPE.to_string());

    let mut rel = RelationshipRecord::new(source, target, relation_type);
    rel.weight = first_number(obj, REL_WEIGHT_KEYS);
    rel.description = first_string(obj, DESCRIPTION_KEYS).unwrap_or_default();
    rel.source_document = first_string(obj, REL_SOURCE_DOC_KEYS).unwrap_or_else(|| artifact.to_string());
    Some(rel)
}

/// First non-empty string (or number rendered as string) under any of `keys`.
fn first_string(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_number(obj: &Object, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
