use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator LightRAG uses when it concatenates merged field values.
pub const FIELD_SEP: &str = "<SEP>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    /// Resolved name after deduplication; equal to `name` until then.
    pub canonical_name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_document: String,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            canonical_name: name.clone(),
            name,
            entity_type: entity_type.into(),
            description: String::new(),
            source_document: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source(mut self, source_document: impl Into<String>) -> Self {
        self.source_document = source_document.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default, alias = "confidence", skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_document: String,
}

impl RelationshipRecord {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            weight: None,
            description: String::new(),
            source_document: String::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Identity of an edge: two records with the same key are the same edge.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.source_id, &self.relation_type, &self.target_id)
    }
}

/// Entities keyed by id plus the relationships between them.
///
/// Entities live in a `BTreeMap` so iteration order is the stable id order
/// the batch planner relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub entities: BTreeMap<String, EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity; a repeated id keeps the first record and folds the
    /// newcomer's description and source into it.
    pub fn insert_entity(&mut self, entity: EntityRecord) {
        match self.entities.get_mut(&entity.id) {
            Some(existing) => {
                existing.description = merge_fields([existing.description.as_str(), entity.description.as_str()]);
                existing.source_document =
                    merge_fields([existing.source_document.as_str(), entity.source_document.as_str()]);
                if existing.entity_type.is_empty() {
                    existing.entity_type = entity.entity_type;
                }
            }
            None => {
                self.entities.insert(entity.id.clone(), entity);
            }
        }
    }

    pub fn push_relationship(&mut self, relationship: RelationshipRecord) {
        self.relationships.push(relationship);
    }

    /// Fold another record set into this one.
    pub fn extend(&mut self, other: RecordSet) {
        for entity in other.entities.into_values() {
            self.insert_entity(entity);
        }
        self.relationships.extend(other.relationships);
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Merge `<SEP>`-separated field values, keeping the first occurrence of each
/// fragment and dropping empties.
pub fn merge_fields<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    for value in values {
        for fragment in value.split(FIELD_SEP) {
            let fragment = fragment.trim();
            if !fragment.is_empty() && !seen.contains(&fragment) {
                seen.push(fragment);
            }
        }
    }
    seen.join(FIELD_SEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_fields_dedups_fragments() {
        let merged = merge_fields(["soft serve machine<SEP>dairy", "dairy", ""]);
        assert_eq!(merged, "soft serve machine<SEP>dairy");
    }

    #[test]
    fn test_insert_entity_folds_repeated_id() {
        let mut set = RecordSet::new();
        set.insert_entity(EntityRecord::new("fryer", "Fryer", "equipment").with_description("hot oil"));
        set.insert_entity(EntityRecord::new("fryer", "Fryer", "").with_description("needs filtering"));

        assert_eq!(set.entity_count(), 1);
        assert_eq!(set.entities["fryer"].description, "hot oil<SEP>needs filtering");
        assert_eq!(set.entities["fryer"].entity_type, "equipment");
    }

    #[test]
    fn test_confidence_alias_deserializes_into_weight() {
        let rel: RelationshipRecord = serde_json::from_str(
            r#"{"source_id":"a","target_id":"b","relation_type":"uses","confidence":0.5}"#,
        )
        .unwrap();
        assert_eq!(rel.weight, Some(0.5));
    }
}
