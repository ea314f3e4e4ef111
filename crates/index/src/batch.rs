use extract::{EntityRecord, RecordSet, RelationshipRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type BatchId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Entities,
    Relationships,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Entities => "entities",
            BatchKind::Relationships => "relationships",
        }
    }
}

/// A batch never mixes entities and relationships.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPayload {
    Entities(Vec<EntityRecord>),
    Relationships(Vec<RelationshipRecord>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    /// Position in the overall plan.
    pub ordinal: usize,
    pub payload: BatchPayload,
}

impl Batch {
    pub fn kind(&self) -> BatchKind {
        match self.payload {
            BatchPayload::Entities(_) => BatchKind::Entities,
            BatchPayload::Relationships(_) => BatchKind::Relationships,
        }
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            BatchPayload::Entities(e) => e.len(),
            BatchPayload::Relationships(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition a record set into batches of at most `batch_size` records.
///
/// Entities come first in id order, then relationships ordered by
/// (source, type, target), so the same input always yields the same batches
/// with the same ids.
pub fn plan_batches(records: &RecordSet, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();

    let entities: Vec<&EntityRecord> = records.entities.values().collect();
    for (seq, chunk) in entities.chunks(batch_size).enumerate() {
        let mut hasher = Sha256::new();
        for entity in chunk {
            hash_fields(
                &mut hasher,
                &[
                    entity.id.as_str(),
                    entity.name.as_str(),
                    entity.canonical_name.as_str(),
                    entity.entity_type.as_str(),
                    entity.description.as_str(),
                    entity.source_document.as_str(),
                ],
            );
        }
        batches.push(Batch {
            id: batch_id(BatchKind::Entities, seq, hasher),
            ordinal: batches.len(),
            payload: BatchPayload::Entities(chunk.iter().map(|e| (*e).clone()).collect()),
        });
    }

    let mut relationships: Vec<&RelationshipRecord> = records.relationships.iter().collect();
    relationships.sort_by(|a, b| a.key().cmp(&b.key()));
    for (seq, chunk) in relationships.chunks(batch_size).enumerate() {
        let mut hasher = Sha256::new();
        for rel in chunk {
            let weight = rel.weight.map(|w| w.to_string()).unwrap_or_default();
            hash_fields(
                &mut hasher,
                &[
                    rel.source_id.as_str(),
                    rel.relation_type.as_str(),
                    rel.target_id.as_str(),
                    weight.as_str(),
                    rel.description.as_str(),
                    rel.source_document.as_str(),
                ],
            );
        }
        batches.push(Batch {
            id: batch_id(BatchKind::Relationships, seq, hasher),
            ordinal: batches.len(),
            payload: BatchPayload::Relationships(chunk.iter().map(|r| (*r).clone()).collect()),
        });
    }

    batches
}

fn hash_fields(hasher: &mut Sha256, fields: &[&str]) {
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f_u8]);
    }
    hasher.update([0x1e_u8]);
}

fn batch_id(kind: BatchKind, seq: usize, hasher: Sha256) -> BatchId {
    let digest = hasher.finalize();
    format!("{}-{:05}-{}", kind.as_str(), seq, hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn records(entities: usize, relationships: usize) -> RecordSet {
        let mut set = RecordSet::new();
        for i in 0..entities {
            set.insert_entity(EntityRecord::new(format!("e{i:02}"), format!("Entity {i}"), "equipment"));
        }
        for i in 0..relationships {
            let source = format!("e{:02}", i % entities);
            let target = format!("e{:02}", (i + 1) % entities);
            set.push_relationship(RelationshipRecord::new(source, target, format!("rel{i}")));
        }
        set
    }

    #[test]
    fn test_partition_sizes() {
        let batches = plan_batches(&records(17, 17), 5);
        let sizes: Vec<(BatchKind, usize)> = batches.iter().map(|b| (b.kind(), b.len())).collect();

        assert_eq!(
            sizes,
            vec![
                (BatchKind::Entities, 5),
                (BatchKind::Entities, 5),
                (BatchKind::Entities, 5),
                (BatchKind::Entities, 2),
                (BatchKind::Relationships, 5),
                (BatchKind::Relationships, 5),
                (BatchKind::Relationships, 5),
                (BatchKind::Relationships, 2),
            ]
        );
        assert!(batches.iter().enumerate().all(|(i, b)| b.ordinal == i));
    }

    #[test]
    fn test_no_overlap_no_omission() {
        let set = records(23, 11);
        let batches = plan_batches(&set, 4);

        let mut seen = HashSet::new();
        for batch in &batches {
            assert!(batch.len() <= 4);
            if let BatchPayload::Entities(entities) = &batch.payload {
                for e in entities {
                    assert!(seen.insert(e.id.clone()), "entity {} in two batches", e.id);
                }
            }
        }
        assert_eq!(seen.len(), 23);
        let rels: usize = batches
            .iter()
            .filter(|b| b.kind() == BatchKind::Relationships)
            .map(Batch::len)
            .sum();
        assert_eq!(rels, 11);
    }

    #[test]
    fn test_ids_are_deterministic_and_content_sensitive() {
        let set = records(6, 3);
        let first: Vec<BatchId> = plan_batches(&set, 4).into_iter().map(|b| b.id).collect();
        let second: Vec<BatchId> = plan_batches(&set, 4).into_iter().map(|b| b.id).collect();
        assert_eq!(first, second);
        assert!(first[0].starts_with("entities-00000-"));

        let mut changed = set.clone();
        changed.entities.get_mut("e00").unwrap().description = "updated".into();
        let third: Vec<BatchId> = plan_batches(&changed, 4).into_iter().map(|b| b.id).collect();
        assert_ne!(first[0], third[0]);
        assert_eq!(first[1], third[1]);
    }

    #[test]
    fn test_relationship_order_is_input_independent() {
        let mut set = records(4, 4);
        let forward = plan_batches(&set, 10);
        set.relationships.reverse();
        let reversed = plan_batches(&set, 10);
        assert_eq!(forward, reversed);
    }
}
