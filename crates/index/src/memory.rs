//! In-process graph store with the same upsert semantics as the Neo4j sink.
//!
//! Backs `--dry-run` and the test suite; failures can be scripted per batch.

use crate::batch::{Batch, BatchPayload};
use crate::neo4j_index::PLACEHOLDER_TYPE;
use crate::sink::{GraphSink, GraphStats, StoreError};
use extract::{EntityRecord, RelationshipRecord};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type EdgeKey = (String, String, String);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryGraph {
    pub nodes: BTreeMap<String, EntityRecord>,
    pub edges: BTreeMap<EdgeKey, RelationshipRecord>,
}

impl MemoryGraph {
    fn merge_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes
                .insert(id.to_string(), EntityRecord::new(id, id, PLACEHOLDER_TYPE));
        }
    }

    fn apply(&mut self, batch: &Batch) {
        match &batch.payload {
            BatchPayload::Entities(entities) => {
                for entity in entities {
                    self.nodes.insert(entity.id.clone(), entity.clone());
                }
            }
            BatchPayload::Relationships(relationships) => {
                for rel in relationships {
                    self.merge_node(&rel.source_id);
                    self.merge_node(&rel.target_id);
                    let key = (
                        rel.source_id.clone(),
                        rel.relation_type.clone(),
                        rel.target_id.clone(),
                    );
                    self.edges.insert(key, rel.clone());
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    graph: Mutex<MemoryGraph>,
    faults: Mutex<HashMap<usize, VecDeque<StoreError>>>,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing store contents, e.g. what an interrupted run left.
    pub fn with_graph(graph: MemoryGraph) -> Self {
        Self {
            graph: Mutex::new(graph),
            ..Self::default()
        }
    }

    /// Queue errors for the batch at `ordinal`; each write attempt consumes
    /// one, and the batch succeeds once the queue is empty.
    pub fn fail_batch(&self, ordinal: usize, errors: impl IntoIterator<Item = StoreError>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.entry(ordinal).or_default().extend(errors);
        }
    }

    pub fn snapshot(&self) -> MemoryGraph {
        self.graph.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Total write attempts seen, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    fn try_write(&self, batch: &Batch) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let injected = self
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.get_mut(&batch.ordinal).and_then(VecDeque::pop_front));
        if let Some(error) = injected {
            return Err(error);
        }

        // Faults are decided before anything is applied, so a failed attempt
        // leaves the graph untouched.
        let mut graph = self
            .graph
            .lock()
            .map_err(|_| StoreError::Permanent("memory graph lock poisoned".to_string()))?;
        graph.apply(batch);
        Ok(())
    }
}

impl GraphSink for MemorySink {
    async fn write_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        self.try_write(batch)
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let graph = self
            .graph
            .lock()
            .map_err(|_| StoreError::Permanent("memory graph lock poisoned".to_string()))?;
        Ok(GraphStats {
            entity_count: graph.nodes.len(),
            relation_count: graph.edges.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::plan_batches;
    use extract::RecordSet;

    fn records() -> RecordSet {
        let mut set = RecordSet::new();
        set.insert_entity(EntityRecord::new("grill", "Grill", "equipment"));
        set.insert_entity(EntityRecord::new("fryer", "Fryer", "equipment"));
        set.push_relationship(RelationshipRecord::new("grill", "fryer", "near"));
        set
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let sink = MemorySink::new();
        let batches = plan_batches(&records(), 10);

        for batch in &batches {
            sink.write_batch(batch).await.unwrap();
        }
        let once = sink.snapshot();
        for batch in &batches {
            sink.write_batch(batch).await.unwrap();
        }

        assert_eq!(sink.snapshot(), once);
        assert_eq!(
            sink.stats().await.unwrap(),
            GraphStats {
                entity_count: 2,
                relation_count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_relationship_first_creates_placeholders_later_filled() {
        let sink = MemorySink::new();
        let batches = plan_batches(&records(), 10);

        sink.write_batch(&batches[1]).await.unwrap();
        assert_eq!(sink.snapshot().nodes["grill"].entity_type, PLACEHOLDER_TYPE);

        sink.write_batch(&batches[0]).await.unwrap();
        assert_eq!(sink.snapshot().nodes["grill"].entity_type, "equipment");
    }

    #[tokio::test]
    async fn test_injected_fault_leaves_graph_untouched() {
        let sink = MemorySink::new();
        let batches = plan_batches(&records(), 10);
        sink.fail_batch(0, [StoreError::Transient("connection reset".into())]);

        assert!(sink.write_batch(&batches[0]).await.is_err());
        assert!(sink.snapshot().nodes.is_empty());
        assert!(sink.write_batch(&batches[0]).await.is_ok());
        assert_eq!(sink.attempts(), 2);
    }
}
