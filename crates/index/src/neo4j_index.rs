use crate::batch::{Batch, BatchPayload};
use crate::sink::{GraphSink, GraphStats, StoreError, classify_message};
use extract::{EntityRecord, RelationshipRecord};
use neo4rs::{BoltMap, BoltString, BoltType, Graph, Query, query};
use tracing::{debug, info};

/// Type given to nodes created only because a relationship referenced them.
pub const PLACEHOLDER_TYPE: &str = "UNKNOWN";

const UPSERT_ENTITIES: &str = r#"
UNWIND $rows AS row
MERGE (e:Entity {id: row.id})
SET e.name = row.name,
    e.canonical_name = row.canonical_name,
    e.type = row.type,
    e.description = row.description,
    e.source_document = row.source_document
"#;

// Endpoints are merged rather than matched so the edge is always written,
// even when its entity batch has not landed yet; the entity upsert fills the
// placeholder in later.
const UPSERT_RELATIONSHIPS: &str = r#"
UNWIND $rows AS row
MERGE (source:Entity {id: row.source_id})
ON CREATE SET source.name = row.source_id, source.type = $placeholder, source.description = ''
MERGE (target:Entity {id: row.target_id})
ON CREATE SET target.name = row.target_id, target.type = $placeholder, target.description = ''
MERGE (source)-[r:RELATION {type: row.relation_type}]->(target)
SET r.weight = row.weight,
    r.description = row.description,
    r.source_document = row.source_document
"#;

// Entity.id must stay unique even when a timed-out attempt and its retry
// overlap on the server.
const SCHEMA: [&str; 2] = [
    "CREATE CONSTRAINT entity_id_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
    "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)",
];

pub struct Neo4jSink {
    graph: Graph,
}

impl Neo4jSink {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password).await.map_err(classify)?;
        info!(uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Initialize schema: id uniqueness constraint plus a name index
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Creating Neo4j schema...");

        for statement in SCHEMA {
            self.graph.run(query(statement)).await.map_err(classify)?;
        }

        info!("Neo4j schema created successfully");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.graph.run(query("RETURN 1")).await.map_err(classify)
    }

    fn batch_query(batch: &Batch) -> Query {
        match &batch.payload {
            BatchPayload::Entities(entities) => {
                let rows: Vec<BoltType> = entities.iter().map(entity_row).collect();
                query(UPSERT_ENTITIES).param("rows", rows)
            }
            BatchPayload::Relationships(relationships) => {
                let rows: Vec<BoltType> = relationships.iter().map(relationship_row).collect();
                query(UPSERT_RELATIONSHIPS)
                    .param("rows", rows)
                    .param("placeholder", PLACEHOLDER_TYPE)
            }
        }
    }

    async fn count(&self, cypher: &str) -> Result<usize, StoreError> {
        let mut result = self.graph.execute(query(cypher)).await.map_err(classify)?;
        let count = match result.next().await.map_err(classify)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

impl GraphSink for Neo4jSink {
    /// One explicit transaction per batch: either every row lands or the
    /// transaction is rolled back.
    async fn write_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        let query = Self::batch_query(batch);

        let mut txn = self.graph.start_txn().await.map_err(classify)?;
        if let Err(e) = txn.run(query).await {
            let error = classify(e);
            if let Err(rollback) = txn.rollback().await {
                debug!(batch_id = %batch.id, error = %rollback, "Rollback failed");
            }
            return Err(error);
        }
        txn.commit().await.map_err(classify)?;

        debug!(batch_id = %batch.id, records = batch.len(), "Neo4j transaction committed");
        Ok(())
    }

    /// Get graph statistics
    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let entity_count = self.count("MATCH (e:Entity) RETURN count(e) as count").await?;
        let relation_count = self
            .count("MATCH ()-[r:RELATION]->() RETURN count(r) as count")
            .await?;

        Ok(GraphStats {
            entity_count,
            relation_count,
        })
    }
}

fn classify(error: neo4rs::Error) -> StoreError {
    classify_message(&error.to_string())
}

fn put(map: &mut BoltMap, key: &str, value: impl Into<BoltType>) {
    map.put(BoltString::from(key), value.into());
}

fn entity_row(entity: &EntityRecord) -> BoltType {
    let mut row = BoltMap::new();
    put(&mut row, "id", entity.id.as_str());
    put(&mut row, "name", entity.name.as_str());
    put(&mut row, "canonical_name", entity.canonical_name.as_str());
    put(&mut row, "type", entity.entity_type.as_str());
    put(&mut row, "description", entity.description.as_str());
    put(&mut row, "source_document", entity.source_document.as_str());
    BoltType::Map(row)
}

fn relationship_row(rel: &RelationshipRecord) -> BoltType {
    let mut row = BoltMap::new();
    put(&mut row, "source_id", rel.source_id.as_str());
    put(&mut row, "target_id", rel.target_id.as_str());
    put(&mut row, "relation_type", rel.relation_type.as_str());
    put(&mut row, "description", rel.description.as_str());
    put(&mut row, "source_document", rel.source_document.as_str());
    // A missing key reads as null in Cypher, which clears the property.
    if let Some(weight) = rel.weight {
        put(&mut row, "weight", weight);
    }
    BoltType::Map(row)
}
