pub mod dedup;
pub mod normalizer;
pub mod schema;

pub use dedup::{
    AliasPolicy, AliasTable, DedupOutcome, Deduplicator, FuzzyPolicy, SimilarityPolicy,
    validate_relationships,
};
pub use schema::{EntityRecord, FIELD_SEP, RecordSet, RelationshipRecord, merge_fields};
