use crate::normalizer::{are_similar, compact_key, normalize};
use crate::schema::{EntityRecord, RecordSet, RelationshipRecord, merge_fields};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Decides which entity names refer to the same thing.
///
/// `key` maps a raw name to a comparison key; names with equal keys always
/// merge. When `pairwise` is true the deduplicator also asks `is_match` for
/// every pair of distinct keys, so the rule must be a function of the keys
/// alone for deduplication to stay idempotent.
pub trait SimilarityPolicy: Send + Sync {
    fn key(&self, name: &str) -> String;

    fn is_match(&self, a: &str, b: &str) -> bool {
        a == b
    }

    fn pairwise(&self) -> bool {
        false
    }
}

/// Known synonyms, stored as compact alias key -> normalized canonical name.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equipment and procedure synonyms seen in QSR manuals.
    pub fn qsr() -> Self {
        let mut table = Self::new();
        table.add("Taylor C602", ["C602", "C 602", "C-602", "Taylor C-602", "Taylor 602"]);
        table.add("Taylor C712", ["C712", "C 712", "C-712", "Taylor C-712"]);
        table.add("Ice Cream Machine", ["ICM", "Soft Serve Machine", "Soft-Serve Machine"]);
        table.add("Heated Holding Cabinet", ["HHC", "Holding Cabinet"]);
        table.add("Frymaster Fryer", ["Frymaster", "FM Fryer"]);
        table.add("Heat Treatment Cycle", ["Heat Mode", "Heat Treatment", "Heat Cycle"]);
        table
    }

    pub fn add<'a, I>(&mut self, canonical: &str, aliases: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let target = normalize(canonical);
        self.aliases.insert(compact_key(canonical), target.clone());
        for alias in aliases {
            self.aliases.insert(compact_key(alias), target.clone());
        }
    }

    /// Normalized canonical form of `name`, or its plain normalized form if
    /// the table has no entry for it.
    pub fn resolve(&self, name: &str) -> String {
        self.aliases
            .get(&compact_key(name))
            .cloned()
            .unwrap_or_else(|| normalize(name))
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Case, punctuation and spacing insensitive match plus an alias table.
#[derive(Debug, Clone, Default)]
pub struct AliasPolicy {
    table: AliasTable,
}

impl AliasPolicy {
    pub fn new(table: AliasTable) -> Self {
        Self { table }
    }

    pub fn qsr() -> Self {
        Self::new(AliasTable::qsr())
    }
}

impl SimilarityPolicy for AliasPolicy {
    fn key(&self, name: &str) -> String {
        compact_key(&self.table.resolve(name))
    }
}

/// Alias matching plus containment / word-overlap fuzzy matching.
#[derive(Debug, Clone, Default)]
pub struct FuzzyPolicy {
    table: AliasTable,
}

impl FuzzyPolicy {
    pub fn new(table: AliasTable) -> Self {
        Self { table }
    }
}

impl SimilarityPolicy for FuzzyPolicy {
    fn key(&self, name: &str) -> String {
        self.table.resolve(name)
    }

    fn is_match(&self, a: &str, b: &str) -> bool {
        compact_key(a) == compact_key(b) || are_similar(a, b)
    }

    fn pairwise(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub records: RecordSet,
    /// Entities folded into another record.
    pub merged_entities: usize,
    /// Relationships that collapsed into an identical edge.
    pub merged_relationships: usize,
    /// Old entity id -> canonical id, for ids that changed.
    pub remap: BTreeMap<String, String>,
}

pub struct Deduplicator {
    policy: Box<dyn SimilarityPolicy>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(AliasPolicy::qsr())
    }
}

impl Deduplicator {
    pub fn new(policy: impl SimilarityPolicy + 'static) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }

    /// Collapse near-duplicate entities and rewrite relationship endpoints to
    /// the surviving ids.
    pub fn deduplicate(&self, records: RecordSet) -> DedupOutcome {
        let RecordSet {
            entities,
            relationships,
        } = records;

        let groups = self.group(&entities);
        let mut remap = BTreeMap::new();
        let mut merged_entities = 0;
        let mut out = RecordSet::new();

        for members in groups {
            let group: Vec<&EntityRecord> = members.iter().map(|id| &entities[id]).collect();
            if group.len() == 1 {
                out.entities.insert(group[0].id.clone(), group[0].clone());
                continue;
            }

            let merged = merge_group(&group);
            debug!(
                canonical = %merged.canonical_name,
                members = group.len(),
                "Merged duplicate entities"
            );
            for entity in &group {
                if entity.id != merged.id {
                    remap.insert(entity.id.clone(), merged.id.clone());
                }
            }
            merged_entities += group.len() - 1;
            out.entities.insert(merged.id.clone(), merged);
        }

        let before = relationships.len();
        out.relationships = collapse_relationships(relationships, &remap);
        let merged_relationships = before - out.relationships.len();

        info!(
            entities = out.entities.len(),
            merged_entities,
            relationships = out.relationships.len(),
            merged_relationships,
            "Deduplication finished"
        );

        DedupOutcome {
            records: out,
            merged_entities,
            merged_relationships,
            remap,
        }
    }

    /// Group entity ids whose names match; each group is in id order.
    fn group(&self, entities: &BTreeMap<String, EntityRecord>) -> Vec<Vec<String>> {
        let mut by_key: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entity in entities.values() {
            by_key
                .entry(self.policy.key(&entity.name))
                .or_default()
                .push(entity.id.clone());
        }

        let keys: Vec<&String> = by_key.keys().collect();
        let mut sets = DisjointSet::new(keys.len());
        if self.policy.pairwise() {
            for i in 0..keys.len() {
                for j in (i + 1)..keys.len() {
                    if self.policy.is_match(keys[i], keys[j]) {
                        sets.union(i, j);
                    }
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (idx, ids) in by_key.values().enumerate() {
            components
                .entry(sets.find(idx))
                .or_default()
                .extend(ids.iter().cloned());
        }

        components
            .into_values()
            .map(|mut ids| {
                ids.sort();
                ids
            })
            .collect()
    }
}

/// Canonical pick: longest name, then lexicographically smallest name, then
/// smallest id.
fn pick_canonical<'a>(group: &[&'a EntityRecord]) -> &'a EntityRecord {
    group
        .iter()
        .copied()
        .max_by_key(|e| (e.name.chars().count(), Reverse(e.name.clone()), Reverse(e.id.clone())))
        .unwrap_or(group[0])
}

fn merge_group(group: &[&EntityRecord]) -> EntityRecord {
    let canonical = pick_canonical(group);
    let ordered: Vec<&EntityRecord> = std::iter::once(canonical)
        .chain(group.iter().copied().filter(|e| e.id != canonical.id))
        .collect();

    let entity_type = ordered
        .iter()
        .map(|e| e.entity_type.as_str())
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_string();

    EntityRecord {
        id: canonical.id.clone(),
        name: canonical.name.clone(),
        canonical_name: canonical.name.clone(),
        entity_type,
        description: merge_fields(ordered.iter().map(|e| e.description.as_str())),
        source_document: merge_fields(ordered.iter().map(|e| e.source_document.as_str())),
    }
}

/// Rewrite endpoints through `remap` and fold edges that became identical.
/// Edges whose endpoints merged into one entity are dropped. First occurrence
/// keeps its position; untouched edges are returned as-is.
fn collapse_relationships(
    relationships: Vec<RelationshipRecord>,
    remap: &BTreeMap<String, String>,
) -> Vec<RelationshipRecord> {
    let mut out: Vec<RelationshipRecord> = Vec::with_capacity(relationships.len());
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();

    let mut self_loops = 0usize;

    for mut rel in relationships {
        let was_loop = rel.source_id == rel.target_id;
        if let Some(id) = remap.get(&rel.source_id) {
            rel.source_id = id.clone();
        }
        if let Some(id) = remap.get(&rel.target_id) {
            rel.target_id = id.clone();
        }
        if !was_loop && rel.source_id == rel.target_id {
            self_loops += 1;
            continue;
        }

        let key = (rel.source_id.clone(), rel.relation_type.clone(), rel.target_id.clone());
        match index.get(&key) {
            Some(&pos) => {
                let existing = &mut out[pos];
                existing.weight = match (existing.weight, rel.weight) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                existing.description = merge_fields([existing.description.as_str(), rel.description.as_str()]);
                existing.source_document =
                    merge_fields([existing.source_document.as_str(), rel.source_document.as_str()]);
            }
            None => {
                index.insert(key, out.len());
                out.push(rel);
            }
        }
    }

    if self_loops > 0 {
        debug!(self_loops, "Dropped relationships between merged aliases");
    }

    out
}

/// Split relationships into those whose endpoints both exist in the entity
/// set and the orphans that must not be written.
pub fn validate_relationships(records: RecordSet) -> (RecordSet, Vec<RelationshipRecord>) {
    let RecordSet {
        entities,
        relationships,
    } = records;

    let (valid, orphans): (Vec<_>, Vec<_>) = relationships
        .into_iter()
        .partition(|r| entities.contains_key(&r.source_id) && entities.contains_key(&r.target_id));

    if !orphans.is_empty() {
        info!(orphans = orphans.len(), "Dropping relationships with missing endpoints");
    }

    (
        RecordSet {
            entities,
            relationships: valid,
        },
        orphans,
    )
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so component ids follow key order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str, description: &str) -> EntityRecord {
        EntityRecord::new(id, name, "equipment").with_description(description)
    }

    fn sample() -> RecordSet {
        let mut set = RecordSet::new();
        set.insert_entity(entity("e1", "Taylor C602", "soft serve freezer"));
        set.insert_entity(entity("e2", "C 602", "runs heat treatment nightly"));
        set.insert_entity(entity("e3", "Fryer", "cooks fries"));
        set.insert_entity(entity("e4", "fryer", "cooks fries"));
        set.insert_entity(entity("e5", "Grill", "clamshell grill"));
        set.push_relationship(RelationshipRecord::new("e2", "e3", "located_near").with_weight(0.4));
        set.push_relationship(RelationshipRecord::new("e1", "e3", "located_near").with_weight(0.9));
        set.push_relationship(RelationshipRecord::new("e5", "e4", "located_near"));
        set
    }

    #[test]
    fn test_alias_table_merges_model_numbers() {
        let mut set = RecordSet::new();
        set.insert_entity(entity("a", "Taylor C602", "freezer"));
        set.insert_entity(entity("b", "C 602", "freezer"));
        set.insert_entity(entity("c", "Grill", "grill"));
        let input_len = set.entity_count();

        let outcome = Deduplicator::new(AliasPolicy::qsr()).deduplicate(set);

        assert_eq!(outcome.records.entity_count(), input_len - 1);
        let merged = &outcome.records.entities["a"];
        assert_eq!(merged.canonical_name, "Taylor C602");
        assert_eq!(outcome.remap.get("b").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_merge_unions_descriptions_and_rewrites_edges() {
        let outcome = Deduplicator::default().deduplicate(sample());
        let records = &outcome.records;

        assert_eq!(records.entity_count(), 3);
        assert_eq!(
            records.entities["e1"].description,
            "soft serve freezer<SEP>runs heat treatment nightly"
        );
        // e2->e3 and e1->e3 collapse into one edge with the stronger weight.
        let near: Vec<_> = records
            .relationships
            .iter()
            .filter(|r| r.source_id == "e1" && r.target_id == "e3")
            .collect();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].weight, Some(0.9));
        assert!(records.relationships.iter().all(|r| r.target_id != "e4"));
        assert_eq!(outcome.merged_entities, 2);
        assert_eq!(outcome.merged_relationships, 1);
    }

    #[test]
    fn test_edges_between_merged_aliases_are_dropped() {
        let mut set = sample();
        set.push_relationship(RelationshipRecord::new("e2", "e1", "part_of"));
        set.push_relationship(RelationshipRecord::new("e5", "e5", "cleans"));

        let outcome = Deduplicator::default().deduplicate(set);
        let records = &outcome.records;

        assert!(records.relationships.iter().all(|r| r.relation_type != "part_of"));
        // A loop present in the input is not a merge artifact.
        assert!(
            records
                .relationships
                .iter()
                .any(|r| r.source_id == "e5" && r.target_id == "e5")
        );
        assert_eq!(outcome.merged_relationships, 2);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let dedup = Deduplicator::new(FuzzyPolicy::new(AliasTable::qsr()));
        let once = dedup.deduplicate(sample()).records;
        let twice = dedup.deduplicate(once.clone());

        assert_eq!(twice.records, once);
        assert_eq!(twice.merged_entities, 0);
        assert!(twice.remap.is_empty());
    }

    #[test]
    fn test_longest_name_wins_with_lexicographic_tiebreak() {
        let mut set = RecordSet::new();
        set.insert_entity(entity("z", "FRYER", ""));
        set.insert_entity(entity("y", "Fryer", ""));
        set.insert_entity(entity("x", "fryer.", ""));

        let outcome = Deduplicator::default().deduplicate(set);
        let survivor = outcome.records.entities.values().next().unwrap();

        // "fryer." is longest; without it "FRYER" < "Fryer" would win.
        assert_eq!(survivor.id, "x");
        assert_eq!(survivor.name, "fryer.");
    }

    #[test]
    fn test_fuzzy_policy_merges_word_overlap() {
        let mut set = RecordSet::new();
        set.insert_entity(entity("a", "Nightly Heat Treatment Procedure", ""));
        set.insert_entity(entity("b", "Heat Treatment Procedure Nightly", ""));

        let exact = Deduplicator::new(AliasPolicy::default()).deduplicate(set.clone());
        assert_eq!(exact.records.entity_count(), 2);

        let fuzzy = Deduplicator::new(FuzzyPolicy::default()).deduplicate(set);
        assert_eq!(fuzzy.records.entity_count(), 1);
    }

    #[test]
    fn test_validate_drops_orphans() {
        let mut set = RecordSet::new();
        set.insert_entity(entity("a", "Grill", ""));
        set.insert_entity(entity("b", "Fryer", ""));
        set.push_relationship(RelationshipRecord::new("a", "b", "near"));
        set.push_relationship(RelationshipRecord::new("a", "ghost", "near"));

        let (valid, orphans) = validate_relationships(set);

        assert_eq!(valid.relationship_count(), 1);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].target_id, "ghost");
    }
}
