use std::collections::HashSet;

use crate::schema::{Entity, ParsedResult};

/// Identity of an entity for deduplication: lower-cased trimmed text and
/// lower-cased type.
pub fn entity_key(entity: &Entity) -> (String, String) {
    (
        entity.text.trim().to_lowercase(),
        entity.entity_type.trim().to_lowercase(),
    )
}

/// Merges extraction results, keeping the first occurrence of every entity.
#[derive(Debug, Default)]
pub struct EntityDeduplicator {
    seen: HashSet<(String, String)>,
    seen_citations: HashSet<String>,
    seen_relationships: HashSet<String>,
    merged: ParsedResult,
}

impl EntityDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the entity was new
    pub fn push_entity(&mut self, entity: Entity) -> bool {
        if self.seen.insert(entity_key(&entity)) {
            self.merged.entities.push(entity);
            true
        } else {
            false
        }
    }

    pub fn absorb(&mut self, result: ParsedResult) {
        for entity in result.entities {
            self.push_entity(entity);
        }
        for citation in result.citations {
            if self.seen_citations.insert(citation.to_string()) {
                self.merged.citations.push(citation);
            }
        }
        for relationship in result.relationships {
            if self.seen_relationships.insert(relationship.to_string()) {
                self.merged.relationships.push(relationship);
            }
        }
        for (key, value) in result.extra {
            self.merged.extra.entry(key).or_insert(value);
        }
    }

    pub fn len(&self) -> usize {
        self.merged.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.entities.is_empty()
    }

    pub fn finish(self) -> ParsedResult {
        self.merged
    }
}

/// Merge results in order with first-occurrence deduplication.
pub fn merge_results<I>(results: I) -> ParsedResult
where
    I: IntoIterator<Item = ParsedResult>,
{
    let mut dedup = EntityDeduplicator::new();
    for result in results {
        dedup.absorb(result);
    }
    dedup.finish()
}
