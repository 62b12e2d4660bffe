//! Event normalizer: resolves raw entity guesses to canonical entities and
//! discards repeat observations of the same post.
//!
//! This is the only component that mutates the entity catalog. Every creation
//! or alias extension marks the entity dirty so the engine can write it
//! through to persistence, retrying on the next flush if that fails.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use trendpulse_core::{
    normalize_alias, BucketSpec, CanonicalEntity, EntityId, EntityKind, EntitySeed, MentionEvent,
};

use crate::error::EngineError;
use crate::similarity::similarity;

#[derive(Debug, Clone, Copy)]
pub struct NormalizerConfig {
    pub fuzzy_threshold: f64,
    pub min_confidence: f64,
    pub bucket: BucketSpec,
}

/// How a raw guess was matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Exact,
    Fuzzy { similarity: f64 },
    Created,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Accepted(Resolved),
    /// Already recorded for this entity in the same or an adjacent window.
    Duplicate { entity_id: EntityId },
    LowConfidence,
}

#[derive(Debug, Default)]
struct Catalog {
    entities: BTreeMap<EntityId, CanonicalEntity>,
    alias_index: HashMap<String, EntityId>,
    next_id: i64,
    dirty: BTreeSet<EntityId>,
}

impl Catalog {
    fn insert(&mut self, entity: CanonicalEntity) {
        self.next_id = self.next_id.max(entity.entity_id.0 + 1);
        self.alias_index
            .insert(normalize_alias(&entity.display_name), entity.entity_id);
        for alias in &entity.aliases {
            self.alias_index.insert(alias.clone(), entity.entity_id);
        }
        self.entities.insert(entity.entity_id, entity);
    }

    fn create(
        &mut self,
        display_name: &str,
        kind: EntityKind,
        aliases: impl IntoIterator<Item = String>,
        description: Option<String>,
    ) -> EntityId {
        let entity_id = EntityId(self.next_id.max(1));
        let mut alias_set: BTreeSet<String> = aliases
            .into_iter()
            .filter(|a| !self.alias_index.contains_key(a))
            .collect();
        alias_set.insert(normalize_alias(display_name));

        self.insert(CanonicalEntity {
            entity_id,
            kind,
            display_name: display_name.split_whitespace().collect::<Vec<_>>().join(" "),
            aliases: alias_set,
            description,
            archived_at: None,
        });
        self.dirty.insert(entity_id);
        entity_id
    }

    /// Appends `alias` to `entity_id` unless another entity already owns it.
    fn add_alias(&mut self, entity_id: EntityId, alias: String) -> bool {
        if self.alias_index.contains_key(&alias) {
            return false;
        }
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return false;
        };
        entity.aliases.insert(alias.clone());
        self.alias_index.insert(alias, entity_id);
        self.dirty.insert(entity_id);
        true
    }

    /// Most similar display name, restricted to `kind` when given. Ties go
    /// to the lower id.
    fn best_fuzzy(
        &self,
        key: &str,
        kind: Option<EntityKind>,
    ) -> Option<(EntityId, EntityKind, f64)> {
        self.entities
            .values()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .map(|e| {
                let score = similarity(key, &normalize_alias(&e.display_name));
                (e.entity_id, e.kind, score)
            })
            .max_by(|a, b| a.2.total_cmp(&b.2).then_with(|| b.0.cmp(&a.0)))
    }
}

pub struct Normalizer {
    config: NormalizerConfig,
    catalog: RwLock<Catalog>,
    /// Post ids seen per `(entity, bucket index)`.
    seen: Mutex<HashMap<(EntityId, i64), HashSet<String>>>,
}

impl Normalizer {
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            catalog: RwLock::new(Catalog {
                next_id: 1,
                ..Catalog::default()
            }),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Loads previously persisted entities. They are not marked dirty.
    pub async fn hydrate(&self, entities: Vec<CanonicalEntity>) {
        let mut catalog = self.catalog.write().await;
        for entity in entities {
            catalog.insert(entity);
        }
    }

    /// Merges the seed catalog into the live catalog.
    ///
    /// A seed whose name or any alias is already known extends that entity;
    /// otherwise a new entity is created. Returns the number of entities
    /// created or changed.
    pub async fn seed(&self, seeds: &[EntitySeed]) -> usize {
        let mut catalog = self.catalog.write().await;
        let mut touched = BTreeSet::new();

        for seed in seeds {
            let name_key = normalize_alias(&seed.name);
            let alias_keys: Vec<String> = seed
                .aliases
                .iter()
                .map(|a| normalize_alias(a))
                .filter(|a| !a.is_empty())
                .collect();

            let existing = std::iter::once(&name_key)
                .chain(alias_keys.iter())
                .find_map(|k| catalog.alias_index.get(k).copied());

            match existing {
                Some(entity_id) => {
                    for key in std::iter::once(name_key).chain(alias_keys) {
                        if catalog.add_alias(entity_id, key) {
                            touched.insert(entity_id);
                        }
                    }
                    if let Some(entity) = catalog.entities.get_mut(&entity_id) {
                        if entity.description.is_none() && seed.description.is_some() {
                            entity.description.clone_from(&seed.description);
                            touched.insert(entity_id);
                        }
                    }
                    if touched.contains(&entity_id) {
                        catalog.dirty.insert(entity_id);
                    }
                }
                None => {
                    let id = catalog.create(
                        &seed.name,
                        seed.kind,
                        alias_keys,
                        seed.description.clone(),
                    );
                    touched.insert(id);
                }
            }
        }

        if !touched.is_empty() {
            tracing::info!(entities = touched.len(), "normalizer: seed catalog merged");
        }
        touched.len()
    }

    /// Resolves a raw guess to a canonical entity, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BlankGuess`] if the guess is empty after trimming.
    pub async fn resolve(
        &self,
        raw_guess: &str,
        kind_hint: Option<EntityKind>,
    ) -> Result<Resolved, EngineError> {
        let key = normalize_alias(raw_guess);
        if key.is_empty() {
            return Err(EngineError::BlankGuess);
        }

        {
            let catalog = self.catalog.read().await;
            if let Some(resolved) = exact(&catalog, &key) {
                return Ok(resolved);
            }
        }

        // Re-check under the write lock so racing callers create one entity.
        let mut catalog = self.catalog.write().await;
        if let Some(resolved) = exact(&catalog, &key) {
            return Ok(resolved);
        }

        if let Some((entity_id, kind, score)) = catalog.best_fuzzy(&key, kind_hint) {
            if score >= self.config.fuzzy_threshold {
                catalog.add_alias(entity_id, key.clone());
                tracing::debug!(
                    entity_id = %entity_id,
                    alias = %key,
                    similarity = score,
                    "normalizer: fuzzy match, alias appended"
                );
                return Ok(Resolved {
                    entity_id,
                    kind,
                    resolution: Resolution::Fuzzy { similarity: score },
                });
            }
        }

        let kind = kind_hint.unwrap_or(EntityKind::Trend);
        let entity_id = catalog.create(raw_guess.trim(), kind, std::iter::empty(), None);
        tracing::info!(
            entity_id = %entity_id,
            kind = %kind,
            name = %raw_guess.trim(),
            "normalizer: created canonical entity"
        );
        Ok(Resolved {
            entity_id,
            kind,
            resolution: Resolution::Created,
        })
    }

    /// Resolves the event's entity and applies post-id deduplication.
    ///
    /// # Errors
    ///
    /// Propagates [`Normalizer::resolve`] errors.
    pub async fn normalize(&self, event: &MentionEvent) -> Result<NormalizeOutcome, EngineError> {
        if event
            .confidence
            .is_some_and(|c| c < self.config.min_confidence)
        {
            return Ok(NormalizeOutcome::LowConfidence);
        }

        let resolved = self
            .resolve(&event.raw_entity_guess, event.kind_hint)
            .await?;

        let bucket = self.config.bucket.bucket_index(event.observed_at);
        let mut seen = self.seen.lock().await;
        let already = (bucket - 1..=bucket + 1).any(|b| {
            seen.get(&(resolved.entity_id, b))
                .is_some_and(|ids| ids.contains(&event.platform_post_id))
        });
        if already {
            return Ok(NormalizeOutcome::Duplicate {
                entity_id: resolved.entity_id,
            });
        }
        seen.entry((resolved.entity_id, bucket))
            .or_default()
            .insert(event.platform_post_id.clone());

        Ok(NormalizeOutcome::Accepted(resolved))
    }

    /// Soft-archives an entity. Archiving twice keeps the first timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownEntity`] if the id is not in the catalog.
    pub async fn archive(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<CanonicalEntity, EngineError> {
        let mut catalog = self.catalog.write().await;
        let entity = catalog
            .entities
            .get_mut(&entity_id)
            .ok_or(EngineError::UnknownEntity(entity_id))?;
        if entity.archived_at.is_none() {
            entity.archived_at = Some(at);
        }
        let archived = entity.clone();
        catalog.dirty.insert(entity_id);
        Ok(archived)
    }

    pub async fn entity(&self, entity_id: EntityId) -> Option<CanonicalEntity> {
        self.catalog.read().await.entities.get(&entity_id).cloned()
    }

    /// All entities, ordered by id.
    pub async fn entities(&self) -> Vec<CanonicalEntity> {
        self.catalog.read().await.entities.values().cloned().collect()
    }

    /// Drains the set of entities changed since the last call.
    pub async fn take_dirty(&self) -> Vec<CanonicalEntity> {
        let mut catalog = self.catalog.write().await;
        let ids = std::mem::take(&mut catalog.dirty);
        ids.into_iter()
            .filter_map(|id| catalog.entities.get(&id).cloned())
            .collect()
    }

    /// Re-queues entities whose write-through failed.
    pub async fn mark_dirty(&self, ids: impl IntoIterator<Item = EntityId>) {
        self.catalog.write().await.dirty.extend(ids);
    }

    /// Forgets dedup state for buckets older than `bucket_index`.
    pub async fn prune_seen(&self, bucket_index: i64) -> usize {
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|(_, b), _| *b >= bucket_index);
        before - seen.len()
    }
}

fn exact(catalog: &Catalog, key: &str) -> Option<Resolved> {
    let entity_id = *catalog.alias_index.get(key)?;
    let kind = catalog.entities.get(&entity_id)?.kind;
    Some(Resolved {
        entity_id,
        kind,
        resolution: Resolution::Exact,
    })
}

#[cfg(test)]
#[path = "normalizer_test.rs"]
mod tests;
