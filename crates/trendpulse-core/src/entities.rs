use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// The three families of fashion entity the engine ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Trend,
    Brand,
    Style,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Trend, EntityKind::Brand, EntityKind::Style];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Trend => "trend",
            EntityKind::Brand => "brand",
            EntityKind::Style => "style",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trend" | "trends" => Ok(EntityKind::Trend),
            "brand" | "brands" => Ok(EntityKind::Brand),
            "style" | "styles" => Ok(EntityKind::Style),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

/// Stable identifier of a canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The deduplicated representation of a trend, brand or style across all of
/// its raw-name variants.
///
/// The alias set only ever grows. Entities are never deleted; `archived_at`
/// marks an entity as retired while keeping its history resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub display_name: String,
    pub aliases: BTreeSet<String>,
    pub description: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl CanonicalEntity {
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Canonical lookup key for an alias: trimmed, lowercased, inner whitespace
/// collapsed to single spaces.
///
/// `"Canadian  Tuxedo "` and `"canadian tuxedo"` share a key.
#[must_use]
pub fn normalize_alias(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One entry of the seed catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySeed {
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub entities: Vec<EntitySeed>,
}

/// Load and validate the entity seed catalog from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_catalog(path: &Path) -> Result<CatalogFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_catalog(&content)
}

/// Parse and validate catalog YAML already held in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_catalog(content: &str) -> Result<CatalogFile, ConfigError> {
    let catalog: CatalogFile = serde_yaml::from_str(content)?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

fn validate_catalog(catalog: &CatalogFile) -> Result<(), ConfigError> {
    let mut seen_aliases = HashSet::new();

    for seed in &catalog.entities {
        let name_key = normalize_alias(&seed.name);
        if name_key.is_empty() {
            return Err(ConfigError::Validation(
                "entity name must be non-empty".to_string(),
            ));
        }

        // The name is an implicit alias; a repeated alias within one entity is harmless.
        let mut own = HashSet::new();
        own.insert(name_key);
        for alias in &seed.aliases {
            let key = normalize_alias(alias);
            if key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}' has an empty alias",
                    seed.name
                )));
            }
            own.insert(key);
        }

        for key in own {
            if !seen_aliases.insert(key.clone()) {
                return Err(ConfigError::Validation(format!(
                    "alias '{key}' is claimed by more than one entity (last: '{}')",
                    seed.name
                )));
            }
        }
    }

    Ok(())
}
