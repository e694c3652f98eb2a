// src/config.rs

//! Plant description files.
//!
//! A plant is described in JSON: the work modules with their processing and
//! transit times, the transport-module prototype, and the recipes. The
//! description is validated and turned into a [`Plant`] ready for seeding
//! and search.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::grid::Direction;
use crate::module::{Module, Universe};
use crate::plant::Plant;
use crate::recipe::Recipe;

fn default_queue_length() -> u32 {
    1
}

fn default_amount() -> u32 {
    1
}

fn default_passthrough() -> bool {
    true
}

/// Top-level plant description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantConfig {
    pub modules: Vec<ModuleConfig>,
    pub transport: TransportConfig,
    pub recipes: Vec<RecipeConfig>,
}

/// One work module.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub id: String,
    /// Work type to processing time.
    pub work: BTreeMap<String, u32>,
    /// 4x4 input-to-output transit times.
    pub transit_times: [[u32; 4]; 4],
    #[serde(default = "default_queue_length")]
    pub queue_length: u32,
    #[serde(default)]
    pub allow_passthrough: bool,
}

/// The transport-module prototype. Transports perform no work; they only
/// convey, so passthrough defaults to on.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    pub transit_times: [[u32; 4]; 4],
    #[serde(default = "default_queue_length")]
    pub queue_length: u32,
    #[serde(default = "default_passthrough")]
    pub allow_passthrough: bool,
}

/// One recipe.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeConfig {
    pub name: String,
    /// Work type to the set of work types it depends on.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Direction the product enters its start module from (0 = up,
    /// 1 = right, 2 = down, 3 = left).
    #[serde(default)]
    pub start_direction: usize,
    #[serde(default = "default_amount")]
    pub amount: u32,
}

/// Load and validate a plant description file.
pub fn load_plant(path: &Path) -> Result<Plant> {
    let source = fs::read_to_string(path)?;
    let config: PlantConfig = serde_json::from_str(&source)
        .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
    build_plant(config)
}

/// Turn a parsed description into a plant, validating ids, directions, and
/// amounts.
pub fn build_plant(config: PlantConfig) -> Result<Plant> {
    if config.modules.is_empty() {
        return Err(Error::ConfigError(
            "a plant needs at least one work module".to_string(),
        ));
    }
    if config.recipes.is_empty() {
        return Err(Error::ConfigError(
            "a plant needs at least one recipe".to_string(),
        ));
    }

    let transport = Module::new(
        "transport",
        BTreeMap::new(),
        config.transport.transit_times,
        config.transport.queue_length,
        config.transport.allow_passthrough,
    );
    let mut universe = Universe::new(transport);

    for m in &config.modules {
        if m.id.starts_with("transporter") {
            return Err(Error::ConfigError(format!(
                "module id '{}' collides with the reserved transporter namespace",
                m.id
            )));
        }
        universe.register(Module::new(
            &m.id,
            m.work.clone(),
            m.transit_times,
            m.queue_length,
            m.allow_passthrough,
        ))?;
    }

    let mut names = HashSet::new();
    let mut recipes = Vec::with_capacity(config.recipes.len());
    for r in &config.recipes {
        if !names.insert(r.name.clone()) {
            return Err(Error::ConfigError(format!(
                "recipe name '{}' is not unique",
                r.name
            )));
        }
        let direction = Direction::from_index(r.start_direction).ok_or_else(|| {
            Error::ConfigError(format!(
                "recipe '{}' has start direction {}, expected 0..=3",
                r.name, r.start_direction
            ))
        })?;
        if r.amount == 0 {
            return Err(Error::ConfigError(format!(
                "recipe '{}' has amount 0",
                r.name
            )));
        }
        recipes.push(Recipe::new(
            &r.name,
            r.dependencies.clone(),
            direction,
            r.amount,
        ));
    }

    // A work nobody can perform only dead-ends the seeder; say so up front.
    let mut all_works: BTreeSet<&String> = BTreeSet::new();
    for r in &config.recipes {
        for (work, parents) in &r.dependencies {
            all_works.insert(work);
            all_works.extend(parents.iter());
        }
    }
    for work in all_works {
        if !config.modules.iter().any(|m| m.work.contains_key(work)) {
            warn!("no module can perform work type '{}'", work);
        }
    }

    Ok(Plant::new(universe, recipes))
}
