// src/seed.rs

//! Lazy generation of linear seed layouts.
//!
//! The seeder walks the composed recipe graph: it keeps a prefix of modules
//! laid left-to-right on the main line and greedily lets the last module
//! consume every parent-less work it can perform, recording active works and
//! recipe start modules as it goes. When the last module can consume nothing
//! more, each remaining parent-less work is tried against every capable free
//! module, in randomized order, and the search branches.
//!
//! The generator is lazy and in principle unbounded; the controller takes
//! only the first few yields. Branches with a cyclic dependency graph or a
//! work type no free module can perform dead-end silently.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::grid::Direction;
use crate::module::ModuleId;
use crate::plant::Plant;
use crate::recipe::{compose_recipes, WorkGraph};

/// One branch of the seed search: the remaining graph plus the prefix built
/// so far.
#[derive(Debug, Clone)]
struct Frame {
    graph: WorkGraph,
    free: Vec<ModuleId>,
    setup: Vec<ModuleId>,
    starters: HashMap<String, ModuleId>,
    actives: HashMap<ModuleId, std::collections::BTreeSet<String>>,
}

/// Iterator over linear seed layout strings.
pub struct SeedGenerator<'a, R: Rng> {
    plant: &'a mut Plant,
    rng: &'a mut R,
    stack: Vec<Frame>,
}

impl<'a, R: Rng> SeedGenerator<'a, R> {
    /// Set up the generator over the plant's recipes and free work modules.
    pub fn new(plant: &'a mut Plant, rng: &'a mut R) -> Self {
        let mut stack = Vec::new();
        if !plant.recipes().is_empty() {
            let graph = compose_recipes(plant.recipes());
            if graph.has_cycle() {
                debug!("recipe graph has a cycle; no seeds will be generated");
            } else {
                stack.push(Frame {
                    graph,
                    free: plant.universe().work_module_ids().collect(),
                    setup: Vec::new(),
                    starters: HashMap::new(),
                    actives: HashMap::new(),
                });
            }
        }
        Self { plant, rng, stack }
    }

    /// Let the last placed module consume every top node it can perform.
    fn consume(&self, frame: &mut Frame) {
        let current = *frame.setup.last().unwrap();
        let mut again = true;
        while again {
            again = false;
            for (work, starts) in frame.graph.top_nodes() {
                if self.plant.universe().get(current).can_perform(&work) {
                    again = true;
                    frame.graph.remove_node(&work);
                    for recipe in starts {
                        frame.starters.entry(recipe).or_insert(current);
                    }
                    frame.actives.entry(current).or_default().insert(work);
                }
            }
        }
    }

    /// Build and encode the layout a finished frame describes.
    fn emit(&mut self, frame: &Frame) -> Result<String> {
        self.plant.reset();
        for w in frame.setup.windows(2) {
            self.plant
                .grid_mut()
                .set_link(w[0], Direction::Right, Some(w[1]));
        }
        if frame.setup.len() == 1 {
            self.plant.grid_mut().place(frame.setup[0]);
        }
        for &m in &frame.setup {
            let works = frame.actives.get(&m).cloned().unwrap_or_default();
            self.plant.grid_mut().state_mut(m).active_works = works;
        }

        let recipes: Vec<(String, Direction)> = self
            .plant
            .recipes()
            .iter()
            .map(|r| (r.name().to_string(), r.start_direction()))
            .collect();
        for (name, direction) in recipes {
            let starter = frame.starters.get(&name).copied().ok_or_else(|| {
                Error::SeedError(format!("recipe '{}' has no start module", name))
            })?;
            self.plant.set_start(&name, starter, direction);
        }

        self.plant.set_main_line(frame.setup.clone());
        self.plant.encode()
    }
}

impl<R: Rng> Iterator for SeedGenerator<'_, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(mut frame) = self.stack.pop() {
            if !frame.setup.is_empty() {
                self.consume(&mut frame);
            }

            if frame.graph.is_empty() {
                match self.emit(&frame) {
                    Ok(config) => return Some(config),
                    Err(e) => {
                        debug!("discarding seed branch: {}", e);
                        continue;
                    }
                }
            }

            // Branch: every capable free module, per remaining top work.
            let mut children = Vec::new();
            for (work, _) in frame.graph.top_nodes() {
                let mut capable: Vec<ModuleId> = frame
                    .free
                    .iter()
                    .copied()
                    .filter(|&m| self.plant.universe().get(m).can_perform(&work))
                    .collect();
                capable.shuffle(self.rng);
                for m in capable {
                    let mut child = frame.clone();
                    child.free.retain(|&x| x != m);
                    child.setup.push(m);
                    children.push(child);
                }
            }
            for child in children.into_iter().rev() {
                self.stack.push(child);
            }
        }
        None
    }
}
