// src/search.rs

//! The tabu-style layout search.
//!
//! The controller keeps a frontier layout string and, each iteration, picks
//! one of the three move operators by weighted choice, scores the operator's
//! candidates through the oracle (memoized on the canonical layout string),
//! and advances to the best candidate not held in short-term memory. The
//! operator weights start fully on anti-serialize and drift toward
//! parallelize and then swap on a fixed schedule, so early iterations
//! restructure the line and later ones refine module choice.
//!
//! Failures follow a fixed policy: decode and embedding errors abort (they
//! are bugs), oracle failures skip the single neighbor, and operator
//! failures or an all-tabu neighborhood restore a random long-term memory
//! checkpoint.

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::grid::position_conflicts;
use crate::module::ModuleId;
use crate::moves::{anti_serialize_neighbours, parallelize_neighbours, swap_neighbours};
use crate::plant::{ActiveWorks, Plant};
use crate::seed::SeedGenerator;

/// Initial weight of the anti-serialize operator.
pub const WEIGHT_START: u32 = 200;
/// Global multiplier on the weight drift.
pub const WEIGHT_STRENGTH: u32 = 1;
/// Units moved from anti-serialize to parallelize after each pick.
pub const WEIGHT_X: u32 = 3;
/// Units moved from parallelize to swap after each pick.
pub const WEIGHT_Y: u32 = 1;

/// The three neighbor generators, in weight order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    AntiSerialize,
    Parallelize,
    Swap,
}

/// What the oracle reports for one layout.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Total time to complete all recipes on the layout.
    pub makespan: u64,
    /// Per module, the recipes it performed work for.
    pub worked: ActiveWorks,
    /// Per module, the recipes transported through it.
    pub transported: ActiveWorks,
    /// Per module, the work types it actually ran.
    pub active: ActiveWorks,
}

/// The makespan oracle: scores a decoded layout.
///
/// The plant is decoded to the layout under evaluation when called;
/// `placed` lists its modules in layout-string order.
pub trait Oracle {
    fn best_time(&mut self, plant: &Plant, placed: &[ModuleId]) -> Result<Verdict>;
}

/// Tuning knobs of the search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of search iterations.
    pub iters: usize,
    /// Capacity of the short-term tabu memory.
    pub short_term_size: usize,
    /// How many seed layouts to draw from the generator.
    pub max_initial_configs: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            iters: 50,
            short_term_size: 10,
            max_initial_configs: 10,
        }
    }
}

struct SearchState {
    config_fitness: HashMap<String, u64>,
    config_active: HashMap<String, ActiveWorks>,
    short_term: VecDeque<String>,
    long_term: Vec<(String, [u32; 3])>,
    initial: Vec<(String, [u32; 3])>,
    weights: [u32; 3],
}

impl SearchState {
    fn new() -> Self {
        Self {
            config_fitness: HashMap::new(),
            config_active: HashMap::new(),
            short_term: VecDeque::new(),
            long_term: Vec::new(),
            initial: Vec::new(),
            weights: [WEIGHT_START, 0, 0],
        }
    }

    /// Score a layout, memoized on its canonical string.
    fn evaluate<O: Oracle>(
        &mut self,
        plant: &mut Plant,
        oracle: &mut O,
        config: &str,
    ) -> Result<u64> {
        if let Some(&fitness) = self.config_fitness.get(config) {
            return Ok(fitness);
        }
        debug!("evaluating {}", config);
        plant.decode(config)?;
        let placed = plant.modules_in_config(config)?;

        // A conflicted embedding must never reach the oracle.
        let positions = plant.grid().make_grid(placed[0])?;
        if let Some((pos, mods)) = position_conflicts(&positions).first() {
            return Err(Error::GridError(format!(
                "{} modules share position {:?}",
                mods.len(),
                pos
            )));
        }

        let verdict = oracle.best_time(plant, &placed)?;
        self.config_fitness
            .insert(config.to_string(), verdict.makespan);
        self.config_active.insert(config.to_string(), verdict.active);
        Ok(verdict.makespan)
    }

    /// Weighted operator choice, then the deterministic weight drift.
    fn pick_move<R: Rng>(&mut self, rng: &mut R) -> MoveKind {
        let kinds = [MoveKind::AntiSerialize, MoveKind::Parallelize, MoveKind::Swap];
        let picked = kinds[weighted_choice(&self.weights, rng)];

        let w = &mut self.weights;
        let x = WEIGHT_X * WEIGHT_STRENGTH;
        if w[0] < x {
            w[1] += w[0];
            w[0] = 0;
        } else {
            w[1] += x;
            w[0] -= x;
        }
        let y = WEIGHT_Y * WEIGHT_STRENGTH;
        if w[1] < y {
            w[2] += w[1];
            w[1] = 0;
        } else {
            w[2] += y;
            w[1] -= y;
        }
        picked
    }

    /// Record an accepted frontier in short-term memory, evicting the oldest
    /// entry once the memory has overflowed its nominal size.
    fn push_short_term(&mut self, config: String, size: usize) {
        if self.short_term.len() > size {
            self.short_term.pop_front();
        }
        self.short_term.push_back(config);
    }

    /// Restore a random long-term checkpoint, or a random seed when the
    /// long-term memory has been exhausted.
    fn backtrack<R: Rng>(&mut self, rng: &mut R) -> (String, [u32; 3]) {
        if !self.long_term.is_empty() {
            let i = rng.gen_range(0..self.long_term.len());
            self.long_term.swap_remove(i)
        } else {
            let i = rng.gen_range(0..self.initial.len());
            self.initial[i].clone()
        }
    }
}

/// Run the tabu search and return every layout achieving the best makespan
/// seen, with that makespan.
pub fn tabu_search<O: Oracle, R: Rng>(
    plant: &mut Plant,
    oracle: &mut O,
    config: &SearchConfig,
    rng: &mut R,
) -> Result<Vec<(String, u64)>> {
    let mut state = SearchState::new();

    let seeds: Vec<String> = {
        let generator = SeedGenerator::new(plant, rng);
        generator.take(config.max_initial_configs).collect()
    };
    info!("seed generator produced {} layout(s)", seeds.len());

    for seed in seeds {
        match state.evaluate(plant, oracle, &seed) {
            Ok(fitness) => {
                debug!("seed makespan {}: {}", fitness, seed);
                state.long_term.push((seed, state.weights));
            }
            Err(e) if e.is_skip() => warn!("seed rejected by oracle: {}", e),
            Err(e) => return Err(e),
        }
    }

    if state.long_term.is_empty() {
        return Err(Error::SeedError(
            "no viable initial layout; nothing to search from".to_string(),
        ));
    }

    state
        .long_term
        .sort_by_key(|(config, _)| state.config_fitness[config]);
    state.initial = state.long_term.clone();
    let mut frontier = state.long_term[0].0.clone();

    for iter in 0..config.iters {
        let kind = state.pick_move(rng);
        info!("iteration {}: {:?}", iter, kind);

        let Some(active) = state.config_active.get(&frontier).cloned() else {
            warn!("no active-work record for frontier; backtracking");
            let (f, w) = state.backtrack(rng);
            frontier = f;
            state.weights = w;
            continue;
        };

        let neighbours = match generate(plant, kind, &frontier, &active, rng) {
            Ok(n) => n,
            Err(e) if e.is_backtrack() => {
                warn!("operator failed ({}); backtracking", e);
                let (f, w) = state.backtrack(rng);
                frontier = f;
                state.weights = w;
                continue;
            }
            Err(e) => return Err(e),
        };
        info!("{} neighbour(s) to evaluate", neighbours.len());

        let mut results: Vec<(String, u64)> = Vec::new();
        for neighbour in neighbours {
            match state.evaluate(plant, oracle, &neighbour) {
                Ok(fitness) => results.push((neighbour, fitness)),
                Err(e) if e.is_skip() => {
                    warn!("neighbour skipped: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        results.sort_by_key(|(_, fitness)| *fitness);
        let accepted = results
            .iter()
            .find(|(candidate, _)| !state.short_term.contains(candidate));

        match accepted {
            Some((candidate, fitness)) => {
                frontier = candidate.clone();
                info!("iteration {}: frontier makespan {}", iter, fitness);
                state.push_short_term(frontier.clone(), config.short_term_size);
                state.long_term.push((frontier.clone(), state.weights));
            }
            None => {
                let (f, w) = state.backtrack(rng);
                frontier = f;
                state.weights = w;
                info!("iteration {}: all neighbours tabu, backtracked", iter);
            }
        }
    }

    info!("{} configuration(s) evaluated", state.config_fitness.len());
    let best = state
        .config_fitness
        .values()
        .copied()
        .min()
        .expect("at least one seed was evaluated");
    let mut result: Vec<(String, u64)> = state
        .config_fitness
        .into_iter()
        .filter(|&(_, fitness)| fitness == best)
        .collect();
    result.sort();
    Ok(result)
}

fn generate<R: Rng>(
    plant: &mut Plant,
    kind: MoveKind,
    frontier: &str,
    active: &ActiveWorks,
    rng: &mut R,
) -> Result<Vec<String>> {
    match kind {
        MoveKind::AntiSerialize => anti_serialize_neighbours(plant, frontier, active, rng),
        MoveKind::Parallelize => parallelize_neighbours(plant, frontier, active),
        MoveKind::Swap => swap_neighbours(plant, frontier, active),
    }
}

/// Cumulative-weight sampling: pick the first index whose cumulative weight
/// exceeds a uniform draw over the total.
fn weighted_choice<R: Rng>(weights: &[u32; 3], rng: &mut R) -> usize {
    let total: u32 = weights.iter().sum();
    if total == 0 {
        return 0;
    }
    let x = rng.gen_range(0.0..total as f64);
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w as f64;
        if x < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
