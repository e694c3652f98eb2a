// src/moves/parallelize.rs

//! Parallelize: clone a consecutive slice of a line onto a fresh row so two
//! product instances can be processed at once.
//!
//! For every line and every split point, every combination of free work
//! modules that can cover the active works of the slice starting there is a
//! candidate path. Each path is wrapped in a pair of connector transports
//! and inserted with [`push_underneath`]; main-line slices try both sides,
//! branch lines only grow away from the main line.

use std::collections::BTreeSet;

use super::{dedup, restored_frontier};
use crate::error::{Error, Result};
use crate::grid::Direction;
use crate::module::ModuleId;
use crate::placer::push_underneath;
use crate::plant::{ActiveWorks, Plant};

type SliceArgs = (ModuleId, Vec<ModuleId>, ModuleId);

/// Generate all parallelized neighbors of the frontier.
pub fn parallelize_neighbours(
    plant: &mut Plant,
    frontier: &str,
    active: &ActiveWorks,
) -> Result<Vec<String>> {
    let frontier = restored_frontier(plant, frontier, active)?;
    let (main_line, up_lines, down_lines) = plant.find_lines()?;
    let free = plant.free_work_modules();

    // Argument collection reads the frontier state, so it has to finish
    // before any candidate is materialized.
    let mut jobs: Vec<(SliceArgs, Direction)> = Vec::new();
    for args in slice_args(plant, &main_line, &free) {
        jobs.push((args.clone(), Direction::Up));
        jobs.push((args, Direction::Down));
    }
    for line in &up_lines {
        for args in slice_args(plant, line, &free) {
            jobs.push((args, Direction::Up));
        }
    }
    for line in &down_lines {
        for args in slice_args(plant, line, &free) {
            jobs.push((args, Direction::Down));
        }
    }

    let mut neighbours = Vec::new();
    for (args, direction) in jobs {
        neighbours.push(parallel_config(plant, &frontier, &args, direction)?);
    }
    Ok(dedup(neighbours))
}

/// Enumerate `(start, path, end)` arguments for one line: at every split
/// point, every free-module combination covering a strict prefix of the
/// remaining line, anchored between the module left of the split and the
/// module right of the covered slice.
fn slice_args(plant: &Plant, line: &[ModuleId], free: &[ModuleId]) -> Vec<SliceArgs> {
    let mut args = Vec::new();
    for (split, &m) in line.iter().enumerate() {
        let Some(start) = plant.grid().back(m, Direction::Left) else {
            continue;
        };
        let works = plant
            .grid()
            .state(m)
            .map(|s| s.active_works.clone())
            .unwrap_or_default();
        let capable = capable_modules(plant, &works, free);
        let rest = plant.grid().traverse(m, Direction::Right, None).len();
        for path in cover_paths(plant, capable, &line[split + 1..], free) {
            if rest > path.len() {
                let end = *plant
                    .grid()
                    .traverse_steps(m, Direction::Right, path.len())
                    .last()
                    .unwrap();
                args.push((start, path, end));
            }
        }
    }
    args
}

/// All paths of free modules covering a prefix of `rest`, starting with one
/// of `capable`. The cartesian combination over the slice, longest first
/// within a head choice.
fn cover_paths(
    plant: &Plant,
    capable: Vec<ModuleId>,
    rest: &[ModuleId],
    free: &[ModuleId],
) -> Vec<Vec<ModuleId>> {
    let mut result = Vec::new();
    for &c in &capable {
        let remaining_free: Vec<ModuleId> = free.iter().copied().filter(|&x| x != c).collect();
        let mut tails = Vec::new();
        if let Some(&next) = rest.first() {
            let works = plant
                .grid()
                .state(next)
                .map(|s| s.active_works.clone())
                .unwrap_or_default();
            let next_capable = capable_modules(plant, &works, &remaining_free);
            tails = cover_paths(plant, next_capable, &rest[1..], &remaining_free);
        }
        for tail in tails {
            let mut path = vec![c];
            path.extend(tail);
            result.push(path);
        }
        result.push(vec![c]);
    }
    result
}

/// The modules in `pool` whose capabilities cover every work in `works`.
/// An empty work set matches nothing.
fn capable_modules(plant: &Plant, works: &BTreeSet<String>, pool: &[ModuleId]) -> Vec<ModuleId> {
    if works.is_empty() {
        return Vec::new();
    }
    pool.iter()
        .copied()
        .filter(|&m| plant.universe().get(m).can_cover(works))
        .collect()
}

/// Materialize one candidate: decode the frontier, copy the slice's active
/// works onto the path, and push it in as a transport-wrapped branch.
fn parallel_config(
    plant: &mut Plant,
    frontier: &str,
    (start, path, end): &SliceArgs,
    direction: Direction,
) -> Result<String> {
    plant.decode(frontier)?;

    let slice = plant.grid().traverse(*start, Direction::Right, Some(*end));
    let inner = &slice[1..slice.len().saturating_sub(1)];
    if inner.len() != path.len() {
        return Err(Error::MissingActiveWork(format!(
            "slice after {} no longer matches its clone path",
            plant.universe().get(*start).id()
        )));
    }
    for (i, &original) in inner.iter().enumerate() {
        let works = plant.grid().state(original).unwrap().active_works.clone();
        plant.grid_mut().place(path[i]);
        plant.grid_mut().state_mut(path[i]).active_works = works;
    }

    let t0 = plant.take_transport();
    let t1 = plant.take_transport();
    let mut expanded = vec![t0];
    expanded.extend(path.iter().copied());
    expanded.push(t1);

    push_underneath(plant, *start, &expanded, *end, direction)?;
    let config = plant.encode()?;

    plant.free_transport(t0);
    plant.free_transport(t1);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, Universe};
    use crate::recipe::Recipe;
    use std::collections::BTreeMap;

    fn module(id: &str, works: &[&str]) -> Module {
        let work_times = works.iter().map(|w| (w.to_string(), 5)).collect();
        Module::new(id, work_times, [[1; 4]; 4], 1, false)
    }

    fn transport_proto() -> Module {
        Module::new("transport", BTreeMap::new(), [[1; 4]; 4], 1, true)
    }

    /// Main line m0 -> m1 -> m2, each with a distinct active work, plus one
    /// free module capable of m1's work.
    fn plant_with_spare() -> (Plant, Vec<ModuleId>, ModuleId) {
        let mut universe = Universe::new(transport_proto());
        let m0 = universe.register(module("m0", &["a"])).unwrap();
        let m1 = universe.register(module("m1", &["b"])).unwrap();
        let m2 = universe.register(module("m2", &["c"])).unwrap();
        let spare = universe.register(module("m3", &["b"])).unwrap();
        let recipe = Recipe::new(
            "r",
            [
                ("a".to_string(), BTreeSet::new()),
                ("b".to_string(), ["a".to_string()].into_iter().collect()),
                ("c".to_string(), ["b".to_string()].into_iter().collect()),
            ]
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
            Direction::Up,
            2,
        );
        let mut plant = Plant::new(universe, vec![recipe]);
        let mods = vec![m0, m1, m2];
        for w in mods.windows(2) {
            plant.grid_mut().set_link(w[0], Direction::Right, Some(w[1]));
        }
        for (&m, w) in mods.iter().zip(["a", "b", "c"]) {
            plant
                .grid_mut()
                .state_mut(m)
                .active_works
                .insert(w.to_string());
        }
        plant.set_main_line(mods.clone());
        plant.set_start("r", m0, Direction::Up);
        (plant, mods, spare)
    }

    #[test]
    fn test_parallelize_duplicates_the_coverable_slice() {
        let (mut plant, mods, spare) = plant_with_spare();
        let frontier = plant.encode().unwrap();
        let active = ActiveWorks::new();

        let neighbours = parallelize_neighbours(&mut plant, &frontier, &active).unwrap();
        // One coverable slice ([m1]), two directions.
        assert_eq!(neighbours.len(), 2);

        for n in &neighbours {
            plant.decode(n).unwrap();
            plant.grid().check_link_invariant().unwrap();
            plant.grid().make_grid(mods[0]).unwrap();
            // The clone carries the slice's active work and sits between
            // two transport connectors hanging off m0 and m2.
            assert!(plant
                .grid()
                .state(spare)
                .unwrap()
                .active_works
                .contains("b"));
            assert!(plant.grid().state(mods[0]).unwrap().is_start);
            assert!(plant.grid().state(mods[2]).unwrap().is_end);
            assert!(plant.grid().state(mods[1]).unwrap().shadowed);
        }

        // One candidate goes up, the other down.
        plant.decode(&neighbours[0]).unwrap();
        let above = plant.grid().link(mods[0], Direction::Up).is_some();
        plant.decode(&neighbours[1]).unwrap();
        let below = plant.grid().link(mods[0], Direction::Down).is_some();
        assert!(above && below);
    }

    #[test]
    fn test_inserted_path_is_strictly_shorter_than_the_line() {
        let (mut plant, _, _) = plant_with_spare();
        let frontier = plant.encode().unwrap();
        let neighbours =
            parallelize_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        let line_len = 3;
        for n in &neighbours {
            let placed = plant.modules_in_config(n).unwrap();
            // Clone path plus two connectors, on top of the original layout.
            assert!(placed.len() <= line_len + (line_len - 1) + 2);
        }
    }

    #[test]
    fn test_no_capable_free_module_yields_nothing() {
        let (mut plant, _, _) = plant_with_spare();
        // Claim the spare by placing it on the line's far end.
        let spare = plant.universe().lookup("m3").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();
        plant.grid_mut().set_link(m2, Direction::Right, Some(spare));
        let mut main = plant.main_line().to_vec();
        main.push(spare);
        plant.set_main_line(main);
        let frontier = plant.encode().unwrap();

        let neighbours =
            parallelize_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        assert!(neighbours.is_empty());
    }

    #[test]
    fn test_transport_connectors_return_to_pool() {
        let (mut plant, _, _) = plant_with_spare();
        let frontier = plant.encode().unwrap();
        let neighbours =
            parallelize_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        assert!(!neighbours.is_empty());
        // The connectors used while generating candidates are free again:
        // taking one reuses a pooled transport instead of minting.
        let minted = plant.universe().len();
        let t = plant.take_transport();
        assert!(plant.universe().get(t).is_transport());
        assert_eq!(plant.universe().len(), minted);
    }
}
