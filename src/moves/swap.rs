// src/moves/swap.rs

//! Swap: try different modules for the same active-work assignment.
//!
//! Internal swaps exchange the positions of two placed modules with
//! identical, non-empty active works. External swaps replace a placed
//! module with a free one whose capabilities cover its active works, the
//! replacement inheriting position and assignment. Transports take part in
//! neither.

use std::collections::{BTreeSet, HashMap};

use super::{dedup, restored_frontier};
use crate::error::Result;
use crate::module::ModuleId;
use crate::plant::{ActiveWorks, Plant};

/// Generate all single-swap neighbors of the frontier.
pub fn swap_neighbours(
    plant: &mut Plant,
    frontier: &str,
    active: &ActiveWorks,
) -> Result<Vec<String>> {
    let frontier = restored_frontier(plant, frontier, active)?;
    let placed = plant.placed_work_modules();
    let free = plant.free_work_modules();
    let actives: HashMap<ModuleId, BTreeSet<String>> = placed
        .iter()
        .map(|&m| {
            (
                m,
                plant
                    .grid()
                    .state(m)
                    .map(|s| s.active_works.clone())
                    .unwrap_or_default(),
            )
        })
        .collect();

    let mut neighbours = Vec::new();

    // External: a free module with a covering capability set takes over.
    for &old in &placed {
        let works = &actives[&old];
        if works.is_empty() {
            continue;
        }
        for &new in &free {
            if plant.universe().get(new).can_cover(works) {
                neighbours.push(swap_candidate(plant, &frontier, old, new)?);
            }
        }
    }

    // Internal: two placed modules with the same assignment trade places.
    for &m0 in &placed {
        let works = &actives[&m0];
        if works.is_empty() {
            continue;
        }
        for &m1 in &placed {
            if m1 != m0 && !actives[&m1].is_empty() && actives[&m1] == *works {
                neighbours.push(swap_candidate(plant, &frontier, m1, m0)?);
            }
        }
    }

    Ok(dedup(neighbours))
}

fn swap_candidate(plant: &mut Plant, frontier: &str, a: ModuleId, b: ModuleId) -> Result<String> {
    plant.decode(frontier)?;
    plant.swap_modules(a, b);
    plant.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Direction;
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

    fn build_plant(specs: &[(&str, &[&str])]) -> Plant {
        let mut universe = Universe::new(transport_proto());
        for (id, works) in specs {
            universe.register(module(id, works)).unwrap();
        }
        let recipe = Recipe::new(
            "r",
            BTreeMap::from([("a".to_string(), BTreeSet::new())]),
            Direction::Up,
            1,
        );
        Plant::new(universe, vec![recipe])
    }

    fn lay_line(plant: &mut Plant, ids: &[&str], actives: &[&str]) -> Vec<ModuleId> {
        let mods: Vec<ModuleId> = ids
            .iter()
            .map(|id| plant.universe().lookup(id).unwrap())
            .collect();
        for w in mods.windows(2) {
            plant.grid_mut().set_link(w[0], Direction::Right, Some(w[1]));
        }
        if mods.len() == 1 {
            plant.grid_mut().place(mods[0]);
        }
        for (&m, &w) in mods.iter().zip(actives.iter()) {
            if !w.is_empty() {
                plant
                    .grid_mut()
                    .state_mut(m)
                    .active_works
                    .insert(w.to_string());
            }
        }
        plant.set_main_line(mods.clone());
        plant.set_start("r", mods[0], Direction::Up);
        mods
    }

    #[test]
    fn test_internal_swap_exchanges_equal_assignments() {
        let mut plant = build_plant(&[("m0", &["a"]), ("m1", &["a", "b"]), ("m2", &["a"])]);
        let mods = lay_line(&mut plant, &["m0", "m1", "m2"], &["a", "b", "a"]);
        let frontier = plant.encode().unwrap();

        let neighbours = swap_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        // m0 and m2 share {a}; both orders collapse to the same layout... or
        // rather to two strings that decode to mirrored lines.
        assert!(!neighbours.is_empty());

        for n in &neighbours {
            plant.decode(n).unwrap();
            plant.grid().check_link_invariant().unwrap();
            // The per-position assignment is unchanged: the line still runs
            // a, b, a.
            let line = plant.main_line().to_vec();
            let works: Vec<String> = line
                .iter()
                .map(|&m| {
                    plant
                        .grid()
                        .state(m)
                        .unwrap()
                        .active_works
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect();
            assert_eq!(works, vec!["a", "b", "a"]);
        }
        let _ = mods;
    }

    #[test]
    fn test_no_internal_swaps_for_distinct_assignments() {
        let mut plant = build_plant(&[("m_a", &["a"]), ("m_b", &["b"])]);
        lay_line(&mut plant, &["m_a", "m_b"], &["a", "b"]);
        let frontier = plant.encode().unwrap();

        let neighbours = swap_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        assert!(neighbours.is_empty());
    }

    #[test]
    fn test_external_swap_replaces_with_covering_module() {
        let mut plant = build_plant(&[("m0", &["a"]), ("m1", &["b"]), ("m2", &["a", "b", "c"])]);
        lay_line(&mut plant, &["m0", "m1"], &["a", "b"]);
        let frontier = plant.encode().unwrap();

        let neighbours = swap_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        // m2 covers both placed assignments: one candidate per replacement.
        assert_eq!(neighbours.len(), 2);

        let m2 = plant.universe().lookup("m2").unwrap();
        let mut replaced = Vec::new();
        for n in &neighbours {
            plant.decode(n).unwrap();
            plant.grid().check_link_invariant().unwrap();
            assert!(plant.main_line().contains(&m2));
            assert_eq!(plant.main_line().len(), 2);
            let works = plant.grid().state(m2).unwrap().active_works.clone();
            replaced.push(works.into_iter().collect::<Vec<_>>().join(","));
        }
        replaced.sort();
        assert_eq!(replaced, vec!["a", "b"]);
    }

    #[test]
    fn test_external_swap_keeps_start_anchors() {
        let mut plant = build_plant(&[("m0", &["a"]), ("m1", &["a"])]);
        lay_line(&mut plant, &["m0"], &["a"]);
        let frontier = plant.encode().unwrap();

        let neighbours = swap_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        assert_eq!(neighbours.len(), 1);
        plant.decode(&neighbours[0]).unwrap();
        let m1 = plant.universe().lookup("m1").unwrap();
        assert_eq!(plant.start_of("r"), Some((m1, Direction::Up)));
        assert_eq!(plant.main_line(), &[m1]);
    }

    #[test]
    fn test_transports_never_swap() {
        let mut plant = build_plant(&[("m0", &["a"])]);
        let mods = lay_line(&mut plant, &["m0"], &["a"]);
        // A placed transport to the right of m0 and a pooled free one.
        let t = plant.take_transport();
        plant.grid_mut().set_link(mods[0], Direction::Right, Some(t));
        let mut main = plant.main_line().to_vec();
        main.push(t);
        plant.set_main_line(main);
        let t_free = plant.take_transport();
        plant.free_transport(t_free);
        let frontier = plant.encode().unwrap();

        let neighbours = swap_neighbours(&mut plant, &frontier, &ActiveWorks::new()).unwrap();
        assert!(neighbours.is_empty());
    }
}
