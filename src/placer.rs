// src/placer.rs

//! Path placement primitives.
//!
//! Both primitives insert a horizontal path as a branch of an existing line:
//!
//! - [`push_underneath`] makes room by pushing every line in the way one row
//!   further out, cascading, then repairs the stretched vertical links with
//!   transport columns.
//! - [`push_around`] leaves the existing lines alone: it probes up and down
//!   for the nearest free rows, picks the shorter side, and routes the path
//!   there through vertical branch-out/branch-in transport columns.
//!
//! Positions are computed once per placement from the link structure; the
//! placers work on that local map and only write links back through the
//! grid's setters.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::grid::{Direction, Grid, Pos};
use crate::module::ModuleId;
use crate::plant::Plant;

/// Upper bound on eviction cascade depth in [`push_underneath`].
pub const MAX_CASCADE_DEPTH: usize = 64;

/// Chain a sequence of modules together in one direction.
pub fn connect_chain(grid: &mut Grid, mods: &[ModuleId], dir: Direction) {
    for i in 0..mods.len().saturating_sub(1) {
        grid.set_link(mods[i], dir, Some(mods[i + 1]));
    }
}

/// Build a vertical run of `steps` modules out from `initial`, reusing any
/// module already sitting on a visited cell and minting transports for the
/// empty ones. Minted transports are entered into the position maps.
fn vertical_sequence(
    plant: &mut Plant,
    initial: ModuleId,
    steps: i64,
    positions: &mut HashMap<ModuleId, Pos>,
    inverted: &mut HashMap<Pos, ModuleId>,
    dir: Direction,
) -> Vec<ModuleId> {
    let dy = dir.delta().1;
    let mut sequence = vec![initial];
    let mut current = initial;
    for _ in 0..steps {
        let (x, y) = positions[&current];
        let next_pos = (x, y + dy);
        let next = match inverted.get(&next_pos) {
            Some(&m) => m,
            None => {
                let t = plant.take_transport();
                positions.insert(t, next_pos);
                inverted.insert(next_pos, t);
                t
            }
        };
        sequence.push(next);
        current = next;
    }
    sequence
}

/// Move a horizontal line one row in `dir`, recursively evicting every line
/// it lands on.
fn move_line(
    grid: &Grid,
    line: &[ModuleId],
    positions: &mut HashMap<ModuleId, Pos>,
    dir: Direction,
    depth: usize,
) -> Result<()> {
    if depth > MAX_CASCADE_DEPTH {
        return Err(Error::CascadeError(depth));
    }
    let dy = dir.delta().1;

    let mut conflicts = Vec::new();
    for &m in line {
        let (x, y) = positions[&m];
        let new_pos = (x, y + dy);
        let conflict = positions
            .iter()
            .find(|(&k, &v)| v == new_pos && k != m)
            .map(|(&k, _)| k);
        positions.insert(m, new_pos);
        if let Some(c) = conflict {
            conflicts.push(c);
        }
    }

    let mut conflict_lines: Vec<Vec<ModuleId>> = Vec::new();
    for c in conflicts {
        if !conflict_lines.iter().any(|l| l.contains(&c)) {
            conflict_lines.push(grid.line_of(c));
        }
    }
    for l in conflict_lines {
        move_line(grid, &l, positions, dir, depth + 1)?;
    }
    Ok(())
}

/// Fill the vertical gap between `m` and its linked neighbor in `dir` with
/// transports so every vertical link spans exactly one row again.
fn reconnect(
    plant: &mut Plant,
    m: ModuleId,
    neighbor: ModuleId,
    positions: &mut HashMap<ModuleId, Pos>,
    inverted: &mut HashMap<Pos, ModuleId>,
    dir: Direction,
) {
    let length = (positions[&m].1 - positions[&neighbor].1).abs();
    if length > 1 {
        let mut sequence = vertical_sequence(plant, m, length - 1, positions, inverted, dir);
        sequence.push(neighbor);
        connect_chain(plant.grid_mut(), &sequence, dir);
    }
}

/// Insert `path` as a parallel branch from `start` to `end`, pushed one row
/// in `dir` (up or down) from the line they sit on.
///
/// Lines in the way are evicted one row further, cascading; vertical links
/// stretched by the eviction are repaired with transport columns. The slice
/// between `start` and `end` ends up shadowed by the new branch.
pub fn push_underneath(
    plant: &mut Plant,
    start: ModuleId,
    path: &[ModuleId],
    end: ModuleId,
    dir: Direction,
) -> Result<()> {
    let root = *plant
        .main_line()
        .first()
        .ok_or_else(|| Error::GridError("layout has no main line".to_string()))?;
    let mut positions = plant.grid().make_grid(root)?;

    // Lay the path down on start's row; the eviction pass makes room for it.
    connect_chain(plant.grid_mut(), path, Direction::Right);
    let mut pos = *positions
        .get(&start)
        .ok_or_else(|| Error::GridError("branch start is not on the grid".to_string()))?;
    for &m in path {
        positions.insert(m, pos);
        pos = (pos.0 + 1, pos.1);
    }

    move_line(plant.grid(), path, &mut positions, dir, 0)?;

    let mut inverted: HashMap<Pos, ModuleId> =
        positions.iter().map(|(&m, &p)| (p, m)).collect();

    // Repair every vertical link stretched by the eviction.
    let mut snapshot: Vec<ModuleId> = positions.keys().copied().collect();
    snapshot.sort();
    for m in snapshot {
        if let Some(n) = plant.grid().link(m, Direction::Up) {
            reconnect(plant, m, n, &mut positions, &mut inverted, Direction::Up);
        }
        if let Some(n) = plant.grid().link(m, Direction::Down) {
            reconnect(plant, m, n, &mut positions, &mut inverted, Direction::Down);
        }
    }

    plant.grid_mut().set_link(start, dir, Some(path[0]));
    plant
        .grid_mut()
        .set_link(*path.last().unwrap(), dir.opposite(), Some(end));

    plant.grid_mut().state_mut(start).is_start = true;
    plant.grid_mut().state_mut(end).is_end = true;
    let slice = plant.grid().traverse(start, Direction::Right, Some(end));
    for &m in &slice[1..slice.len().saturating_sub(1)] {
        plant.grid_mut().state_mut(m).shadowed = true;
    }
    Ok(())
}

/// How many rows in `dir` still hold modules directly beyond the shadow.
fn push_length(
    positions: &HashMap<ModuleId, Pos>,
    inverted: &HashMap<Pos, ModuleId>,
    shadow: &[ModuleId],
    dir: Direction,
) -> i64 {
    let dy = dir.delta().1;
    let mut cells: Vec<Pos> = shadow.iter().map(|m| positions[m]).collect();
    let mut counter = 0;
    loop {
        cells = cells
            .iter()
            .map(|&(x, y)| (x, y + dy))
            .filter(|p| inverted.contains_key(p))
            .collect();
        if cells.is_empty() {
            break;
        }
        counter += 1;
    }
    counter
}

/// Place `path` as a detour over `shadow` without moving any existing line.
///
/// Probes up and down from the shadow for the nearest free rows, places the
/// path on the shorter side (ties prefer up), and connects it through
/// vertical branch-out and branch-in columns. `start` or `end` may be absent
/// for branches that leave from or re-enter at a boundary of the line.
pub fn push_around(
    plant: &mut Plant,
    start: Option<ModuleId>,
    path: &[ModuleId],
    end: Option<ModuleId>,
    shadow: &[ModuleId],
) -> Result<()> {
    let root = *shadow
        .first()
        .ok_or_else(|| Error::GridError("branch shadow is empty".to_string()))?;
    let mut positions = plant.grid().make_grid(root)?;
    let mut inverted: HashMap<Pos, ModuleId> =
        positions.iter().map(|(&m, &p)| (p, m)).collect();

    let up_length = push_length(&positions, &inverted, shadow, Direction::Up);
    let down_length = push_length(&positions, &inverted, shadow, Direction::Down);
    let (length, dir) = if up_length <= down_length {
        (up_length, Direction::Up)
    } else {
        (down_length, Direction::Down)
    };

    connect_chain(plant.grid_mut(), path, Direction::Right);

    if let Some(start) = start {
        let mut out_branch =
            vertical_sequence(plant, start, length, &mut positions, &mut inverted, dir);
        out_branch.push(path[0]);
        connect_chain(plant.grid_mut(), &out_branch, dir);
    }

    if let Some(end) = end {
        let mut in_branch =
            vertical_sequence(plant, end, length, &mut positions, &mut inverted, dir);
        in_branch.push(*path.last().unwrap());
        in_branch.reverse();
        connect_chain(plant.grid_mut(), &in_branch, dir.opposite());
    }

    if let Some(start) = start {
        plant.grid_mut().state_mut(start).is_start = true;
    }
    if let Some(end) = end {
        plant.grid_mut().state_mut(end).is_end = true;
    }
    for &m in shadow {
        plant.grid_mut().state_mut(m).shadowed = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, Universe};
    use crate::recipe::Recipe;
    use std::collections::{BTreeMap, BTreeSet};

    fn module(id: &str, works: &[&str]) -> Module {
        let work_times = works.iter().map(|w| (w.to_string(), 5)).collect();
        Module::new(id, work_times, [[1; 4]; 4], 1, false)
    }

    fn transport_proto() -> Module {
        Module::new("transport", BTreeMap::new(), [[1; 4]; 4], 1, true)
    }

    /// A plant with `n` work modules m0..m(n-1) chained on the main line,
    /// plus spare modules registered under the given ids.
    fn line_plant(n: usize, spares: &[&str]) -> (Plant, Vec<ModuleId>, Vec<ModuleId>) {
        let mut universe = Universe::new(transport_proto());
        let mut mods = Vec::new();
        for i in 0..n {
            mods.push(
                universe
                    .register(module(&format!("m{}", i), &["w"]))
                    .unwrap(),
            );
        }
        let mut extras = Vec::new();
        for id in spares {
            extras.push(universe.register(module(id, &["w"])).unwrap());
        }
        let recipe = Recipe::new(
            "r",
            BTreeMap::from([("w".to_string(), BTreeSet::new())]),
            Direction::Up,
            1,
        );
        let mut plant = Plant::new(universe, vec![recipe]);
        for w in mods.windows(2) {
            plant.grid_mut().set_link(w[0], Direction::Right, Some(w[1]));
        }
        plant.set_main_line(mods.clone());
        plant.set_start("r", mods[0], Direction::Up);
        (plant, mods, extras)
    }

    #[test]
    fn test_push_around_attaches_detour_above() {
        let (mut plant, m, p) = line_plant(3, &["p0", "p1", "p2"]);
        push_around(&mut plant, Some(m[0]), &p, Some(m[2]), &m.clone()).unwrap();

        assert_eq!(plant.grid().link(m[0], Direction::Up), Some(p[0]));
        assert_eq!(plant.grid().link(p[0], Direction::Right), Some(p[1]));
        assert_eq!(plant.grid().link(p[2], Direction::Down), Some(m[2]));
        assert!(plant.grid().state(m[0]).unwrap().is_start);
        assert!(plant.grid().state(m[2]).unwrap().is_end);
        assert!(plant.grid().state(m[1]).unwrap().shadowed);
        plant.grid().check_link_invariant().unwrap();
        plant.grid().make_grid(m[0]).unwrap();
    }

    #[test]
    fn test_push_around_prefers_the_emptier_side() {
        let (mut plant, m, extras) = line_plant(3, &["q0", "p0", "p1", "p2"]);
        let (q, p) = (extras[0], &extras[1..]);
        // Occupy the row above the line so the detour must go below.
        plant.grid_mut().set_link(m[1], Direction::Up, Some(q));

        push_around(&mut plant, Some(m[0]), p, Some(m[2]), &m.clone()).unwrap();

        assert_eq!(plant.grid().link(m[0], Direction::Down), Some(p[0]));
        assert_eq!(plant.grid().link(p[2], Direction::Up), Some(m[2]));
        plant.grid().check_link_invariant().unwrap();
        plant.grid().make_grid(m[0]).unwrap();
    }

    #[test]
    fn test_push_around_fills_branch_columns_with_transports() {
        let (mut plant, m, extras) = line_plant(3, &["q0", "q1", "p0", "p1", "p2"]);
        let (qu, qd, p) = (extras[0], extras[1], &extras[2..]);
        // One occupied row on either side; ties prefer up, so the path goes
        // two rows up, through one transport per branch column.
        plant.grid_mut().set_link(m[1], Direction::Up, Some(qu));
        plant.grid_mut().set_link(m[1], Direction::Down, Some(qd));

        push_around(&mut plant, Some(m[0]), p, Some(m[2]), &m.clone()).unwrap();

        let t_out = plant.grid().link(m[0], Direction::Up).unwrap();
        assert!(plant.universe().get(t_out).is_transport());
        assert_eq!(plant.grid().link(t_out, Direction::Up), Some(p[0]));
        let t_in = plant.grid().link(p[2], Direction::Down).unwrap();
        assert!(plant.universe().get(t_in).is_transport());
        assert_eq!(plant.grid().link(t_in, Direction::Down), Some(m[2]));
        plant.grid().check_link_invariant().unwrap();
        plant.grid().make_grid(m[0]).unwrap();
    }

    #[test]
    fn test_push_underneath_inserts_parallel_path() {
        let (mut plant, m, extras) = line_plant(3, &["p0"]);
        let p = extras[0];
        let t0 = plant.take_transport();
        let t1 = plant.take_transport();

        push_underneath(&mut plant, m[0], &[t0, p, t1], m[2], Direction::Up).unwrap();

        assert_eq!(plant.grid().link(m[0], Direction::Up), Some(t0));
        assert_eq!(plant.grid().link(t0, Direction::Right), Some(p));
        assert_eq!(plant.grid().link(p, Direction::Right), Some(t1));
        assert_eq!(plant.grid().link(t1, Direction::Down), Some(m[2]));
        assert!(plant.grid().state(m[0]).unwrap().is_start);
        assert!(plant.grid().state(m[2]).unwrap().is_end);
        assert!(plant.grid().state(m[1]).unwrap().shadowed);
        // Main line itself is untouched.
        assert_eq!(plant.grid().link(m[0], Direction::Right), Some(m[1]));
        plant.grid().check_link_invariant().unwrap();
        plant.grid().make_grid(m[0]).unwrap();
    }

    #[test]
    fn test_push_underneath_evicts_existing_branch() {
        let (mut plant, m, extras) = line_plant(3, &["q0", "p0"]);
        let (q, p) = (extras[0], extras[1]);
        // An existing one-module branch above m1.
        plant.grid_mut().set_link(m[1], Direction::Up, Some(q));

        let t0 = plant.take_transport();
        let t1 = plant.take_transport();
        push_underneath(&mut plant, m[0], &[t0, p, t1], m[2], Direction::Up).unwrap();

        // q was pushed a row further; the stretched link m1 -> q is repaired
        // through the path module now sitting between them.
        let positions = plant.grid().make_grid(m[0]).unwrap();
        assert_eq!(positions[&q], (1, 2));
        assert_eq!(plant.grid().link(m[1], Direction::Up), Some(p));
        assert_eq!(plant.grid().link(p, Direction::Up), Some(q));
        plant.grid().check_link_invariant().unwrap();
    }

    #[test]
    fn test_push_underneath_depth_cap() {
        let towers: Vec<String> = (0..MAX_CASCADE_DEPTH + 3).map(|i| format!("q{}", i)).collect();
        let tower_refs: Vec<&str> = towers.iter().map(String::as_str).collect();
        let (mut plant, m, qs) = line_plant(2, &tower_refs);
        // A tower of single-module lines above m0, each one row higher.
        let mut prev = m[0];
        for &q in &qs {
            plant.grid_mut().set_link(prev, Direction::Up, Some(q));
            prev = q;
        }
        let t0 = plant.take_transport();
        let t1 = plant.take_transport();
        let err = push_underneath(&mut plant, m[0], &[t0, t1], m[1], Direction::Up).unwrap_err();
        assert!(matches!(err, Error::CascadeError(_)));
    }
}
