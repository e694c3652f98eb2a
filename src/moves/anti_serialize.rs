// src/moves/anti_serialize.rs

//! Anti-serialize: split a main-line run that works for only one recipe out
//! into a side branch, so the other recipes stop queueing behind it.
//!
//! One recipe is chosen at random. Main-line modules whose active work also
//! serves the other recipes are cut points; maximal runs of purely-chosen
//! modules between two cut points become branch paths. Each such run is
//! lifted off the main line with [`push_around`], with transports patching
//! whichever of the branch and the line ends up shorter.

use std::collections::BTreeSet;

use rand::Rng;
use tracing::debug;

use super::{dedup, restored_frontier};
use crate::error::{Error, Result};
use crate::grid::Direction;
use crate::module::ModuleId;
use crate::placer::{connect_chain, push_around};
use crate::plant::{ActiveWorks, Plant};

/// Generate all anti-serialized neighbors of the frontier for one randomly
/// chosen recipe.
pub fn anti_serialize_neighbours<R: Rng>(
    plant: &mut Plant,
    frontier: &str,
    active: &ActiveWorks,
    rng: &mut R,
) -> Result<Vec<String>> {
    let frontier = restored_frontier(plant, frontier, active)?;
    let (main_line, _, _) = plant.find_lines()?;

    if plant.recipes().is_empty() {
        return Ok(Vec::new());
    }
    let chosen = rng.gen_range(0..plant.recipes().len());
    let works: BTreeSet<String> = plant.recipes()[chosen]
        .works()
        .map(str::to_string)
        .collect();
    let mut other_works: BTreeSet<String> = BTreeSet::new();
    for (i, recipe) in plant.recipes().iter().enumerate() {
        if i != chosen {
            other_works.extend(recipe.works().map(str::to_string));
        }
    }
    debug!(
        "anti-serialize against recipe '{}'",
        plant.recipes()[chosen].name()
    );

    // Cut points carry a work shared with the other recipes; pure modules
    // work exclusively for the chosen one.
    let mut cut_points: BTreeSet<ModuleId> = BTreeSet::new();
    let mut pure: BTreeSet<ModuleId> = BTreeSet::new();
    for &m in plant.grid().modules() {
        let active_works = &plant.grid().state(m).unwrap().active_works;
        if active_works
            .iter()
            .any(|w| works.contains(w) && other_works.contains(w))
        {
            cut_points.insert(m);
        }
        if active_works
            .iter()
            .all(|w| works.contains(w) && !other_works.contains(w))
        {
            pure.insert(m);
        }
    }

    // Segment the main line into (start, run, end) triples, where start and
    // end are cut points (absent at the line's boundaries) and the run is a
    // maximal stretch of pure modules between them. Runs anchoring an
    // existing branch stay put.
    let mut segments: Vec<(Option<ModuleId>, Vec<ModuleId>, Option<ModuleId>)> = Vec::new();
    let mut start: Option<ModuleId> = None;
    let mut run: Vec<ModuleId> = Vec::new();
    for &m in &main_line {
        if cut_points.contains(&m) {
            if !run.is_empty() {
                segments.push((start, run.clone(), Some(m)));
            }
            start = Some(m);
            run.clear();
        } else if pure.contains(&m) {
            run.push(m);
        }
    }
    if start.is_some() && !run.is_empty() {
        segments.push((start, run.clone(), None));
    }

    let mut jobs = Vec::new();
    for (s, b, e) in segments {
        let anchored = b.iter().any(|&m| {
            let state = plant.grid().state(m).unwrap();
            state.is_start || state.is_end
        });
        if !anchored {
            jobs.push((s, b, e));
        }
    }

    let mut neighbours = Vec::new();
    for (s, b, e) in jobs {
        plant.decode(&frontier)?;
        neighbours.push(apply_anti_serialize(plant, s, b, e)?);
    }
    Ok(dedup(neighbours))
}

/// Apply one anti-serialization to the decoded layout and encode the result.
fn apply_anti_serialize(
    plant: &mut Plant,
    start: Option<ModuleId>,
    mut path: Vec<ModuleId>,
    end: Option<ModuleId>,
) -> Result<String> {
    let mods: Vec<ModuleId> = match (start, end) {
        (Some(s), Some(e)) => plant.grid().traverse(s, Direction::Right, Some(e)),
        (Some(s), None) => plant.grid().traverse(s, Direction::Right, None),
        (None, Some(e)) => {
            let mut v = plant.grid().traverse_back(e, Direction::Left, None);
            v.reverse();
            v
        }
        (None, None) => {
            return Err(Error::GridError(
                "anti-serialize segment has neither start nor end".to_string(),
            ))
        }
    };

    // What stays on the main line: everything outside the path, with
    // shadowed path modules replaced by transports to keep the line whole.
    let mut remaining: Vec<ModuleId> = Vec::new();
    for &m in &mods {
        if !path.contains(&m) {
            remaining.push(m);
        } else if plant.grid().state(m).map(|s| s.shadowed).unwrap_or(false) {
            remaining.push(plant.take_transport());
        }
    }

    // Remember how the segment reattaches to the rest of the main line.
    let start_connector = start.and_then(|s| plant.grid().back(s, Direction::Left));
    let end_connector = end.and_then(|e| plant.grid().link(e, Direction::Right));

    for &m in &mods {
        plant.grid_mut().horizontal_wipe(m);
    }

    if start.is_some() && end.is_some() {
        // Align the branch with the line it parallels: pad the shorter of
        // the two with transports until the endpoints line up.
        while remaining.len() > path.len() {
            path.push(plant.take_transport());
        }
        let line_end = remaining.pop().ok_or_else(|| {
            Error::GridError("anti-serialize segment lost its end".to_string())
        })?;
        while remaining.len() + 1 < path.len() {
            remaining.push(plant.take_transport());
        }
        remaining.push(line_end);
    }

    connect_chain(plant.grid_mut(), &remaining, Direction::Right);
    if let Some(connector) = start_connector {
        plant
            .grid_mut()
            .set_link(connector, Direction::Right, start);
    }
    if let Some(connector) = end_connector {
        plant
            .grid_mut()
            .set_link(end.unwrap(), Direction::Right, Some(connector));
    }

    let shadow: Vec<ModuleId> = match (start, end) {
        (Some(_), Some(_)) => remaining.clone(),
        (Some(s), None) => {
            plant
                .grid()
                .traverse_steps(s, Direction::Right, path.len().saturating_sub(1))
        }
        (None, Some(e)) => {
            let mut v = plant.grid().traverse_back_steps(
                e,
                Direction::Left,
                path.len().saturating_sub(1),
            );
            v.reverse();
            v
        }
        (None, None) => unreachable!(),
    };

    push_around(plant, start, &path, end, &shadow)?;

    // Splice the reworked segment back into the full main line.
    let old_main = plant.main_line().to_vec();
    let first = old_main.iter().position(|&m| m == mods[0]);
    let last = old_main.iter().position(|&m| m == *mods.last().unwrap());
    let new_main = match (first, last) {
        (Some(first), Some(last)) if first <= last => {
            let mut line = old_main[..first].to_vec();
            line.extend(remaining.iter().copied());
            line.extend(old_main[last + 1..].iter().copied());
            line
        }
        _ => remaining.clone(),
    };
    plant.set_main_line(new_main);

    plant.encode()
}
