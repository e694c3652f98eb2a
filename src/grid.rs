// src/grid.rs

//! Placed-module state and the planar grid it induces.
//!
//! A [`Grid`] holds the runtime state of every module placed in the current
//! layout: four directional outgoing links, the four back-references that
//! mirror them, the active work assignment, and the shadow/start/end flags.
//!
//! Links are directed conveyor edges; `a.right = b` does not imply
//! `b.left = a`. What is always maintained is the back-reference bijection:
//! `a.up = b` holds exactly when `b.in_down = a`, and symmetrically for the
//! other axes. Every link write goes through [`Grid::set_link`], which
//! detaches both old partners before linking, so the bijection can never be
//! observed broken.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::module::ModuleId;

/// A grid position. `x` grows rightward, `y` grows upward.
pub type Pos = (i64, i64);

/// One of the four link directions, in layout-string order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    /// All directions in layout-string order: up, right, down, left.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// The array slot this direction occupies in links and layout strings.
    pub fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Right => 1,
            Direction::Down => 2,
            Direction::Left => 3,
        }
    }

    /// The direction at the given layout-string slot.
    pub fn from_index(index: usize) -> Option<Direction> {
        Direction::ALL.get(index).copied()
    }

    /// The opposite direction.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
        }
    }

    /// The unit step a link in this direction takes on the grid.
    pub fn delta(self) -> Pos {
        match self {
            Direction::Up => (0, 1),
            Direction::Right => (1, 0),
            Direction::Down => (0, -1),
            Direction::Left => (-1, 0),
        }
    }
}

/// Runtime state of one placed module.
#[derive(Debug, Clone, Default)]
pub struct Placed {
    links: [Option<ModuleId>; 4],
    back: [Option<ModuleId>; 4],
    /// The work types this module is assigned to perform in this layout.
    pub active_works: BTreeSet<String>,
    /// A branch passes over or under this main-line module.
    pub shadowed: bool,
    /// This module anchors the outgoing end of a branch.
    pub is_start: bool,
    /// This module anchors the returning end of a branch.
    pub is_end: bool,
}

/// The placed modules of a layout and their link structure.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    placed: HashMap<ModuleId, Placed>,
    order: Vec<ModuleId>,
}

impl Grid {
    /// Create an empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the module has a placed-state entry.
    pub fn place(&mut self, id: ModuleId) {
        if !self.placed.contains_key(&id) {
            self.placed.insert(id, Placed::default());
            self.order.push(id);
        }
    }

    /// Whether the module is currently placed.
    pub fn is_placed(&self, id: ModuleId) -> bool {
        self.placed.contains_key(&id)
    }

    /// The placed modules, in placement order.
    pub fn modules(&self) -> &[ModuleId] {
        &self.order
    }

    /// Number of placed modules.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no module is placed.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Placed state of a module, if placed.
    pub fn state(&self, id: ModuleId) -> Option<&Placed> {
        self.placed.get(&id)
    }

    /// Mutable placed state. Links can only be changed through
    /// [`Grid::set_link`] and the wipe operations.
    pub fn state_mut(&mut self, id: ModuleId) -> &mut Placed {
        self.place(id);
        self.placed.get_mut(&id).unwrap()
    }

    /// The outgoing link of `id` in `dir`.
    pub fn link(&self, id: ModuleId, dir: Direction) -> Option<ModuleId> {
        self.placed.get(&id).and_then(|p| p.links[dir.index()])
    }

    /// The back-reference of `id` for `dir`: the module whose link in the
    /// opposite direction points at `id`.
    pub fn back(&self, id: ModuleId, dir: Direction) -> Option<ModuleId> {
        self.placed.get(&id).and_then(|p| p.back[dir.index()])
    }

    /// Set the outgoing link of `from` in `dir`, maintaining back-references.
    ///
    /// Detaches `from`'s former partner in `dir` and the target's former
    /// back-partner before linking, so the forward/backward bijection holds
    /// after every call.
    pub fn set_link(&mut self, from: ModuleId, dir: Direction, to: Option<ModuleId>) {
        self.place(from);
        let d = dir.index();
        let back_slot = dir.opposite().index();

        // Detach the old forward partner.
        if let Some(old) = self.placed.get(&from).and_then(|p| p.links[d]) {
            if let Some(p) = self.placed.get_mut(&old) {
                p.back[back_slot] = None;
            }
        }

        if let Some(to) = to {
            self.place(to);
            // Detach the target's old back-partner, which still links at it.
            if let Some(prev) = self.placed.get(&to).and_then(|p| p.back[back_slot]) {
                if prev != from {
                    if let Some(p) = self.placed.get_mut(&prev) {
                        p.links[d] = None;
                    }
                }
            }
            self.placed.get_mut(&to).unwrap().back[back_slot] = Some(from);
        }

        self.placed.get_mut(&from).unwrap().links[d] = to;
    }

    /// Clear both horizontal links and back-references of `id`.
    pub fn horizontal_wipe(&mut self, id: ModuleId) {
        self.wipe(id, Direction::Right);
        self.wipe(id, Direction::Left);
    }

    /// Clear both vertical links and back-references of `id`.
    pub fn vertical_wipe(&mut self, id: ModuleId) {
        self.wipe(id, Direction::Up);
        self.wipe(id, Direction::Down);
    }

    /// Clear all links and back-references of `id`.
    pub fn total_wipe(&mut self, id: ModuleId) {
        self.horizontal_wipe(id);
        self.vertical_wipe(id);
    }

    fn wipe(&mut self, id: ModuleId, dir: Direction) {
        if !self.placed.contains_key(&id) {
            return;
        }
        self.set_link(id, dir, None);
        if let Some(partner) = self.back(id, dir) {
            self.set_link(partner, dir.opposite(), None);
        }
    }

    /// Remove a module from the grid entirely. Its links are wiped first so
    /// no dangling partner remains.
    pub fn remove(&mut self, id: ModuleId) {
        if self.placed.contains_key(&id) {
            self.total_wipe(id);
            self.placed.remove(&id);
            self.order.retain(|&m| m != id);
        }
    }

    /// Walk outgoing links in `dir`, stopping at `end` (appended inclusive)
    /// or at the first missing link.
    pub fn traverse(
        &self,
        from: ModuleId,
        dir: Direction,
        end: Option<ModuleId>,
    ) -> Vec<ModuleId> {
        let mut mods = vec![from];
        let mut current = from;
        while let Some(next) = self.link(current, dir) {
            if Some(next) == end {
                break;
            }
            mods.push(next);
            current = next;
        }
        if let Some(end) = end {
            mods.push(end);
        }
        mods
    }

    /// Walk back-references in `dir`, stopping at `end` (appended inclusive)
    /// or at the first missing back-reference.
    pub fn traverse_back(
        &self,
        from: ModuleId,
        dir: Direction,
        end: Option<ModuleId>,
    ) -> Vec<ModuleId> {
        let mut mods = vec![from];
        let mut current = from;
        while let Some(next) = self.back(current, dir) {
            if Some(next) == end {
                break;
            }
            mods.push(next);
            current = next;
        }
        if let Some(end) = end {
            mods.push(end);
        }
        mods
    }

    /// Walk at most `steps` outgoing links in `dir`.
    pub fn traverse_steps(&self, from: ModuleId, dir: Direction, steps: usize) -> Vec<ModuleId> {
        let mut mods = vec![from];
        let mut current = from;
        let mut left = steps;
        while left > 0 {
            match self.link(current, dir) {
                Some(next) => {
                    mods.push(next);
                    current = next;
                    left -= 1;
                }
                None => break,
            }
        }
        mods
    }

    /// Walk at most `steps` back-references in `dir`.
    pub fn traverse_back_steps(
        &self,
        from: ModuleId,
        dir: Direction,
        steps: usize,
    ) -> Vec<ModuleId> {
        let mut mods = vec![from];
        let mut current = from;
        let mut left = steps;
        while left > 0 {
            match self.back(current, dir) {
                Some(next) => {
                    mods.push(next);
                    current = next;
                    left -= 1;
                }
                None => break,
            }
        }
        mods
    }

    /// The full horizontal line containing `id`, leftmost first.
    pub fn line_of(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut left = self.traverse_back(id, Direction::Left, None);
        left.reverse();
        left.pop(); // drop `id`; the rightward walk re-adds it
        let right = self.traverse(id, Direction::Right, None);
        left.extend(right);
        left
    }

    /// Every module transitively connected to `id` through outgoing links or
    /// back-references, in depth-first order.
    pub fn connected_from(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![id];
        let mut result = Vec::new();
        seen.insert(id);
        while let Some(m) = queue.pop() {
            result.push(m);
            for dir in Direction::ALL {
                for next in [self.link(m, dir), self.back(m, dir)] {
                    if let Some(next) = next {
                        if seen.insert(next) {
                            queue.push(next);
                        }
                    }
                }
            }
        }
        result
    }

    /// Assign a grid position to every module reachable from `root`, with
    /// `root` at the origin.
    ///
    /// Fails if the link structure would assign two different positions to
    /// one module. Two modules landing on the same position is reported
    /// separately by [`position_conflicts`].
    pub fn make_grid(&self, root: ModuleId) -> Result<HashMap<ModuleId, Pos>> {
        let mut positions: HashMap<ModuleId, Pos> = HashMap::new();
        let mut stack = vec![(root, (0, 0))];
        while let Some((m, pos)) = stack.pop() {
            match positions.get(&m) {
                Some(&existing) if existing != pos => {
                    return Err(Error::GridError(format!(
                        "module {} assigned both {:?} and {:?}",
                        m.index(),
                        existing,
                        pos
                    )));
                }
                Some(_) => continue,
                None => {
                    positions.insert(m, pos);
                }
            }
            for dir in Direction::ALL {
                let (dx, dy) = dir.delta();
                let next_pos = (pos.0 + dx, pos.1 + dy);
                // Both the forward neighbor and the back-reference sit one
                // cell away in the same direction.
                for next in [self.link(m, dir), self.back(m, dir)] {
                    if let Some(next) = next {
                        if !positions.contains_key(&next) {
                            stack.push((next, next_pos));
                        } else if positions[&next] != next_pos {
                            return Err(Error::GridError(format!(
                                "module {} assigned both {:?} and {:?}",
                                next.index(),
                                positions[&next],
                                next_pos
                            )));
                        }
                    }
                }
            }
        }
        Ok(positions)
    }

    /// Whether `other` can occupy the cell at `offset` relative to `id`:
    /// either it already sits there, or the cell is empty.
    pub fn can_connect(&self, id: ModuleId, other: ModuleId, offset: Pos) -> Result<bool> {
        let positions = self.make_grid(id)?;
        match positions.get(&other) {
            Some(&pos) => Ok(pos == offset),
            None => Ok(!positions.values().any(|&p| p == offset)),
        }
    }

    /// Exchange the grid positions of two modules: links, back-references,
    /// active works, and flags all move with the position. Either module may
    /// be unplaced, in which case the other ends up detached.
    pub fn swap_modules(&mut self, m0: ModuleId, m1: ModuleId) {
        if m0 == m1 {
            return;
        }
        self.place(m0);
        self.place(m1);
        let s0 = self.placed[&m0].clone();
        let s1 = self.placed[&m1].clone();
        self.total_wipe(m0);
        self.total_wipe(m1);

        // A link between the pair itself must flip with the exchange.
        let fix = |x: Option<ModuleId>| {
            x.map(|v| {
                if v == m0 {
                    m1
                } else if v == m1 {
                    m0
                } else {
                    v
                }
            })
        };

        for dir in Direction::ALL {
            if let Some(t) = fix(s1.links[dir.index()]) {
                self.set_link(m0, dir, Some(t));
            }
            if let Some(n) = fix(s1.back[dir.index()]) {
                self.set_link(n, dir.opposite(), Some(m0));
            }
            if let Some(t) = fix(s0.links[dir.index()]) {
                self.set_link(m1, dir, Some(t));
            }
            if let Some(n) = fix(s0.back[dir.index()]) {
                self.set_link(n, dir.opposite(), Some(m1));
            }
        }

        let p0 = self.placed.get_mut(&m0).unwrap();
        p0.active_works = s1.active_works;
        p0.shadowed = s1.shadowed;
        p0.is_start = s1.is_start;
        p0.is_end = s1.is_end;
        let p1 = self.placed.get_mut(&m1).unwrap();
        p1.active_works = s0.active_works;
        p1.shadowed = s0.shadowed;
        p1.is_start = s0.is_start;
        p1.is_end = s0.is_end;
    }

    /// Verify the forward/backward link bijection for every placed module.
    /// Cheap enough to run after every operator in tests.
    pub fn check_link_invariant(&self) -> Result<()> {
        for (&m, state) in &self.placed {
            for dir in Direction::ALL {
                if let Some(n) = state.links[dir.index()] {
                    if self.back(n, dir) != Some(m) {
                        return Err(Error::GridError(format!(
                            "link {} -{:?}-> {} has no matching back-reference",
                            m.index(),
                            dir,
                            n.index()
                        )));
                    }
                }
                if let Some(n) = state.back[dir.index()] {
                    if self.link(n, dir.opposite()) != Some(m) {
                        return Err(Error::GridError(format!(
                            "back-reference {:?} of {} does not match a link of {}",
                            dir,
                            m.index(),
                            n.index()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Positions occupied by more than one module: a conflicted embedding.
pub fn position_conflicts(positions: &HashMap<ModuleId, Pos>) -> Vec<(Pos, Vec<ModuleId>)> {
    let mut by_pos: HashMap<Pos, Vec<ModuleId>> = HashMap::new();
    for (&m, &pos) in positions {
        by_pos.entry(pos).or_default().push(m);
    }
    let mut conflicts: Vec<(Pos, Vec<ModuleId>)> = by_pos
        .into_iter()
        .filter(|(_, mods)| mods.len() > 1)
        .collect();
    for (_, mods) in conflicts.iter_mut() {
        mods.sort();
    }
    conflicts.sort_by_key(|(pos, _)| *pos);
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ModuleId> {
        (0..n).map(ModuleId).collect()
    }

    #[test]
    fn test_set_link_maintains_back_reference() {
        let m = ids(2);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Up, Some(m[1]));
        assert_eq!(grid.link(m[0], Direction::Up), Some(m[1]));
        assert_eq!(grid.back(m[1], Direction::Down), Some(m[0]));
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_relink_detaches_old_partner() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Up, Some(m[1]));
        grid.set_link(m[0], Direction::Up, Some(m[2]));
        assert_eq!(grid.back(m[1], Direction::Down), None);
        assert_eq!(grid.back(m[2], Direction::Down), Some(m[0]));
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_linking_steals_target_from_former_back_partner() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Up, Some(m[2]));
        grid.set_link(m[1], Direction::Up, Some(m[2]));
        // m0's stale link must be gone or the bijection breaks.
        assert_eq!(grid.link(m[0], Direction::Up), None);
        assert_eq!(grid.back(m[2], Direction::Down), Some(m[1]));
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_unlink_clears_back_reference() {
        let m = ids(2);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[0], Direction::Right, None);
        assert_eq!(grid.back(m[1], Direction::Left), None);
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_traverse_right_chain() {
        let m = ids(4);
        let mut grid = Grid::new();
        for w in m.windows(2) {
            grid.set_link(w[0], Direction::Right, Some(w[1]));
        }
        assert_eq!(grid.traverse(m[0], Direction::Right, None), m);
        assert_eq!(
            grid.traverse(m[0], Direction::Right, Some(m[2])),
            vec![m[0], m[1], m[2]]
        );
        assert_eq!(grid.traverse_steps(m[0], Direction::Right, 2), vec![m[0], m[1], m[2]]);
    }

    #[test]
    fn test_line_of_spans_both_sides() {
        let m = ids(4);
        let mut grid = Grid::new();
        for w in m.windows(2) {
            grid.set_link(w[0], Direction::Right, Some(w[1]));
        }
        assert_eq!(grid.line_of(m[2]), m);
    }

    #[test]
    fn test_connected_from_crosses_back_references() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[2], Direction::Up, Some(m[1]));
        let mut connected = grid.connected_from(m[0]);
        connected.sort();
        assert_eq!(connected, m);
    }

    #[test]
    fn test_make_grid_assigns_axis_positions() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[1], Direction::Up, Some(m[2]));
        let positions = grid.make_grid(m[0]).unwrap();
        assert_eq!(positions[&m[0]], (0, 0));
        assert_eq!(positions[&m[1]], (1, 0));
        assert_eq!(positions[&m[2]], (1, 1));
        assert!(position_conflicts(&positions).is_empty());
    }

    #[test]
    fn test_make_grid_rejects_inconsistent_embedding() {
        let m = ids(2);
        let mut grid = Grid::new();
        // m1 both right of and above m0: two positions for one module.
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[0], Direction::Up, Some(m[1]));
        assert!(grid.make_grid(m[0]).is_err());
    }

    #[test]
    fn test_position_conflicts_detects_collision() {
        let m = ids(5);
        let mut grid = Grid::new();
        // A ring that comes back around onto the origin cell:
        // m0 at (0,0), m1 at (1,0), m2 at (1,1), m3 at (0,1), m4 at (0,0).
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[1], Direction::Up, Some(m[2]));
        grid.set_link(m[2], Direction::Left, Some(m[3]));
        grid.set_link(m[3], Direction::Down, Some(m[4]));
        let positions = grid.make_grid(m[0]).unwrap();
        let conflicts = position_conflicts(&positions);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].0, (0, 0));
        assert_eq!(conflicts[0].1, vec![m[0], m[4]]);
    }

    #[test]
    fn test_can_connect() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.place(m[2]);
        // m1 already sits at (1, 0).
        assert!(grid.can_connect(m[0], m[1], (1, 0)).unwrap());
        assert!(!grid.can_connect(m[0], m[1], (0, 1)).unwrap());
        // m2 is unreachable from m0, so only empty cells accept it.
        assert!(grid.can_connect(m[0], m[2], (0, 1)).unwrap());
        assert!(!grid.can_connect(m[0], m[2], (1, 0)).unwrap());
    }

    #[test]
    fn test_wipes() {
        let m = ids(5);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[2], Direction::Left, Some(m[0]));
        grid.set_link(m[0], Direction::Up, Some(m[3]));
        grid.set_link(m[4], Direction::Down, Some(m[0]));

        grid.horizontal_wipe(m[0]);
        assert_eq!(grid.link(m[0], Direction::Right), None);
        assert_eq!(grid.link(m[2], Direction::Left), None);
        assert_eq!(grid.link(m[0], Direction::Up), Some(m[3]));

        grid.vertical_wipe(m[0]);
        assert_eq!(grid.link(m[0], Direction::Up), None);
        assert_eq!(grid.link(m[4], Direction::Down), None);
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_swap_exchanges_links_and_state() {
        let m = ids(4);
        let mut grid = Grid::new();
        // m0 -> m1 -> m2, m3 above m1.
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[1], Direction::Right, Some(m[2]));
        grid.set_link(m[1], Direction::Up, Some(m[3]));
        grid.state_mut(m[1]).active_works.insert("a".to_string());
        grid.state_mut(m[1]).is_start = true;

        grid.swap_modules(m[1], m[3]);

        assert_eq!(grid.link(m[0], Direction::Right), Some(m[3]));
        assert_eq!(grid.link(m[3], Direction::Right), Some(m[2]));
        assert_eq!(grid.link(m[3], Direction::Up), Some(m[1]));
        assert!(grid.state(m[3]).unwrap().active_works.contains("a"));
        assert!(grid.state(m[3]).unwrap().is_start);
        assert!(grid.state(m[1]).unwrap().active_works.is_empty());
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_swap_adjacent_modules() {
        let m = ids(4);
        let mut grid = Grid::new();
        // m0 -> m1 -> m2 -> m3.
        for w in m.windows(2) {
            grid.set_link(w[0], Direction::Right, Some(w[1]));
        }
        grid.swap_modules(m[1], m[2]);
        assert_eq!(grid.link(m[0], Direction::Right), Some(m[2]));
        assert_eq!(grid.link(m[2], Direction::Right), Some(m[1]));
        assert_eq!(grid.link(m[1], Direction::Right), Some(m[3]));
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_swap_with_unplaced_module() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.state_mut(m[1]).active_works.insert("a".to_string());

        // m2 is free; it takes m1's position, m1 ends up detached.
        grid.swap_modules(m[1], m[2]);
        assert_eq!(grid.link(m[0], Direction::Right), Some(m[2]));
        assert!(grid.state(m[2]).unwrap().active_works.contains("a"));
        for dir in Direction::ALL {
            assert_eq!(grid.link(m[1], dir), None);
            assert_eq!(grid.back(m[1], dir), None);
        }
        grid.check_link_invariant().unwrap();
    }

    #[test]
    fn test_remove_detaches_partners() {
        let m = ids(3);
        let mut grid = Grid::new();
        grid.set_link(m[0], Direction::Right, Some(m[1]));
        grid.set_link(m[1], Direction::Right, Some(m[2]));
        grid.remove(m[1]);
        assert_eq!(grid.link(m[0], Direction::Right), None);
        assert!(!grid.is_placed(m[1]));
        assert_eq!(grid.modules(), &[m[0], m[2]]);
        grid.check_link_invariant().unwrap();
    }
}
