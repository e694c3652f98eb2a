// src/plant.rs

//! The plant: module universe, recipes, and the currently decoded layout.
//!
//! A layout travels between search iterations as its canonical string:
//!
//! ```text
//! R1$R2$…$Rk | M1:M2:…:Mn | id_a,id_b,…
//! ```
//!
//! with recipe entries `name@start_module&start_direction` and module
//! entries `m_id{w1,w2,…}[up,right,down,left]sse`, where each directional
//! slot is a module id or `_` and `sse` is three digits for the shadowed,
//! is-start and is-end flags. Modules are sorted by id and active works are
//! sorted within the braces, so structurally equal layouts produce
//! byte-identical strings and the string doubles as a memo key.
//!
//! Decoding rebuilds the placed state of every module from scratch; any
//! state held across a decode is stale, so callers re-fetch by id.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::grid::{Direction, Grid, Pos};
use crate::module::{ModuleId, Universe};
use crate::recipe::Recipe;

/// Per-module active-work assignment, keyed by module string id. This is
/// the shape the oracle reports assignments in.
pub type ActiveWorks = HashMap<String, BTreeSet<String>>;

/// Module universe, recipes, and the decoded layout of the current frontier.
#[derive(Debug)]
pub struct Plant {
    universe: Universe,
    recipes: Vec<Recipe>,
    grid: Grid,
    main_line: Vec<ModuleId>,
    starts: HashMap<String, (ModuleId, Direction)>,
}

impl Plant {
    /// Create a plant over a universe and a set of recipes.
    pub fn new(universe: Universe, recipes: Vec<Recipe>) -> Self {
        Self {
            universe,
            recipes,
            grid: Grid::new(),
            main_line: Vec::new(),
            starts: HashMap::new(),
        }
    }

    /// The module universe.
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// The recipes, in definition order.
    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }

    /// The decoded layout's link structure and placed state.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable access to the decoded layout.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// The main line, leftmost module first.
    pub fn main_line(&self) -> &[ModuleId] {
        &self.main_line
    }

    /// Replace the main line.
    pub fn set_main_line(&mut self, line: Vec<ModuleId>) {
        self.main_line = line;
    }

    /// The start module and direction assigned to a recipe.
    pub fn start_of(&self, recipe: &str) -> Option<(ModuleId, Direction)> {
        self.starts.get(recipe).copied()
    }

    /// Assign a recipe's start module and direction.
    pub fn set_start(&mut self, recipe: &str, module: ModuleId, direction: Direction) {
        self.starts.insert(recipe.to_string(), (module, direction));
    }

    /// Drop the decoded layout: placed state, main line, and recipe starts.
    /// All transports return to the free pool. Idempotent.
    pub fn reset(&mut self) {
        self.grid = Grid::new();
        self.main_line.clear();
        self.starts.clear();
        self.universe.sync_transport_pool(&BTreeSet::new());
    }

    /// Take a transport module from the pool, minting one if needed.
    pub fn take_transport(&mut self) -> ModuleId {
        self.universe.take_transport()
    }

    /// Release a transport: wipe its links, remove it from the layout, and
    /// return it to the pool. A second release of the same transport is a
    /// no-op.
    pub fn free_transport(&mut self, id: ModuleId) {
        self.grid.remove(id);
        self.main_line.retain(|&m| m != id);
        self.universe.release_transport(id);
    }

    /// Modules of the universe not placed in the current layout.
    pub fn free_modules(&self) -> Vec<ModuleId> {
        self.universe
            .ids()
            .filter(|&id| !self.grid.is_placed(id))
            .collect()
    }

    /// Free work modules: not placed and not transports.
    pub fn free_work_modules(&self) -> Vec<ModuleId> {
        self.universe
            .work_module_ids()
            .filter(|&id| !self.grid.is_placed(id))
            .collect()
    }

    /// Placed work modules, in placement order, transports excluded.
    pub fn placed_work_modules(&self) -> Vec<ModuleId> {
        self.grid
            .modules()
            .iter()
            .copied()
            .filter(|&id| !self.universe.get(id).is_transport())
            .collect()
    }

    /// Encode the current layout as its canonical string.
    ///
    /// Returns the empty string when nothing is placed.
    pub fn encode(&self) -> Result<String> {
        if self.grid.is_empty() {
            return Ok(String::new());
        }

        let mut recipe_parts = Vec::with_capacity(self.recipes.len());
        for recipe in &self.recipes {
            let (module, direction) = self.starts.get(recipe.name()).ok_or_else(|| {
                Error::GridError(format!("recipe '{}' has no start module", recipe.name()))
            })?;
            recipe_parts.push(recipe.encode(self.universe.get(*module).id(), *direction));
        }

        let mut connected = self.grid.connected_from(self.grid.modules()[0]);
        connected.sort_by(|&a, &b| self.universe.get(a).id().cmp(self.universe.get(b).id()));

        let module_parts: Vec<String> = connected.iter().map(|&m| self.module_str(m)).collect();

        let main_line: Vec<&str> = self
            .main_line
            .iter()
            .map(|&m| self.universe.get(m).id())
            .collect();

        Ok(format!(
            "{}|{}|{}",
            recipe_parts.join("$"),
            module_parts.join(":"),
            main_line.join(",")
        ))
    }

    fn module_str(&self, id: ModuleId) -> String {
        let state = self.grid.state(id).cloned().unwrap_or_default();
        let works: Vec<&str> = state.active_works.iter().map(String::as_str).collect();
        let conns: Vec<String> = Direction::ALL
            .iter()
            .map(|&d| match self.grid.link(id, d) {
                Some(n) => self.universe.get(n).id().to_string(),
                None => "_".to_string(),
            })
            .collect();
        format!(
            "{}{{{}}}[{}]{}{}{}",
            self.universe.get(id).id(),
            works.join(","),
            conns.join(","),
            state.shadowed as u8,
            state.is_start as u8,
            state.is_end as u8
        )
    }

    /// Decode a layout string, replacing the current layout entirely.
    pub fn decode(&mut self, config: &str) -> Result<()> {
        self.reset();

        let parts: Vec<&str> = config.split('|').collect();
        if parts.len() != 3 {
            return Err(Error::DecodeError(format!(
                "expected 3 '|'-separated fields, got {}",
                parts.len()
            )));
        }

        for rs in parts[0].split('$') {
            let (name, module, direction) = parse_recipe_entry(rs)?;
            if !self.recipes.iter().any(|r| r.name() == name) {
                return Err(Error::DecodeError(format!("unknown recipe '{}'", name)));
            }
            let module = self.lookup(module)?;
            self.starts.insert(name.to_string(), (module, direction));
        }

        for ms in parts[1].split(':') {
            let entry = parse_module_entry(ms)?;
            let id = self.lookup(entry.id)?;
            self.grid.place(id);
            for (slot, conn) in entry.connections.iter().enumerate() {
                if let Some(conn) = conn {
                    let target = self.lookup(conn)?;
                    let dir = Direction::from_index(slot).unwrap();
                    self.grid.set_link(id, dir, Some(target));
                }
            }
            let state = self.grid.state_mut(id);
            state.active_works = entry.active_works;
            state.shadowed = entry.shadowed;
            state.is_start = entry.is_start;
            state.is_end = entry.is_end;
        }

        if !parts[2].is_empty() {
            for m_id in parts[2].split(',') {
                let id = self.lookup(m_id)?;
                self.main_line.push(id);
            }
        }

        let placed: BTreeSet<ModuleId> = self.grid.modules().iter().copied().collect();
        self.universe.sync_transport_pool(&placed);
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<ModuleId> {
        self.universe
            .lookup(id)
            .ok_or_else(|| Error::DecodeError(format!("unknown module '{}'", id)))
    }

    /// The modules named in a layout string, in string order, without
    /// decoding it.
    pub fn modules_in_config(&self, config: &str) -> Result<Vec<ModuleId>> {
        let parts: Vec<&str> = config.split('|').collect();
        if parts.len() != 3 {
            return Err(Error::DecodeError(format!(
                "expected 3 '|'-separated fields, got {}",
                parts.len()
            )));
        }
        let mut result = Vec::new();
        for ms in parts[1].split(':') {
            let entry = parse_module_entry(ms)?;
            result.push(self.lookup(entry.id)?);
        }
        Ok(result)
    }

    /// The modules of the universe not named in a layout string.
    pub fn modules_not_in_config(&self, config: &str) -> Result<Vec<ModuleId>> {
        let named: BTreeSet<ModuleId> = self.modules_in_config(config)?.into_iter().collect();
        Ok(self
            .universe
            .ids()
            .filter(|id| !named.contains(id))
            .collect())
    }

    /// Override placed modules' active works with oracle-reported values.
    /// Modules without an entry keep their decoded assignment.
    pub fn restore_active_works(&mut self, active: &ActiveWorks) {
        let placed: Vec<ModuleId> = self.grid.modules().to_vec();
        for id in placed {
            if let Some(works) = active.get(self.universe.get(id).id()) {
                self.grid.state_mut(id).active_works = works.clone();
            }
        }
    }

    /// Split the placed modules into the main line and the parallel lines
    /// above and below it.
    pub fn find_lines(&self) -> Result<(Vec<ModuleId>, Vec<Vec<ModuleId>>, Vec<Vec<ModuleId>>)> {
        let root = *self
            .main_line
            .first()
            .ok_or_else(|| Error::GridError("layout has no main line".to_string()))?;

        let mut lines: Vec<Vec<ModuleId>> = Vec::new();
        for &m in self.grid.modules() {
            if !lines.iter().any(|l| l.contains(&m)) {
                lines.push(self.grid.line_of(m));
            }
        }

        let positions = self.grid.make_grid(root)?;
        let mut up_lines = Vec::new();
        let mut down_lines = Vec::new();
        for line in lines {
            if line.contains(&root) {
                continue;
            }
            let pos: Pos = *positions.get(&line[0]).ok_or_else(|| {
                Error::GridError(format!(
                    "module {} is disconnected from the main line",
                    line[0].index()
                ))
            })?;
            if pos.1 > 0 {
                up_lines.push(line);
            } else {
                down_lines.push(line);
            }
        }
        Ok((self.main_line.clone(), up_lines, down_lines))
    }

    /// Exchange two modules: grid position, active works, flags, recipe
    /// start anchors, and main-line membership all move with the position.
    pub fn swap_modules(&mut self, m0: ModuleId, m1: ModuleId) {
        let placed0 = self.grid.is_placed(m0);
        let placed1 = self.grid.is_placed(m1);

        self.grid.swap_modules(m0, m1);

        // A swap with a free module leaves the displaced one detached;
        // drop it from the layout.
        if placed0 && !placed1 {
            self.grid.remove(m0);
        } else if placed1 && !placed0 {
            self.grid.remove(m1);
        }

        for (module, _) in self.starts.values_mut() {
            if *module == m0 {
                *module = m1;
            } else if *module == m1 {
                *module = m0;
            }
        }

        for m in self.main_line.iter_mut() {
            if *m == m0 {
                *m = m1;
            } else if *m == m1 {
                *m = m0;
            }
        }
    }
}

fn parse_recipe_entry(rs: &str) -> Result<(&str, &str, Direction)> {
    let at = rs
        .find('@')
        .ok_or_else(|| Error::DecodeError(format!("missing '@' in recipe entry '{}'", rs)))?;
    let amp = rs
        .find('&')
        .ok_or_else(|| Error::DecodeError(format!("missing '&' in recipe entry '{}'", rs)))?;
    if amp < at {
        return Err(Error::DecodeError(format!(
            "malformed recipe entry '{}'",
            rs
        )));
    }
    let name = &rs[..at];
    let module = &rs[at + 1..amp];
    let direction = rs[amp + 1..]
        .parse::<usize>()
        .ok()
        .and_then(Direction::from_index)
        .ok_or_else(|| {
            Error::DecodeError(format!("bad start direction in recipe entry '{}'", rs))
        })?;
    if name.is_empty() || module.is_empty() {
        return Err(Error::DecodeError(format!(
            "empty field in recipe entry '{}'",
            rs
        )));
    }
    Ok((name, module, direction))
}

struct ModuleEntry<'a> {
    id: &'a str,
    active_works: BTreeSet<String>,
    connections: [Option<&'a str>; 4],
    shadowed: bool,
    is_start: bool,
    is_end: bool,
}

fn parse_module_entry(ms: &str) -> Result<ModuleEntry<'_>> {
    let brace_open = ms
        .find('{')
        .ok_or_else(|| Error::DecodeError(format!("missing '{{' in module entry '{}'", ms)))?;
    let brace_close = ms
        .find('}')
        .ok_or_else(|| Error::DecodeError(format!("missing '}}' in module entry '{}'", ms)))?;
    let bracket_open = ms
        .find('[')
        .ok_or_else(|| Error::DecodeError(format!("missing '[' in module entry '{}'", ms)))?;
    let bracket_close = ms
        .find(']')
        .ok_or_else(|| Error::DecodeError(format!("missing ']' in module entry '{}'", ms)))?;
    if brace_close < brace_open || bracket_open < brace_close || bracket_close < bracket_open {
        return Err(Error::DecodeError(format!(
            "malformed module entry '{}'",
            ms
        )));
    }

    let id = &ms[..brace_open];
    if id.is_empty() {
        return Err(Error::DecodeError(format!(
            "empty module id in entry '{}'",
            ms
        )));
    }

    let active_works: BTreeSet<String> = ms[brace_open + 1..brace_close]
        .split(',')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let conns: Vec<&str> = ms[bracket_open + 1..bracket_close].split(',').collect();
    if conns.len() != 4 {
        return Err(Error::DecodeError(format!(
            "expected 4 connection slots in module entry '{}'",
            ms
        )));
    }
    let mut connections = [None; 4];
    for (i, conn) in conns.iter().enumerate() {
        if *conn != "_" {
            connections[i] = Some(*conn);
        }
    }

    let flags = &ms[bracket_close + 1..];
    if flags.len() != 3 || !flags.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(Error::DecodeError(format!(
            "expected 3 flag digits in module entry '{}'",
            ms
        )));
    }
    let flag = |i: usize| flags.as_bytes()[i] == b'1';

    Ok(ModuleEntry {
        id,
        active_works,
        connections,
        shadowed: flag(0),
        is_start: flag(1),
        is_end: flag(2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use std::collections::BTreeMap;

    fn module(id: &str, works: &[&str]) -> Module {
        let work_times = works.iter().map(|w| (w.to_string(), 5)).collect();
        Module::new(id, work_times, [[1; 4]; 4], 1, false)
    }

    fn transport_proto() -> Module {
        Module::new("transport", BTreeMap::new(), [[1; 4]; 4], 1, true)
    }

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(w, ps)| (w.to_string(), ps.iter().map(|p| p.to_string()).collect()))
            .collect()
    }

    /// Two modules side by side, m2 right of m1, one recipe starting at m1.
    fn two_module_plant() -> Plant {
        let mut universe = Universe::new(transport_proto());
        universe.register(module("m1", &["w1"])).unwrap();
        universe.register(module("m2", &["w2"])).unwrap();
        let recipe = Recipe::new(
            "r",
            deps(&[("w2", &["w1"]), ("w1", &[])]),
            Direction::Up,
            1,
        );
        Plant::new(universe, vec![recipe])
    }

    fn lay_out_two_modules(plant: &mut Plant) {
        let m1 = plant.universe().lookup("m1").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();
        plant.grid_mut().set_link(m1, Direction::Right, Some(m2));
        plant.grid_mut().set_link(m2, Direction::Left, Some(m1));
        plant
            .grid_mut()
            .state_mut(m1)
            .active_works
            .insert("w1".to_string());
        plant
            .grid_mut()
            .state_mut(m2)
            .active_works
            .insert("w2".to_string());
        plant.grid_mut().state_mut(m1).is_start = true;
        plant.grid_mut().state_mut(m2).is_end = true;
        plant.set_main_line(vec![m1, m2]);
        plant.set_start("r", m1, Direction::Up);
    }

    #[test]
    fn test_encode_two_module_layout() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let s = plant.encode().unwrap();
        assert_eq!(s, "r@m1&0|m1{w1}[_,m2,_,_]010:m2{w2}[_,_,_,m1]001|m1,m2");
    }

    #[test]
    fn test_encode_empty_layout_is_empty_string() {
        let plant = two_module_plant();
        assert_eq!(plant.encode().unwrap(), "");
    }

    #[test]
    fn test_decode_round_trip() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let s = plant.encode().unwrap();

        plant.decode(&s).unwrap();
        let m1 = plant.universe().lookup("m1").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();
        assert_eq!(plant.grid().link(m1, Direction::Right), Some(m2));
        assert_eq!(plant.grid().link(m2, Direction::Left), Some(m1));
        assert!(plant.grid().state(m1).unwrap().is_start);
        assert!(plant.grid().state(m2).unwrap().is_end);
        assert_eq!(plant.start_of("r"), Some((m1, Direction::Up)));
        assert_eq!(plant.main_line(), &[m1, m2]);
        plant.grid().check_link_invariant().unwrap();

        // Canonical: a second encode is byte-identical.
        assert_eq!(plant.encode().unwrap(), s);
    }

    #[test]
    fn test_decode_rejects_malformed_strings() {
        let mut plant = two_module_plant();
        assert!(plant.decode("nonsense").is_err());
        assert!(plant.decode("r@m1&0|m1{w1}[_,m2,_]010|m1").is_err());
        assert!(plant.decode("r@m1&0|m1{w1}[_,m2,_,_]01|m1").is_err());
        assert!(plant
            .decode("r@m1&0|ghost{w1}[_,_,_,_]000|ghost")
            .is_err());
        assert!(plant.decode("r@m1&9|m1{w1}[_,_,_,_]000|m1").is_err());
    }

    #[test]
    fn test_modules_in_and_not_in_config() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let s = plant.encode().unwrap();
        let m1 = plant.universe().lookup("m1").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();

        assert_eq!(plant.modules_in_config(&s).unwrap(), vec![m1, m2]);
        assert!(plant.modules_not_in_config(&s).unwrap().is_empty());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        plant.reset();
        assert!(plant.grid().is_empty());
        assert!(plant.main_line().is_empty());
        plant.reset();
        assert!(plant.grid().is_empty());
        assert_eq!(plant.encode().unwrap(), "");
    }

    #[test]
    fn test_decode_claims_referenced_transports() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let m2 = plant.universe().lookup("m2").unwrap();
        let t = plant.take_transport();
        plant.grid_mut().set_link(m2, Direction::Right, Some(t));
        plant.main_line.push(t);
        let s = plant.encode().unwrap();

        // After a fresh decode the referenced transport must not be free.
        plant.decode(&s).unwrap();
        assert!(!plant.universe().transport_is_free(t));

        // Decoding a layout without it returns it to the pool.
        plant.reset();
        assert!(plant.universe().transport_is_free(t));
    }

    #[test]
    fn test_free_transport_is_idempotent() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let m2 = plant.universe().lookup("m2").unwrap();
        let t = plant.take_transport();
        plant.grid_mut().set_link(m2, Direction::Right, Some(t));

        plant.free_transport(t);
        assert!(!plant.grid().is_placed(t));
        assert_eq!(plant.grid().link(m2, Direction::Right), None);
        plant.free_transport(t);
        assert!(plant.universe().transport_is_free(t));
    }

    #[test]
    fn test_find_lines_classifies_branches() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let m1 = plant.universe().lookup("m1").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();
        // A one-module branch above the line and one below.
        let t0 = plant.take_transport();
        let t1 = plant.take_transport();
        plant.grid_mut().set_link(m1, Direction::Up, Some(t0));
        plant.grid_mut().set_link(m2, Direction::Down, Some(t1));

        let (main, up, down) = plant.find_lines().unwrap();
        assert_eq!(main, vec![m1, m2]);
        assert_eq!(up, vec![vec![t0]]);
        assert_eq!(down, vec![vec![t1]]);
    }

    #[test]
    fn test_swap_modules_updates_starts_and_main_line() {
        let mut plant = two_module_plant();
        lay_out_two_modules(&mut plant);
        let m1 = plant.universe().lookup("m1").unwrap();
        let m2 = plant.universe().lookup("m2").unwrap();

        plant.swap_modules(m1, m2);
        assert_eq!(plant.main_line(), &[m2, m1]);
        assert_eq!(plant.start_of("r"), Some((m2, Direction::Up)));
        assert_eq!(plant.grid().link(m2, Direction::Right), Some(m1));
        plant.grid().check_link_invariant().unwrap();
    }
}
