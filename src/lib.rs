// src/lib.rs

//! Fabrik: layout search for reconfigurable manufacturing lines.
//!
//! A plant is a set of processing modules on a 2-D grid, linked into
//! conveyor lines, together with an assignment of work types to modules.
//! Given a set of product recipes, fabrik searches for a layout minimizing
//! the makespan reported by an external timed-automata model checker.
//!
//! # Architecture
//!
//! - Modules live in a [`Universe`] arena; all layout state is index-based
//! - A layout travels as a canonical string, which doubles as the memo key
//! - Seeding walks the composed recipe DAG into linear lines
//! - Three move operators (anti-serialize, parallelize, swap) generate
//!   neighbor layouts; a tabu controller with adaptive operator weights
//!   drives the search
//! - The oracle is a trait; the shipped implementation shells out to
//!   UPPAAL CORA's `verifyta`

pub mod config;
mod error;
pub mod grid;
pub mod module;
pub mod moves;
pub mod placer;
pub mod plant;
pub mod recipe;
pub mod search;
pub mod seed;
pub mod uppaal;

pub use config::{load_plant, PlantConfig};
pub use error::{Error, Result};
pub use grid::{position_conflicts, Direction, Grid, Placed};
pub use module::{Module, ModuleId, Universe};
pub use moves::{anti_serialize_neighbours, parallelize_neighbours, swap_neighbours};
pub use plant::{ActiveWorks, Plant};
pub use recipe::{compose_recipes, Recipe, WorkGraph};
pub use search::{tabu_search, MoveKind, Oracle, SearchConfig, Verdict};
pub use seed::SeedGenerator;
pub use uppaal::UppaalOracle;
