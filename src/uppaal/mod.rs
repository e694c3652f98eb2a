// src/uppaal/mod.rs

//! UPPAAL CORA integration: the makespan oracle.
//!
//! A layout is scored by generating a timed-automata model from a template
//! file (constants, channel priorities, one queue/worker/transporter process
//! per module, one process per recipe instance), writing a single
//! reachability query over all recipe `done` states, and asking `verifyta`
//! for the fastest trace. The trace yields the makespan and, per module,
//! which recipes it worked, which it transported, and which work types it
//! actually ran.
//!
//! Model and query files are transient; they live in a temp directory owned
//! by the oracle and are overwritten on every call.

pub mod model;
pub mod verify;

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::module::ModuleId;
use crate::plant::Plant;
use crate::search::{Oracle, Verdict};

/// Name of the global clock the makespan is read from.
pub const GLOBAL_CLOCK: &str = "global_c";

/// Default wall-clock budget for one verifier run.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Makespan oracle backed by UPPAAL CORA's `verifyta`.
pub struct UppaalOracle {
    template: PathBuf,
    verifyta: PathBuf,
    timeout: Duration,
    workdir: TempDir,
}

impl UppaalOracle {
    /// Create an oracle from a model template and a `verifyta` binary path.
    pub fn new(template: impl Into<PathBuf>, verifyta: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            template: template.into(),
            verifyta: verifyta.into(),
            timeout: DEFAULT_TIMEOUT,
            workdir: TempDir::new()?,
        })
    }

    /// Set a custom verifier timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Oracle for UppaalOracle {
    fn best_time(&mut self, plant: &Plant, placed: &[ModuleId]) -> Result<Verdict> {
        let model_path = self.workdir.path().join("model.xml");
        let query_path = self.workdir.path().join("model.q");

        let maps = model::generate_model(&self.template, plant, placed, &model_path, &query_path)?;
        let output =
            verify::run_verifyta(&self.verifyta, &model_path, &query_path, self.timeout)?;

        if !verify::property_satisfied(&output.summary) {
            return Err(Error::Unsatisfied);
        }

        let makespan = verify::trace_time(&output.trace, GLOBAL_CLOCK)?;
        let (worked, transported, active) = verify::traversal_info(&output.trace, &maps)?;
        Ok(Verdict {
            makespan,
            worked,
            transported,
            active,
        })
    }
}
