// src/module.rs

//! Static module definitions and the module universe.
//!
//! A [`Module`] describes a physical factory unit: the work types it can
//! perform with their processing times, a 4x4 input-to-output transit-time
//! matrix, a queue length, and a passthrough flag. Modules are registered
//! once in a [`Universe`], which enforces global id uniqueness and hands out
//! stable [`ModuleId`] indices. All runtime layout state (links, active
//! works, flags) lives outside the universe, in [`crate::grid::Grid`].
//!
//! Transport modules are minted lazily from a prototype and recycled through
//! a free pool; they receive synthetic ids `transporter0`, `transporter1`, …

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Stable arena index of a module within a [`Universe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    /// The raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A physical factory module.
///
/// Work types are the keys of the processing-time map; a module with an
/// empty map performs no work and only conveys (a transport).
#[derive(Debug, Clone)]
pub struct Module {
    id: String,
    work_times: BTreeMap<String, u32>,
    transit_times: [[u32; 4]; 4],
    queue_length: u32,
    allow_passthrough: bool,
    is_transport: bool,
}

impl Module {
    /// Create a new module definition.
    pub fn new(
        id: impl Into<String>,
        work_times: BTreeMap<String, u32>,
        transit_times: [[u32; 4]; 4],
        queue_length: u32,
        allow_passthrough: bool,
    ) -> Self {
        Self {
            id: id.into(),
            work_times,
            transit_times,
            queue_length,
            allow_passthrough,
            is_transport: false,
        }
    }

    /// The unique module id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The set of work types this module can perform.
    pub fn work_types(&self) -> impl Iterator<Item = &str> {
        self.work_times.keys().map(String::as_str)
    }

    /// Processing time for a work type, if the module can perform it.
    pub fn processing_time(&self, work: &str) -> Option<u32> {
        self.work_times.get(work).copied()
    }

    /// Whether the module can perform the given work type.
    pub fn can_perform(&self, work: &str) -> bool {
        self.work_times.contains_key(work)
    }

    /// Whether the module's capabilities cover every work type in `works`.
    pub fn can_cover(&self, works: &BTreeSet<String>) -> bool {
        works.iter().all(|w| self.work_times.contains_key(w))
    }

    /// The 4x4 input-to-output transit-time matrix.
    pub fn transit_times(&self) -> &[[u32; 4]; 4] {
        &self.transit_times
    }

    /// How many recipes can queue on this module.
    pub fn queue_length(&self) -> u32 {
        self.queue_length
    }

    /// Whether a recipe may skip working here and go straight to transport.
    pub fn allow_passthrough(&self) -> bool {
        self.allow_passthrough
    }

    /// Whether this module was minted from the transport prototype.
    pub fn is_transport(&self) -> bool {
        self.is_transport
    }
}

/// The registry of every module in a run.
///
/// Work modules are registered once at startup; transport modules are minted
/// on demand and pooled. Ids, once registered, are never removed: a layout
/// string produced at any point during a run can always be decoded again.
#[derive(Debug)]
pub struct Universe {
    modules: Vec<Module>,
    index: HashMap<String, ModuleId>,
    transport_proto: Module,
    free_transports: Vec<ModuleId>,
    next_transport: usize,
}

impl Universe {
    /// Create a universe with the given transport prototype.
    ///
    /// The prototype's work-time map is ignored; transports never work.
    pub fn new(mut transport_proto: Module) -> Self {
        transport_proto.work_times.clear();
        transport_proto.is_transport = true;
        Self {
            modules: Vec::new(),
            index: HashMap::new(),
            transport_proto,
            free_transports: Vec::new(),
            next_transport: 0,
        }
    }

    /// Register a work module, enforcing id uniqueness.
    pub fn register(&mut self, module: Module) -> Result<ModuleId> {
        if self.index.contains_key(&module.id) {
            return Err(Error::ConfigError(format!(
                "module id '{}' is not unique",
                module.id
            )));
        }
        let id = ModuleId(self.modules.len());
        self.index.insert(module.id.clone(), id);
        self.modules.push(module);
        Ok(id)
    }

    /// Look up a module by arena index.
    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    /// Look up a module index by its string id.
    pub fn lookup(&self, id: &str) -> Option<ModuleId> {
        self.index.get(id).copied()
    }

    /// All registered module indices, transports included.
    pub fn ids(&self) -> impl Iterator<Item = ModuleId> {
        (0..self.modules.len()).map(ModuleId)
    }

    /// All registered work-module indices (transports excluded).
    pub fn work_module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.ids().filter(|&id| !self.get(id).is_transport)
    }

    /// Number of registered modules, transports included.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether any module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Take a transport module from the pool, minting a new one if the pool
    /// is empty.
    pub fn take_transport(&mut self) -> ModuleId {
        if let Some(id) = self.free_transports.pop() {
            return id;
        }
        let mut t = self.transport_proto.clone();
        t.id = format!("transporter{}", self.next_transport);
        self.next_transport += 1;
        let id = ModuleId(self.modules.len());
        self.index.insert(t.id.clone(), id);
        self.modules.push(t);
        id
    }

    /// Return a transport module to the pool.
    ///
    /// Releasing a module that is not a transport, or one that is already
    /// pooled, is a no-op.
    pub fn release_transport(&mut self, id: ModuleId) {
        if self.get(id).is_transport && !self.free_transports.contains(&id) {
            self.free_transports.push(id);
        }
    }

    /// Rebuild the free-transport pool so it holds exactly the transports
    /// not named in `placed`. Called by the layout decoder so that the pool
    /// always reflects the currently decoded layout.
    pub fn sync_transport_pool(&mut self, placed: &BTreeSet<ModuleId>) {
        self.free_transports = self
            .ids()
            .filter(|&id| self.get(id).is_transport && !placed.contains(&id))
            .collect();
    }

    /// Whether the given transport currently sits in the free pool.
    pub fn transport_is_free(&self, id: ModuleId) -> bool {
        self.free_transports.contains(&id)
    }
}
