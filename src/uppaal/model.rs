// src/uppaal/model.rs

//! Model and query file generation.
//!
//! The template file carries the process templates (`ModuleQueue`,
//! `ModuleWorker`, `ModuleTransporter`, `Recipe`, queue/remover/initializer
//! helpers); this module regenerates the global declaration and system
//! nodes for a concrete layout and rewrites those two nodes in place.
//! Verifier-internal ids are dense integers assigned here; the returned
//! [`ModelMaps`] translate them back to the original module, work-type, and
//! recipe names when the trace is parsed.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};
use crate::grid::Direction;
use crate::module::ModuleId;
use crate::plant::Plant;

const NUMBER_OF_MODULES: &str = "NUMBER_OF_MODULES";
const NUMBER_OF_RECIPES: &str = "NUMBER_OF_RECIPES";
const NUMBER_OF_WORKTYPES: &str = "NUMBER_OF_WORKTYPES";
const NUMBER_OF_OUTPUTS: &str = "NUMBER_OF_OUTPUTS";
const NUMBER_OF_INITS: &str = "NUMBER_OF_INITS";

const NODE_STRUCT: &str = "
typedef struct {
\twid_t work;
\tint number_of_parents;
\tint children[NUMBER_OF_WORKTYPES];
\tint number_of_children;
} node;";

const GLOBAL_FUNCTIONS: &str = "
//Variables used for passing values at handshake
int var = -1;
int var2 = -1;
bool can_continue = true;
bool can_add_recipe = true;

//Functions for tracking completed recipes
bool ra_done[NUMBER_OF_RECIPES];

void init_ra_done(){
    int i;
    for(i = 0; i < NUMBER_OF_RECIPES; ++i)
        ra_done[i] = false;
}

bool is_done(rid_safe_t rid){
    return ra_done[rid];
}


bool current_works[NUMBER_OF_RECIPES][NUMBER_OF_WORKTYPES];

void init_current_works(){
    int i, j;
    for(i = 0; i < NUMBER_OF_RECIPES; ++i)
        for(j = 0; j < NUMBER_OF_WORKTYPES; ++j)
            current_works[i][j] = false;
}


bool can_work(bool worktype[NUMBER_OF_WORKTYPES], rid_safe_t rid){
    int i;
    for(i = 0; i < NUMBER_OF_WORKTYPES; ++i){
        if(worktype[i] &&  current_works[rid][i])
            return true;}
    return false;
}

bool full_modules[NUMBER_OF_MODULES];
bool idle_workers[NUMBER_OF_MODULES];
bool idle_transporters[NUMBER_OF_MODULES];
";

/// Mappings from verifier-internal ids back to the original names.
#[derive(Debug, Clone)]
pub struct ModelMaps {
    /// Verifier module id to original module id.
    pub modules: HashMap<i64, String>,
    /// Verifier work-type id to original work type.
    pub works: HashMap<i64, String>,
    /// Verifier recipe-instance id to recipe name.
    pub recipes: HashMap<i64, String>,
}

/// Generate the model and query files for a layout and return the id maps.
pub fn generate_model(
    template: &Path,
    plant: &Plant,
    placed: &[ModuleId],
    model_out: &Path,
    query_out: &Path,
) -> Result<ModelMaps> {
    let module_ids: HashMap<ModuleId, usize> =
        placed.iter().enumerate().map(|(i, &m)| (m, i)).collect();

    let mut work_types: BTreeSet<String> = BTreeSet::new();
    for &m in placed {
        work_types.extend(plant.universe().get(m).work_types().map(str::to_string));
    }
    let work_ids: HashMap<String, usize> = work_types
        .iter()
        .enumerate()
        .map(|(i, w)| (w.clone(), i))
        .collect();

    let number_of_recipes: usize = plant.recipes().iter().map(|r| r.amount() as usize).sum();

    let global_decls =
        global_declarations(placed.len(), number_of_recipes, work_types.len());
    let (system_decls, recipe_names, recipe_map) =
        system_declaration(plant, placed, &module_ids, &work_ids, work_types.len())?;

    rewrite_template(template, &global_decls, &system_decls, model_out)?;
    write_query(&recipe_names, query_out)?;

    Ok(ModelMaps {
        modules: placed
            .iter()
            .enumerate()
            .map(|(i, &m)| (i as i64, plant.universe().get(m).id().to_string()))
            .collect(),
        works: work_types
            .iter()
            .enumerate()
            .map(|(i, w)| (i as i64, w.clone()))
            .collect(),
        recipes: recipe_map,
    })
}

fn const_int_decl(name: &str, value: impl std::fmt::Display) -> String {
    format!("const int {} = {};\n", name, value)
}

fn typedef_decl(name: &str, max: &str) -> String {
    format!(
        "typedef int[-1, {max} - 1] {name}_t;\ntypedef int[0, {max} - 1] {name}_safe_t;\n",
        max = max,
        name = name
    )
}

fn chan_decl(name: &str, size: Option<&str>, urgent: bool) -> String {
    let mut s = String::new();
    if urgent {
        s.push_str("urgent ");
    }
    s.push_str("chan ");
    s.push_str(name);
    if let Some(size) = size {
        s.push('[');
        s.push_str(size);
        s.push(']');
    }
    s.push_str(";\n");
    s
}

/// The global declaration node: constants, range types, the recipe node
/// struct, channels with their priority chain, the global clock, and the
/// handshake bookkeeping.
fn global_declarations(modules: usize, recipes: usize, work_types: usize) -> String {
    let mut s = String::from("// Global Declarations\n");

    s.push_str("// Constants\n");
    s.push_str(&const_int_decl(NUMBER_OF_MODULES, modules));
    s.push_str(&const_int_decl(NUMBER_OF_RECIPES, recipes));
    s.push_str(&const_int_decl(NUMBER_OF_WORKTYPES, work_types));
    s.push_str(&const_int_decl(NUMBER_OF_OUTPUTS, 4));
    s.push_str(&const_int_decl(NUMBER_OF_INITS, modules * 3 + 2));
    s.push('\n');

    s.push_str("// User defined types.\n");
    s.push_str("// Safe means that we cannot go to -1.\n");
    s.push_str("// -1 is however sometimes needed as a filler value, so it can be permitted.\n");
    s.push_str(&typedef_decl("mid", NUMBER_OF_MODULES));
    s.push_str(&typedef_decl("rid", NUMBER_OF_RECIPES));
    s.push_str(&typedef_decl("wid", NUMBER_OF_WORKTYPES));
    s.push_str(&typedef_decl("did", NUMBER_OF_OUTPUTS));
    s.push('\n');

    s.push_str(NODE_STRUCT);
    s.push('\n');

    s.push_str("// Channels\n");
    s.push_str(&chan_decl("enqueue", Some(NUMBER_OF_MODULES), true));
    s.push_str(&chan_decl("work_dequeue", Some(NUMBER_OF_MODULES), false));
    s.push_str(&chan_decl("transport_dequeue", Some(NUMBER_OF_MODULES), false));
    s.push_str(&chan_decl("intern", Some(NUMBER_OF_MODULES), true));
    s.push_str(&chan_decl("remove", Some(NUMBER_OF_RECIPES), false));
    s.push_str(&chan_decl("rstart", Some(NUMBER_OF_RECIPES), false));
    s.push_str(&chan_decl("handshake", Some(NUMBER_OF_RECIPES), false));
    s.push_str(&chan_decl("work", Some(NUMBER_OF_WORKTYPES), false));
    s.push_str(&chan_decl("initialize", Some(NUMBER_OF_INITS), false));
    s.push_str(&chan_decl("urg", None, true));
    s.push_str(
        "chan priority transport_dequeue < work_dequeue < intern < handshake < work < enqueue \
         < default < rstart < remove < urg;",
    );
    s.push('\n');

    s.push_str("// Global clock\n");
    s.push_str("clock global_c;\n");
    s.push('\n');

    s.push_str(GLOBAL_FUNCTIONS);
    s
}

/// The system node: per-module constant arrays and process instantiations,
/// per-recipe node tables and instances, the recipe queue, and the closing
/// `system` line.
fn system_declaration(
    plant: &Plant,
    placed: &[ModuleId],
    module_ids: &HashMap<ModuleId, usize>,
    work_ids: &HashMap<String, usize>,
    number_of_worktypes: usize,
) -> Result<(String, Vec<String>, HashMap<i64, String>)> {
    let mut s = String::new();
    let mut system_list = Vec::new();
    let mut init_index = 0usize;

    for &m in placed {
        let (decl, processes) = module_declaration(
            plant,
            m,
            module_ids,
            work_ids,
            number_of_worktypes,
            &mut init_index,
        );
        s.push_str(&decl);
        system_list.extend(processes);
    }

    let mut recipe_names = Vec::new();
    let mut recipe_map = HashMap::new();
    let mut recipe_counter = 0usize;
    for recipe in plant.recipes() {
        let decl = recipe_declaration(
            plant,
            recipe.name(),
            module_ids,
            work_ids,
            number_of_worktypes,
            recipe_counter,
            &mut recipe_names,
            &mut recipe_map,
        )?;
        s.push_str(&decl);
        recipe_counter += recipe.amount() as usize;
    }

    // Recipe queue holding every instance id.
    let all_ids: Vec<String> = (0..recipe_counter).map(|i| i.to_string()).collect();
    s.push_str(&format!(
        "rid_t rqa[{}] = {{{}}};\n",
        NUMBER_OF_RECIPES,
        all_ids.join(",")
    ));
    s.push_str(&format!("rqueue = RecipeQueue(rqa, {});\n", init_index));
    system_list.push("rqueue".to_string());
    init_index += 1;

    s.push_str(&format!("rem = Remover({});\n", init_index));
    system_list.push("rem".to_string());

    s.push_str("initer = Initializer();\n");
    system_list.push("initer".to_string());

    s.push_str("urge = Urgent();\n");
    system_list.push("urge".to_string());

    system_list.extend(recipe_names.iter().cloned());
    s.push_str(&format!("system {};", system_list.join("< ")));

    Ok((s, recipe_names, recipe_map))
}

/// Constant arrays and the three process instantiations for one module.
fn module_declaration(
    plant: &Plant,
    module: ModuleId,
    module_ids: &HashMap<ModuleId, usize>,
    work_ids: &HashMap<String, usize>,
    number_of_worktypes: usize,
    init_index: &mut usize,
) -> (String, Vec<String>) {
    let def = plant.universe().get(module);
    let m_id = module_ids[&module];
    let mut s = format!("// Module {}\n", m_id);

    // work_array: which work types the module can perform.
    let work_array = format!("work_array{}", m_id);
    let flags: Vec<&str> = (0..number_of_worktypes)
        .map(|w| {
            let capable = def
                .work_types()
                .any(|wt| work_ids[wt] == w);
            if capable {
                "true"
            } else {
                "false"
            }
        })
        .collect();
    s.push_str(&format!(
        "const bool {}[{}] = {{{}}};\n",
        work_array,
        NUMBER_OF_WORKTYPES,
        flags.join(",")
    ));

    // ptime_array: processing time per work type, 0 where not capable.
    let ptime_array = format!("ptime_array{}", m_id);
    let mut times = vec!["0".to_string(); number_of_worktypes];
    for wt in def.work_types() {
        if let Some(p) = def.processing_time(wt) {
            times[work_ids[wt]] = p.to_string();
        }
    }
    s.push_str(&format!(
        "const int {}[{}] = {{{}}};\n",
        ptime_array,
        NUMBER_OF_WORKTYPES,
        times.join(",")
    ));

    // next_array: the neighbor in each output direction, -1 for none.
    let next_array = format!("next_array{}", m_id);
    let nexts: Vec<String> = Direction::ALL
        .iter()
        .map(|&d| match plant.grid().link(module, d) {
            Some(n) => module_ids
                .get(&n)
                .map(|&i| i.to_string())
                .unwrap_or_else(|| "-1".to_string()),
            None => "-1".to_string(),
        })
        .collect();
    s.push_str(&format!(
        "const mid_t {}[{}] = {{{}}};\n",
        next_array,
        NUMBER_OF_OUTPUTS,
        nexts.join(",")
    ));

    // ttime_array: input-to-output transit times.
    let ttime_array = format!("ttime_array{}", m_id);
    let rows: Vec<String> = def
        .transit_times()
        .iter()
        .map(|row| {
            format!(
                "{{{}}}",
                row.iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            )
        })
        .collect();
    s.push_str(&format!(
        "const int {}[{}][{}] = {{{}}};\n",
        ttime_array,
        NUMBER_OF_OUTPUTS,
        NUMBER_OF_OUTPUTS,
        rows.join(",")
    ));

    let queue = format!("mqueue{}", m_id);
    s.push_str(&format!(
        "{} = ModuleQueue({}, {}, {}, {}, {});\n",
        queue,
        m_id,
        init_index,
        def.queue_length(),
        work_array,
        def.allow_passthrough()
    ));
    *init_index += 1;

    let worker = format!("mworker{}", m_id);
    s.push_str(&format!(
        "{} = ModuleWorker({}, {}, {}, {});\n",
        worker, m_id, init_index, work_array, ptime_array
    ));
    *init_index += 1;

    let transporter = format!("mtransporter{}", m_id);
    s.push_str(&format!(
        "{} = ModuleTransporter({}, {}, {}, {}, {});\n\n",
        transporter,
        m_id,
        init_index,
        ttime_array,
        next_array,
        def.allow_passthrough()
    ));
    *init_index += 1;

    (s, vec![queue, worker, transporter])
}

/// Node table and one `Recipe` instance per unit of amount.
#[allow(clippy::too_many_arguments)]
fn recipe_declaration(
    plant: &Plant,
    name: &str,
    module_ids: &HashMap<ModuleId, usize>,
    work_ids: &HashMap<String, usize>,
    number_of_worktypes: usize,
    counter: usize,
    recipe_names: &mut Vec<String>,
    recipe_map: &mut HashMap<i64, String>,
) -> Result<String> {
    let recipe = plant
        .recipes()
        .iter()
        .find(|r| r.name() == name)
        .ok_or_else(|| Error::VerifierError(format!("unknown recipe '{}'", name)))?;

    let (node_strings, number_of_nodes) =
        recipe_nodes(recipe.items().collect::<Vec<_>>().as_slice(), work_ids, number_of_worktypes);

    let mut s = format!("// Recipe {}\n", name);

    let mut node_names = Vec::new();
    for (index, node) in node_strings.iter().enumerate() {
        let node_name = format!("r{}node{}", name, index);
        s.push_str(&format!("const node {} = {};\n", node_name, node));
        node_names.push(node_name);
    }

    let func_dep = format!("func_dep{}", name);
    s.push_str(&format!(
        "node {}[{}] = {{{}}};\n",
        func_dep,
        NUMBER_OF_WORKTYPES,
        node_names.join(",")
    ));

    let nodes_const = format!("number_of_nodes{}", name);
    s.push_str(&const_int_decl(&nodes_const, number_of_nodes));

    let (start_module, start_direction) = plant
        .start_of(name)
        .ok_or_else(|| Error::VerifierError(format!("recipe '{}' has no start module", name)))?;
    let start_mid = module_ids.get(&start_module).copied().ok_or_else(|| {
        Error::VerifierError(format!("start module of recipe '{}' is not in the layout", name))
    })?;

    for instance in 0..recipe.amount() as usize {
        let r_id = counter + instance;
        let instance_name = format!("recipe{}", r_id);
        s.push_str(&format!(
            "{} = Recipe({}, {}, {}, {}, {});\n\n",
            instance_name,
            r_id,
            start_mid,
            func_dep,
            nodes_const,
            start_direction.index()
        ));
        recipe_names.push(instance_name);
        recipe_map.insert(r_id as i64, name.to_string());
    }

    Ok(s)
}

/// Build the `node` struct literals for a recipe's dependency table, padded
/// with empty nodes to the work-type count.
fn recipe_nodes(
    items: &[(&str, &std::collections::BTreeSet<String>)],
    work_ids: &HashMap<String, usize>,
    number_of_worktypes: usize,
) -> (Vec<String>, usize) {
    // First pass: children as work ids, and the work-id -> node-index map.
    let mut child_mapping: HashMap<i64, i64> = HashMap::new();
    child_mapping.insert(-1, -1);
    let mut nodes: Vec<(usize, usize, Vec<i64>)> = Vec::new();

    for (index, &(work, parents)) in items.iter().enumerate() {
        let mut children: Vec<i64> = Vec::new();
        for &(other, other_parents) in items {
            if other_parents.contains(work) {
                children.push(work_ids[other] as i64);
            }
        }
        while children.len() < number_of_worktypes {
            children.push(-1);
        }
        child_mapping.insert(work_ids[work] as i64, index as i64);
        nodes.push((work_ids[work], parents.len(), children));
    }

    // Second pass: remap children from work ids to node indices.
    let mut node_strings = Vec::new();
    for (work_id, parents, children) in &nodes {
        let mapped: Vec<String> = children
            .iter()
            .map(|c| child_mapping[c].to_string())
            .collect();
        let number_of_children = children.iter().filter(|&&c| c != -1).count();
        node_strings.push(format!(
            "{{{}, {}, {{{}}}, {}}}",
            work_id,
            parents,
            mapped.join(", "),
            number_of_children
        ));
    }

    let number_of_nodes = node_strings.len();
    while node_strings.len() < number_of_worktypes {
        node_strings.push(empty_node(number_of_worktypes));
    }
    (node_strings, number_of_nodes)
}

fn empty_node(number_of_worktypes: usize) -> String {
    let filler = vec!["-1"; number_of_worktypes].join(",");
    format!("{{ -1, -1, {{{}}}, -1}}", filler)
}

/// Rewrite the template's root-level `declaration` and `system` nodes.
fn rewrite_template(
    template: &Path,
    global_decls: &str,
    system_decls: &str,
    out: &Path,
) -> Result<()> {
    let source = fs::read_to_string(template)?;
    let mut reader = Reader::from_str(&source);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::VerifierError(format!("template parse error: {}", e)))?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let name = start.name().as_ref().to_vec();
                let replacement = if depth == 1 && name == b"declaration" {
                    Some(global_decls)
                } else if depth == 1 && name == b"system" {
                    Some(system_decls)
                } else {
                    None
                };
                if let Some(text) = replacement {
                    writer
                        .write_event(Event::Start(start.to_owned()))
                        .map_err(io_error)?;
                    reader
                        .read_to_end(quick_xml::name::QName(&name))
                        .map_err(|e| Error::VerifierError(format!("template parse error: {}", e)))?;
                    writer
                        .write_event(Event::Text(BytesText::new(text)))
                        .map_err(io_error)?;
                    writer
                        .write_event(Event::End(BytesEnd::new(
                            String::from_utf8_lossy(&name).into_owned(),
                        )))
                        .map_err(io_error)?;
                } else {
                    depth += 1;
                    writer
                        .write_event(Event::Start(start.to_owned()))
                        .map_err(io_error)?;
                }
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(end.to_owned())).map_err(io_error)?;
            }
            other => {
                writer.write_event(other.into_owned()).map_err(io_error)?;
            }
        }
    }

    fs::write(out, writer.into_inner())?;
    Ok(())
}

fn io_error(e: quick_xml::Error) -> Error {
    Error::VerifierError(format!("template write error: {}", e))
}

/// One reachability query: every recipe instance reaches `done`.
fn write_query(recipe_names: &[String], out: &Path) -> Result<()> {
    let clauses: Vec<String> = recipe_names
        .iter()
        .map(|name| format!("{}.done", name))
        .collect();
    fs::write(out, format!("E<> {}", clauses.join(" and ")))?;
    Ok(())
}
