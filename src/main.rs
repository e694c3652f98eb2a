// src/main.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use fabrik::{
    compose_recipes, load_plant, tabu_search, SearchConfig, SeedGenerator, UppaalOracle,
};

#[derive(Parser)]
#[command(name = "fabrik")]
#[command(author, version, about = "Layout search for reconfigurable manufacturing lines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for a minimal-makespan layout of the plant
    Search {
        /// Path to the plant description (JSON)
        plant: PathBuf,

        /// Path to the UPPAAL model template
        #[arg(long)]
        template: PathBuf,

        /// Path to the verifyta binary
        #[arg(long)]
        verifyta: PathBuf,

        /// Number of search iterations
        #[arg(long, default_value_t = 50)]
        iters: usize,

        /// Capacity of the short-term tabu memory
        #[arg(long = "short-term", default_value_t = 10)]
        short_term: usize,

        /// How many seed layouts to draw before searching
        #[arg(long = "max-seeds", default_value_t = 10)]
        max_seeds: usize,

        /// Seed for the search's randomness (omit for entropy)
        #[arg(long)]
        seed: Option<u64>,

        /// Verifier timeout per layout, in seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Enumerate seed layouts without scoring them
    Seeds {
        /// Path to the plant description (JSON)
        plant: PathBuf,

        /// How many seed layouts to enumerate
        #[arg(long = "max-seeds", default_value_t = 10)]
        max_seeds: usize,

        /// Seed for the generator's randomness (omit for entropy)
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Validate a plant description
    Check {
        /// Path to the plant description (JSON)
        plant: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Search {
            plant,
            template,
            verifyta,
            iters,
            short_term,
            max_seeds,
            seed,
            timeout,
        } => cmd_search(
            &plant, &template, &verifyta, iters, short_term, max_seeds, seed, timeout,
        ),
        Commands::Seeds {
            plant,
            max_seeds,
            seed,
        } => cmd_seeds(&plant, max_seeds, seed),
        Commands::Check { plant } => cmd_check(&plant),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    plant_path: &Path,
    template: &Path,
    verifyta: &Path,
    iters: usize,
    short_term: usize,
    max_seeds: usize,
    seed: Option<u64>,
    timeout: u64,
) -> Result<()> {
    let mut plant = load_plant(plant_path)
        .with_context(|| format!("loading plant from {}", plant_path.display()))?;
    let mut oracle = UppaalOracle::new(template, verifyta)
        .context("setting up the verifier work directory")?
        .with_timeout(Duration::from_secs(timeout));
    let mut rng = rng_from(seed);
    let config = SearchConfig {
        iters,
        short_term_size: short_term,
        max_initial_configs: max_seeds,
    };

    let results = tabu_search(&mut plant, &mut oracle, &config, &mut rng)
        .context("layout search failed")?;

    let (_, best) = results.first().context("search returned no layout")?;
    info!("best makespan: {}", best);
    for (layout, makespan) in &results {
        println!("{}\t{}", makespan, layout);
    }
    Ok(())
}

fn cmd_seeds(plant_path: &Path, max_seeds: usize, seed: Option<u64>) -> Result<()> {
    let mut plant = load_plant(plant_path)
        .with_context(|| format!("loading plant from {}", plant_path.display()))?;
    let mut rng = rng_from(seed);
    let mut count = 0usize;
    for layout in SeedGenerator::new(&mut plant, &mut rng).take(max_seeds) {
        println!("{}", layout);
        count += 1;
    }
    if count == 0 {
        anyhow::bail!("the seed generator produced no layout");
    }
    info!("{} seed layout(s)", count);
    Ok(())
}

fn cmd_check(plant_path: &Path) -> Result<()> {
    let plant = load_plant(plant_path)
        .with_context(|| format!("loading plant from {}", plant_path.display()))?;
    let graph = compose_recipes(plant.recipes());
    let cyclic = graph.has_cycle();

    println!(
        "{} module(s), {} recipe(s), {} work type(s){}",
        plant.universe().len(),
        plant.recipes().len(),
        graph.len(),
        if cyclic { ", CYCLIC dependencies" } else { "" }
    );
    if cyclic {
        anyhow::bail!("the composed recipe graph has a cycle; no layout can be seeded");
    }
    Ok(())
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
