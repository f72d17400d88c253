mod archive;
mod classfile;
mod config;
mod distance;
mod dot;
mod graph;
mod hierarchy;
mod ir;
mod logging;
#[cfg(test)]
mod testkit;
mod tree;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::distance::Target;
use crate::hierarchy::HierarchyIndex;
use crate::tree::DistanceTree;

/// CLI arguments for one analysis run.
#[derive(Parser, Debug)]
#[command(
    name = "beeline",
    about = "Directed call-graph distance analysis for JVM application archives.",
    version
)]
struct Cli {
    /// Application archive to analyze.
    #[arg(short = 'f', long, value_name = "PATH")]
    file: PathBuf,
    /// Target method, as fully.qualified.ClassName:methodName.
    #[arg(short = 't', long = "target", value_name = "SPEC", required = true)]
    targets: Vec<String>,
    /// Where to write the distance tree consumed by the instrumentation side.
    #[arg(long, value_name = "PATH", default_value = "distance_tree.json")]
    output: PathBuf,
    /// Where to write the dot rendering of the call graph.
    #[arg(long, value_name = "PATH", default_value = "callgraph.dot")]
    dot: PathBuf,
    /// Annotation descriptor suffix marking entry-point methods (repeatable).
    #[arg(long = "entry-marker", value_name = "SUFFIX")]
    entry_markers: Vec<String>,
    /// Class-name prefix excluded from entry discovery (repeatable).
    #[arg(long = "exclude-prefix", value_name = "PREFIX")]
    exclude_prefixes: Vec<String>,
}

fn main() -> Result<()> {
    logging::init();
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    if !cli.file.exists() {
        anyhow::bail!("input not found: {}", cli.file.display());
    }
    if cli.targets.len() > 1 {
        warn!("multiple targets are not supported; using the first");
    }
    let target = Target::parse(&cli.targets[0])?;

    let mut config = AnalysisConfig::default();
    if !cli.entry_markers.is_empty() {
        config.entry_markers = cli.entry_markers.clone();
    }
    config
        .exclude_prefixes
        .extend(cli.exclude_prefixes.iter().cloned());

    info!("loading archive {}", cli.file.display());
    let archive = archive::load_archive(&cli.file)?;
    info!("loaded {} classes", archive.class_count());

    let hierarchy = HierarchyIndex::build(&archive);

    info!("constructing call graph");
    let mut graph = graph::construct(&archive, &hierarchy, &config, |method| {
        config.is_entry_method(method)
    })?;

    info!("writing dot graph to {}", cli.dot.display());
    dot::write(&graph, &archive, &cli.dot)?;

    info!("computing distances to {}", target.dotted());
    distance::compute_distances(&mut graph, &archive, &target)?;

    info!("writing distance tree to {}", cli.output.display());
    DistanceTree::build(&graph, &archive).save(&cli.output)?;

    Ok(())
}
