//! The `cardmap run` command driving the full pipeline.

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use cardmap_core::{CardmapError, Config, Orchestrator, PipelineError, Step};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Card manifest file (JSON or JSONL) or image directory
    #[arg(required = true)]
    pub input: PathBuf,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Artifact directory (overrides config)
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Discard previous progress and run every step fresh
    #[arg(long)]
    pub overwrite: bool,

    /// Run only these steps (comma-separated: filter, embed, cluster,
    /// tag, assemble), recomputing them from the persisted artifacts
    #[arg(long, value_delimiter = ',', value_parser = parse_step)]
    pub steps: Vec<Step>,

    /// Target number of leaf clusters (overrides config)
    #[arg(long)]
    pub target_leaves: Option<usize>,

    /// Candidates sampled per topic, 0 for all (overrides config)
    #[arg(long)]
    pub pool_per_topic: Option<usize>,

    /// Skip vision labeling and use keyword-derived placeholder tags
    #[arg(long)]
    pub skip_labeling: bool,

    /// Skip the filter approval checkpoint
    #[arg(long)]
    pub no_approval: bool,
}

/// Parse a step name as accepted by `--steps`.
fn parse_step(value: &str) -> Result<Step, String> {
    Step::all()
        .into_iter()
        .find(|step| step.name() == value)
        .ok_or_else(|| {
            format!("unknown step '{value}' (expected filter, embed, cluster, tag or assemble)")
        })
}

/// Load the config and apply CLI overrides.
fn build_config(args: &RunArgs) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &args.artifact_dir {
        config.output.artifact_dir = dir.clone();
    }
    if let Some(target) = args.target_leaves {
        config.clustering.target_leaf_count = target;
    }
    if let Some(pool) = args.pool_per_topic {
        config.intake.pool_per_topic = pool;
    }
    if args.skip_labeling {
        config.labeling.enabled = false;
    }
    if args.no_approval {
        config.filter.require_approval = false;
    }
    Ok(config)
}

/// Execute the run command.
pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let orchestrator = Orchestrator::new(config);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .expect("static template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    spinner.set_message("Running pipeline...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let selection = (!args.steps.is_empty()).then_some(args.steps.as_slice());
    let result = orchestrator
        .run_steps(&args.input, args.overwrite, selection)
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(stats) => {
            println!("{}", style("Pipeline complete").green().bold());
            println!("  Admitted:      {}", stats.admitted);
            println!("  Rejected:      {}", stats.rejected);
            println!("  Dropped:       {}", stats.dropped);
            println!("  Leaf clusters: {}", stats.leaves);
            println!("  Vision tags:   {}", stats.vision_tagged);
            if selection.map_or(true, |steps| steps.contains(&Step::Assemble)) {
                println!(
                    "\nDataset written to {}",
                    orchestrator
                        .store()
                        .path(cardmap_core::pipeline::DATASET_FILE)
                        .display()
                );
            }
            Ok(())
        }
        Err(CardmapError::Pipeline(PipelineError::AwaitingApproval(path))) => {
            println!(
                "{}",
                style("Filter output awaits approval").yellow().bold()
            );
            println!("  Review: {}", path.display());
            println!(
                "  Approve with {} and re-run to continue.",
                style("cardmap approve").cyan()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
