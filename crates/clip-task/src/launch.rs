//! CLIP training launcher
//!
//! Resolves the configuration, validates every name-based selector before
//! any side effect, initializes the device, builds the model and loaders
//! from the registries and hands them to the selected runner.

use crate::config::{task_cfg_init_fn, update_clip_config};
use crate::data::build_synthetic_loaders;
use crate::model::ClipPipeline;
use crate::runner::{build_runner, RunnerKind};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use vl_core::{
    build_from_cfg, convert_sync_batchnorm, init_device, update_cfg, Capabilities, Config,
    DataLoaders, DistEnv, Env, Model, Registry, Result, RunSummary, Runner, SyncBnBackend,
};

/// Name of the registry holding model pipelines
pub const PIPELINE: &str = "PIPELINE";

/// Name of the registry holding data-loader factories
pub const DATALOADER: &str = "DATALOADER";

/// Command-line arguments of `clip-train`
#[derive(Parser, Debug, Clone)]
#[command(name = "clip-train", about = "CLIP contrastive training")]
pub struct TrainArgs {
    /// Experiment configuration file (YAML)
    #[arg(long, value_name = "PATH")]
    pub cfg: PathBuf,

    /// Process rank on this node, as set by distributed launchers
    #[arg(long = "local_rank", env = "LOCAL_RANK", default_value_t = 0)]
    pub local_rank: u32,

    /// Config overrides as `key value` pairs or `key=value`
    #[arg(
        value_name = "OVERRIDES",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub overrides: Vec<String>,
}

/// Launcher flags that take a value
const VALUE_FLAGS: [&str; 2] = ["--cfg", "--local_rank"];

/// Launcher flags without a value
const BARE_FLAGS: [&str; 2] = ["-h", "--help"];

impl TrainArgs {
    /// Parse a full argv where launcher flags may sit anywhere among the overrides
    pub fn try_parse_launcher<I, T>(argv: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::try_parse_from(hoist_launcher_flags(argv.into_iter().map(Into::into)))
    }
}

/// Move launcher flags ahead of the override tokens
///
/// The first token is the binary name. Everything that is not a launcher
/// flag keeps its relative order behind a `--` separator.
fn hoist_launcher_flags(mut argv: impl Iterator<Item = String>) -> Vec<String> {
    let mut flags: Vec<String> = argv.next().into_iter().collect();
    let mut overrides = Vec::new();

    while let Some(token) = argv.next() {
        if VALUE_FLAGS.contains(&token.as_str()) {
            flags.push(token);
            flags.extend(argv.next());
        } else if BARE_FLAGS.contains(&token.as_str())
            || VALUE_FLAGS
                .iter()
                .any(|flag| token.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')))
        {
            flags.push(token);
        } else if token != "--" {
            overrides.push(token);
        }
    }

    flags.push("--".to_string());
    flags.extend(overrides);
    flags
}

/// Model and data-loader registries consulted by the launcher
pub struct Registries {
    pub pipelines: Registry<Box<dyn Model>>,
    pub loaders: Registry<DataLoaders>,
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            pipelines: Registry::new(PIPELINE),
            loaders: Registry::new(DATALOADER),
        }
    }

    /// Registries holding the built-in `clip` pipeline and `synthetic_clip` loader
    pub fn with_defaults() -> Result<Self> {
        let mut registries = Self::empty();
        registries.pipelines.register("clip", ClipPipeline::from_cfg)?;
        registries
            .loaders
            .register("synthetic_clip", build_synthetic_loaders)?;
        Ok(registries)
    }
}

/// Selectors resolved from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub model: String,
    pub data: String,
    /// Conversion backend, present only when `model.syncbn` is on
    pub syncbn: Option<SyncBnBackend>,
    pub runner: RunnerKind,
}

impl LaunchPlan {
    /// Check every selector against the registries and capabilities
    pub fn resolve(
        cfg: &Config,
        capabilities: &Capabilities,
        registries: &Registries,
    ) -> Result<Self> {
        let model = cfg.get_str("model.name")?.to_string();
        registries.pipelines.ensure(&model)?;

        let data = cfg.get_str("data.name")?.to_string();
        registries.loaders.ensure(&data)?;

        let syncbn = resolve_syncbn(cfg)?;
        if let Some(backend) = syncbn {
            backend.ensure_available(capabilities)?;
        }

        Ok(Self {
            model,
            data,
            syncbn,
            runner: RunnerKind::from_cfg(cfg),
        })
    }
}

/// Backend for sync batch-norm; `dist.name` is only read when `model.syncbn` is on
fn resolve_syncbn(cfg: &Config) -> Result<Option<SyncBnBackend>> {
    if !cfg.get_bool("model.syncbn")? {
        return Ok(None);
    }
    SyncBnBackend::from_name(cfg.get_str("dist.name")?).map(Some)
}

/// Merge defaults, the experiment file and overrides into a fresh [`Env`]
pub fn resolve_env(args: &TrainArgs) -> Result<Env> {
    let cfg = update_cfg(
        task_cfg_init_fn,
        &args.cfg,
        &args.overrides,
        Some(update_clip_config),
    )?;
    Ok(Env::new(cfg, args.local_rank))
}

/// Build the planned model on the environment's device
///
/// When the plan carries a sync batch-norm backend the model's batch-norm
/// layers are converted with it.
pub fn build_model(
    env: &Env,
    plan: &LaunchPlan,
    registries: &Registries,
) -> Result<Box<dyn Model>> {
    let mut model = build_from_cfg(&plan.model, env.cfg(), &registries.pipelines)?;
    model.to_device(env.device());

    if let Some(backend) = plan.syncbn {
        convert_sync_batchnorm(model.as_mut(), backend, &env.capabilities())?;
    }
    Ok(model)
}

/// Build the model, loaders and the planned runner
pub fn prepare(env: &Env, plan: &LaunchPlan, registries: &Registries) -> Result<Box<dyn Runner>> {
    let cfg = env.cfg();
    let model = build_model(env, plan, registries)?;
    let loaders = build_from_cfg(&plan.data, cfg, &registries.loaders)?;
    build_runner(plan.runner, cfg, loaders, model)
}

/// Full launch: configuration, validation, device, snapshot, training
pub fn launch(args: &TrainArgs, registries: &Registries, dist_env: &DistEnv) -> Result<RunSummary> {
    let mut env = resolve_env(args)?;
    let plan = LaunchPlan::resolve(env.cfg(), &env.capabilities(), registries)?;
    info!(
        model = %plan.model,
        data = %plan.data,
        syncbn = ?plan.syncbn,
        runner = plan.runner.as_str(),
        "Resolved launch plan"
    );

    init_device(&mut env, dist_env)?;

    let output_dir = env.cfg().get_str("runner.output_dir")?;
    if !output_dir.is_empty() && env.is_main_process() {
        env.write_snapshot(&PathBuf::from(output_dir))?;
    }

    let mut runner = prepare(&env, &plan, registries)?;
    let summary = runner.run()?;
    info!(
        runner = %summary.runner,
        steps = summary.steps,
        final_loss = summary.final_loss.unwrap_or_default(),
        "Training finished"
    );
    Ok(summary)
}
