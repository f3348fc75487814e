use anyhow::Result;
use clip_task::launch::{build_model, resolve_env};
use clip_task::{launch, prepare, ClipPipeline, LaunchPlan, Registries, TrainArgs};
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vl_core::{
    Batch, Config, DataLoader, DataLoaders, Device, DistEnv, Epoch, Error, Gradients, Model,
    NormKind, NormLayer, Runner,
};

fn write_cfg(dir: &Path, body: &str) -> Result<std::path::PathBuf> {
    let path = dir.join("experiment.yaml");
    let mut file = std::fs::File::create(&path)?;
    file.write_all(body.as_bytes())?;
    Ok(path)
}

fn args(cfg: &Path, overrides: &[&str]) -> TrainArgs {
    TrainArgs {
        cfg: cfg.to_path_buf(),
        local_rank: 0,
        overrides: overrides.iter().map(|s| s.to_string()).collect(),
    }
}

const SMALL: &str = "\
device:
  name: cpu
model:
  embed_dim: 8
data:
  batch_size: 8
  train_samples: 32
  val_samples: 8
runner:
  epochs: 2
  log_interval: 1
";

/// Model that only counts how often it is stepped
struct CountingModel {
    steps: Arc<AtomicUsize>,
    device: Device,
    layers: Vec<NormLayer>,
}

impl Model for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
    }

    fn norm_layers(&self) -> &[NormLayer] {
        &self.layers
    }

    fn norm_layers_mut(&mut self) -> &mut [NormLayer] {
        &mut self.layers
    }

    fn forward_backward(&self, _batch: &Batch, rows: Range<usize>) -> vl_core::Result<Gradients> {
        Ok(Gradients {
            loss_sum: rows.len() as f64,
            rows: rows.len(),
            values: vec![0.0],
        })
    }

    fn step(&mut self, _grads: &Gradients, _lr: f64) -> vl_core::Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn parameters(&self) -> Vec<f64> {
        vec![]
    }
}

/// Loader yielding a fixed number of single-row batches
struct FixedLoader {
    batches: usize,
}

impl DataLoader for FixedLoader {
    fn len(&self) -> usize {
        self.batches
    }

    fn num_samples(&self) -> usize {
        self.batches
    }

    fn batches(&self, _epoch: Epoch) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new((0..self.batches).map(|_| Batch::new(vec![vec![1.0]], vec![vec![1.0]])))
    }
}

fn counting_registries(steps: Arc<AtomicUsize>, builds: Arc<AtomicUsize>) -> Result<Registries> {
    let mut registries = Registries::empty();
    registries.pipelines.register("clip", move |_cfg: &Config| {
        builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingModel {
            steps: Arc::clone(&steps),
            device: Device::Cpu,
            layers: vec![NormLayer::new("bn", NormKind::BatchNorm)],
        }) as Box<dyn Model>)
    })?;
    registries
        .loaders
        .register("synthetic_clip", |_cfg: &Config| {
            let mut loaders = DataLoaders::new();
            loaders.insert(
                "train".to_string(),
                Box::new(FixedLoader { batches: 3 }) as Box<dyn DataLoader>,
            );
            Ok(loaders)
        })?;
    Ok(registries)
}

#[test]
fn test_end_to_end_with_builtin_registries() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out");
    let cfg = write_cfg(dir.path(), SMALL)?;
    let output_override = format!("runner.output_dir={}", out.display());

    let summary = launch(
        &args(&cfg, &[&output_override]),
        &Registries::with_defaults()?,
        &DistEnv::single(),
    )?;

    assert_eq!(summary.runner, "clip");
    assert_eq!(summary.epochs, 2);
    assert_eq!(summary.steps, 8);
    assert!(summary.final_loss.is_some());
    assert!(summary.val_loss.is_some());

    let snapshot = std::fs::read_to_string(out.join("config_snapshot.yaml"))?;
    let snapshot = Config::from_yaml_str(&snapshot)?;
    assert_eq!(snapshot.get_u64("model.embed_dim")?, 8);
    assert_eq!(
        snapshot.get_str("runner.output_dir")?,
        out.display().to_string()
    );
    Ok(())
}

#[test]
fn test_layer_precedence() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;

    let env = resolve_env(&args(&cfg, &["data.batch_size", "4", "--optim.lr=0.1"]))?;
    let cfg = env.cfg();

    // Default untouched by file or CLI
    assert_eq!(cfg.get_str("model.name")?, "clip");
    // File beats default
    assert_eq!(cfg.get_u64("model.embed_dim")?, 8);
    assert_eq!(cfg.get_u64("runner.epochs")?, 2);
    // CLI beats file and default
    assert_eq!(cfg.get_u64("data.batch_size")?, 4);
    assert_eq!(cfg.get_f64("optim.lr")?, 0.1);

    assert_eq!(env.cfg_snapshot().as_ref(), env.cfg());
    Ok(())
}

#[test]
fn test_runner_invoked_once_with_passthrough() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;
    let steps = Arc::new(AtomicUsize::new(0));
    let builds = Arc::new(AtomicUsize::new(0));
    let registries = counting_registries(Arc::clone(&steps), Arc::clone(&builds))?;

    let env = resolve_env(&args(&cfg, &[]))?;
    let plan = LaunchPlan::resolve(env.cfg(), &env.capabilities(), &registries)?;
    let mut runner = prepare(&env, &plan, &registries)?;

    assert_eq!(runner.name(), "clip");
    assert_eq!(runner.model().name(), "counting");
    assert_eq!(runner.loaders().keys().collect::<Vec<_>>(), vec!["train"]);
    assert_eq!(runner.loaders()["train"].len(), 3);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(steps.load(Ordering::SeqCst), 0);

    let summary = runner.run()?;
    assert_eq!(summary.steps, 6);
    assert_eq!(steps.load(Ordering::SeqCst), 6);
    assert_eq!(summary.val_loss, None);
    Ok(())
}

#[test]
fn test_bsgs_runner_selected_from_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let body = format!("{}  name: clip_bsgs\n  bsgs:\n    subset_size: 3\n", SMALL);
    let cfg = write_cfg(dir.path(), &body)?;

    let summary = launch(
        &args(&cfg, &[]),
        &Registries::with_defaults()?,
        &DistEnv::single(),
    )?;
    assert_eq!(summary.runner, "clip_bsgs");
    assert_eq!(summary.steps, 8);
    Ok(())
}

#[test]
fn test_missing_cfg_is_usage_error() {
    let err = TrainArgs::try_parse_launcher(["clip-train", "--local_rank", "0"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_overrides_before_launcher_flags() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;
    let cfg_arg = cfg.display().to_string();

    let args = TrainArgs::try_parse_launcher([
        "clip-train",
        "runner.name",
        "clip_bsgs",
        "--cfg",
        cfg_arg.as_str(),
        "data.batch_size=4",
        "--local_rank=0",
    ])?;
    assert_eq!(args.cfg, cfg);
    assert_eq!(args.overrides, vec!["runner.name", "clip_bsgs", "data.batch_size=4"]);

    let summary = launch(&args, &Registries::with_defaults()?, &DistEnv::single())?;
    assert_eq!(summary.runner, "clip_bsgs");
    assert_eq!(summary.steps, 16);
    Ok(())
}

#[test]
fn test_invalid_selectors_fail_before_building() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;
    let steps = Arc::new(AtomicUsize::new(0));
    let builds = Arc::new(AtomicUsize::new(0));
    let registries = counting_registries(Arc::clone(&steps), Arc::clone(&builds))?;

    let err = launch(
        &args(&cfg, &["model.syncbn", "True", "dist.name", "horovod"]),
        &registries,
        &DistEnv::single(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotImplemented { .. }));

    let err = launch(
        &args(&cfg, &["data.name", "laion"]),
        &registries,
        &DistEnv::single(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownIdentifier { .. }));

    assert_eq!(builds.load(Ordering::SeqCst), 0);
    assert_eq!(steps.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_unknown_file_key_is_config_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), "model:\n  depth: 12\n")?;

    let err = launch(
        &args(&cfg, &[]),
        &Registries::with_defaults()?,
        &DistEnv::single(),
    )
    .unwrap_err();
    assert!(err.is_config_error());
    Ok(())
}

#[test]
fn test_syncbn_torch_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;
    let env = resolve_env(&args(&cfg, &["model.syncbn", "true"]))?;

    let registries = Registries::with_defaults()?;
    let plan = LaunchPlan::resolve(env.cfg(), &env.capabilities(), &registries)?;
    let model = build_model(&env, &plan, &registries)?;
    assert!(model.is_sync_batchnorm());

    let reference = ClipPipeline::from_cfg(env.cfg())?;
    assert_eq!(model.norm_layers().len(), reference.norm_layers().len());
    Ok(())
}

#[test]
fn test_distributed_rank_outside_world() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = write_cfg(dir.path(), SMALL)?;
    let dist_env = DistEnv {
        world_size: Some(2),
        rank: Some(5),
    };

    let err = launch(&args(&cfg, &[]), &Registries::with_defaults()?, &dist_env).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    Ok(())
}
