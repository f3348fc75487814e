//! CLIP training entry point
//!
//! Usage: `clip-train --cfg <PATH> [--local_rank N] [key value ...]`
//!
//! `--cfg` and `--local_rank` may also follow the overrides.

use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clip_task::{launch, Registries, TrainArgs};
use vl_core::DistEnv;

fn main() -> ExitCode {
    let argv = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let args = TrainArgs::try_parse_launcher(argv).unwrap_or_else(|e| e.exit());

    // Only the first process on a node logs progress by default
    let default_filter = if args.local_rank == 0 {
        "clip_task=info,vl_core=info"
    } else {
        "clip_task=warn,vl_core=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = Registries::with_defaults()
        .and_then(|registries| launch(&args, &registries, &DistEnv::from_process()));

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Launch failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
