//! sdm-daemon - delivery-goal orchestration daemon.
//!
//! One binary, two entrypoints: started normally it runs the full event
//! loop; started with `ATOMIST_ISOLATED_GOAL=true` it fulfills exactly one
//! goal and exits. Both share the dispatcher core, so an isolated worker
//! behaves byte-for-byte like the in-process path.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sdm_core::config::{SchedulerKind, SdmConfig};
use sdm_core::plan::Planner;
use sdm_core::push::{
    ChangeLookup, LocalProjectLoader, PushTestError, PushTestRegistry, RepoRef,
};
use sdm_core::sign::{GoalSigner, GoalVerifier};

use sdm_daemon::admin::DeployEnabled;
use sdm_daemon::bus::{EventBus, InMemoryBus};
use sdm_daemon::context::{SdmContext, SdmContextBuilder};
use sdm_daemon::dispatch::RegistrationInfo;
use sdm_daemon::handlers::run_event_loop;
use sdm_daemon::schedule::{
    spawn_cleanup, GoalScheduler, Kubectl, KubernetesGoalScheduler, SubprocessScheduler,
};
use sdm_daemon::status::{HttpStatusPublisher, NoopStatusPublisher, StatusPublisher};
use sdm_daemon::store::InMemoryStore;
use sdm_daemon::worker::{run_isolated_goal, IsolatedGoalEnv};

/// sdm-daemon - delivery-goal orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "sdm-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SDM configuration file
    #[arg(short, long, default_value = "sdm.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Root directory for project views (the worker's clone location)
    #[arg(long, default_value = "/atm/home")]
    project_root: PathBuf,
}

/// Changed-file lookup used until a provider client is wired in; answers
/// with no changes so material-change tests stay decidable.
struct NoChanges;

#[async_trait]
impl ChangeLookup for NoChanges {
    async fn changed_files(
        &self,
        repo: &RepoRef,
        _before: &str,
        _after: &str,
    ) -> Result<Vec<String>, PushTestError> {
        warn!(repo = %repo, "no change lookup configured, assuming no changed files");
        Ok(Vec::new())
    }
}

fn build_context(
    config: &SdmConfig,
    args: &Args,
    isolated: bool,
) -> Result<(SdmContext, Arc<InMemoryBus>)> {
    let bus = Arc::new(InMemoryBus::default());
    let store = Arc::new(InMemoryStore::with_bus(bus.clone()));

    let registration = RegistrationInfo {
        name: config.name.clone(),
        version: config.version.clone(),
    };
    let mut push_tests = PushTestRegistry::new();
    push_tests.register(Arc::new(DeployEnabled::new(store.clone())));
    let planner = Arc::new(
        Planner::new(config.name.clone(), config.version.clone()).registry(push_tests),
    );

    let status: Arc<dyn StatusPublisher> = match &config.status.endpoint {
        Some(endpoint) => Arc::new(HttpStatusPublisher::new(endpoint.clone())),
        None => Arc::new(NoopStatusPublisher),
    };

    let mut builder = SdmContextBuilder::new(
        registration,
        config.workspace_id.clone(),
        store,
        planner,
        Arc::new(LocalProjectLoader::new(args.project_root.clone())),
        Arc::new(NoChanges),
        status,
    );
    if let Some(name) = &config.workspace_name {
        builder = builder.workspace_name(name.clone());
    }

    if config.signing.enabled {
        let pem = config
            .signing
            .resolve_signing_key()?
            .context("signing enabled without key material")?;
        let signer = Arc::new(GoalSigner::from_pem(&pem)?);
        let verifier = Arc::new(GoalVerifier::from_pems(
            config.signing.verification_keys.iter(),
        )?);
        builder = builder.signing(signer, verifier);
    }

    // An isolated worker fulfills its one goal in-process; wiring a
    // scheduler into it would bounce the goal right back out.
    let scheduler: Option<Arc<dyn GoalScheduler>> = match config.scheduler {
        _ if isolated => None,
        SchedulerKind::InProcess => None,
        SchedulerKind::Subprocess => Some(Arc::new(SubprocessScheduler::new(Some(
            args.config.display().to_string(),
        )))),
        SchedulerKind::Kubernetes => Some(Arc::new(KubernetesGoalScheduler::new(
            Arc::new(Kubectl),
            config.kubernetes.clone(),
            config.workspace_id.clone(),
            config.workspace_name.clone(),
        ))),
    };
    if let Some(scheduler) = scheduler {
        builder = builder.scheduler(scheduler);
    }

    Ok((builder.build(), bus))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = SdmConfig::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;

    // Worker entrypoint: fulfill one goal, then exit.
    if let Some(assignment) = IsolatedGoalEnv::from_env()? {
        let (ctx, _bus) = build_context(&config, &args, true)?;
        let code = run_isolated_goal(&ctx, &assignment).await?;
        std::process::exit(code);
    }

    info!(
        registration = %config.name,
        version = %config.version,
        workspace = %config.workspace_id,
        "starting sdm-daemon"
    );

    let (ctx, bus) = build_context(&config, &args, false)?;
    let receiver = bus.subscribe();

    let cleanup = if config.scheduler == SchedulerKind::Kubernetes {
        spawn_cleanup(Arc::new(Kubectl), &config.kubernetes)
    } else {
        None
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::select! {
        () = run_event_loop(&ctx, receiver) => {},
        result = shutdown => {
            result.context("listening for shutdown signal")?;
            info!("shutdown signal received");
        },
    }

    if let Some(handle) = cleanup {
        handle.abort();
    }
    Ok(())
}
