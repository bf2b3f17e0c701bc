// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Command, RunArgs};
use orkestra_model::channel::{ChannelFactory, ReplaySource, SharedResilience};
use orkestra_model::resilience::{CircuitBreaker, ConnectionPool, Metrics, RateLimiter, RetryPolicy};
use orkestra_session::{Session, SessionReplaySource};
use orkestra_tools::{CloneRepoTool, Tool, ToolCall};
use orkestra_team::Coordinator;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args).await,
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let roles = orkestra_config::load(args.config.as_deref())?;
    let working_dir = resolve_working_dir(args.repo.as_deref()).await?;
    let in_git_repo = working_dir.join(".git").is_dir();

    let session = if args.replay {
        Session::latest_session(&args.shared_dir).await.context("opening latest session for replay")?
    } else {
        Session::new_session(&args.shared_dir).await.context("creating session directory")?
    };

    let channel_factory = if args.replay {
        let agent_names = discover_agent_names(&session.dir).await?;
        let source = SessionReplaySource::load(&session, &agent_names).await.context("loading replay data")?;
        ChannelFactory::replay(Arc::new(source) as Arc<dyn ReplaySource>)
    } else {
        ChannelFactory::live(Arc::new(default_shared_resilience()))
    };

    let session = Arc::new(session);
    let coordinator = Arc::new(Coordinator::new(roles, channel_factory, session, working_dir, in_git_repo));

    let run_coordinator = Arc::clone(&coordinator);
    let request = args.request.clone();
    let mut run_handle = tokio::spawn(async move { run_coordinator.run(&request).await });

    let report = tokio::select! {
        result = &mut run_handle => result.context("coordinator task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel_all();
            run_handle.await.context("coordinator task panicked")??
        }
    };

    println!("{}", serde_json::to_string_pretty(&report_to_json(&report))?);
    Ok(())
}

/// A [`RetryPolicy`]/rate/breaker configuration with no teacher-mandated
/// tuning knobs exposed via the CLI yet — every live channel shares one of
/// these for the lifetime of a run.
fn default_shared_resilience() -> SharedResilience {
    SharedResilience {
        pool: Arc::new(ConnectionPool::default()),
        rate_limiter: Arc::new(RateLimiter::new(10.0)),
        breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        metrics: Arc::new(Metrics::new()),
        retry: RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(10), 3),
    }
}

/// Scans a session directory for every distinct agent name that produced a
/// per-query trace file (`{agent}_{ticks}.txt`), for bootstrapping a replay
/// source before any role has actually been instantiated.
async fn discover_agent_names(session_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::collections::HashSet::new();
    let mut entries = tokio::fs::read_dir(session_dir).await.with_context(|| format!("reading {}", session_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some(stem) = name.strip_suffix(".txt") else { continue };
        if let Some(idx) = stem.rfind('_') {
            let (agent, ticks) = stem.split_at(idx);
            if ticks[1..].chars().all(|c| c.is_ascii_digit()) && !ticks[1..].is_empty() {
                names.insert(agent.to_string());
            }
        }
    }
    Ok(names.into_iter().collect())
}

fn derive_repo_dir_name(repo_url: &str) -> String {
    let cleaned = repo_url.trim_end_matches('/');
    let base = cleaned.rsplit('/').next().unwrap_or(cleaned);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

fn looks_like_git_url(spec: &str) -> bool {
    spec.starts_with("http://") || spec.starts_with("https://") || spec.starts_with("git@") || spec.starts_with("ssh://")
}

/// Resolves the working directory a run operates in: an existing local
/// path used as-is, a URL cloned into the current directory, or (with no
/// `--repo` given at all) the current directory itself.
async fn resolve_working_dir(repo: Option<&str>) -> anyhow::Result<PathBuf> {
    let Some(spec) = repo else {
        return std::env::current_dir().context("resolving current directory");
    };

    let as_path = PathBuf::from(spec);
    if as_path.is_dir() {
        return Ok(as_path);
    }
    if !looks_like_git_url(spec) {
        anyhow::bail!("--repo '{spec}' is neither an existing directory nor a recognized git URL");
    }

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let dest_dir = derive_repo_dir_name(spec);
    let clone = CloneRepoTool { working_dir: cwd.clone() };
    let output = clone.execute(&ToolCall { id: "cli-bootstrap-clone".into(), name: "clone_repo".into(), args: serde_json::json!({"repo_url": spec, "dest_dir": dest_dir}) }).await;
    if output.is_error {
        anyhow::bail!("cloning {spec}: {}", output.content);
    }
    Ok(cwd.join(dest_dir))
}

fn report_to_json(report: &orkestra_team::CoordinatorReport) -> serde_json::Value {
    let assignments: Vec<serde_json::Value> = report
        .assignments
        .iter()
        .map(|a| {
            serde_json::json!({
                "role": a.role,
                "agent": a.agent,
                "task": a.task,
                "sequence": a.sequence,
                "source": a.source,
                "success": a.success,
                "response": a.response,
                "error": a.error,
                "blockers": a.blockers,
            })
        })
        .collect();
    let final_verification = report.final_verification.as_ref().map(|a| {
        serde_json::json!({
            "role": a.role,
            "agent": a.agent,
            "success": a.success,
            "response": a.response,
            "error": a.error,
        })
    });
    let callbacks: Vec<serde_json::Value> = report
        .callbacks
        .iter()
        .map(|c| serde_json::json!({"agent_name": c.agent_name, "callback_type": format!("{:?}", c.callback_type), "message": c.message}))
        .collect();
    serde_json::json!({
        "assignments": assignments,
        "final_verification": final_verification,
        "callbacks": callbacks,
    })
}

/// Maps `-v` repeat count to a `tracing` filter level; `RUST_LOG` always
/// takes precedence when set.
fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("orkestra={default_level},orkestra_core={default_level},orkestra_team={default_level}")));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).try_init();
}
