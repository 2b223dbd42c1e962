// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::cli::{ApproveMode, CliArgs};
use crate::config::{load_and_validate, PlanFile};
use crate::dag::{CapabilityProvider, CapabilitySet, RunStatistics, TaskId, TaskResult};
use crate::engine::{
    ApprovalAuthority, FixedApproval, Orchestrator, PromptApproval, TracingObserver,
};
use crate::exec::CommandBackend;

pub use crate::dag::{Task, TaskStatus};
pub use crate::errors::{GatedagError, TaskError};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and CLI overrides
/// - an orchestrator over the process-backed `CommandBackend`
/// - approval mode and capabilities
/// - Ctrl-C handling (interrupts the run and cleans up)
///
/// Returns `true` when every task completed.
pub async fn run(args: CliArgs) -> Result<bool> {
    let plan_path = PathBuf::from(&args.plan);
    let mut plan = load_and_validate(&plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;

    if let Some(n) = args.max_concurrent {
        if n == 0 {
            bail!("--max-concurrent must be >= 1");
        }
        plan.options.max_concurrent = n;
    }

    let capabilities = CapabilitySet::new(
        plan.capabilities
            .iter()
            .chain(args.capabilities.iter())
            .cloned(),
    );

    if args.dry_run {
        print_dry_run(&plan, &capabilities);
        return Ok(true);
    }

    let orchestrator = Orchestrator::builder(Arc::new(CommandBackend::new()))
        .options(plan.options.clone())
        .capabilities(Arc::new(capabilities))
        .build();
    orchestrator.add_observer(Arc::new(TracingObserver));
    orchestrator.set_approval_authority(approval_authority(args.approve));

    for task in plan.tasks {
        orchestrator.add_task(task)?;
    }

    let interrupted = tokio::select! {
        res = orchestrator.run_all() => {
            res?;
            false
        }
        _ = shutdown_signal() => {
            warn!("interrupted; stopping work units");
            true
        }
    };

    let stats = orchestrator.get_statistics();
    let results = orchestrator.get_all_results();
    if args.json {
        print_json(&stats, &results)?;
    } else {
        print_summary(&stats, &results);
    }

    let report = orchestrator.cleanup().await;
    for err in &report.errors {
        warn!(error = %err, "cleanup error");
    }

    Ok(!interrupted && stats.is_success())
}

fn approval_authority(mode: ApproveMode) -> Arc<dyn ApprovalAuthority> {
    match mode {
        ApproveMode::Always => Arc::new(FixedApproval(true)),
        ApproveMode::Never => Arc::new(FixedApproval(false)),
        ApproveMode::Prompt => Arc::new(PromptApproval::new()),
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn print_json(stats: &RunStatistics, results: &BTreeMap<TaskId, TaskResult>) -> Result<()> {
    let out = serde_json::json!({
        "statistics": stats,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_summary(stats: &RunStatistics, results: &BTreeMap<TaskId, TaskResult>) {
    println!("{stats}");
    for (id, result) in results {
        let mut line = format!("  {id:<24} {:?}", result.status);
        if result.retry_count > 0 {
            line.push_str(&format!(" retries={}", result.retry_count));
        }
        if let Some(original) = &result.fallback_for {
            line.push_str(&format!(" (fallback for {original})"));
        }
        if let Some(err) = &result.last_error {
            line.push_str(&format!(" error: {err}"));
        }
        println!("{line}");
    }
    info!(success = stats.is_success(), "summary printed");
}

/// Print tasks, dependencies and gates without running anything.
fn print_dry_run(plan: &PlanFile, capabilities: &CapabilitySet) {
    println!("gatedag dry-run");
    println!("  orchestrator.max_concurrent = {}", plan.options.max_concurrent);
    println!(
        "  orchestrator.denial_policy = {:?}",
        plan.options.denial_policy
    );
    println!("  capabilities = {:?}", capabilities.snapshot());
    println!();

    println!("tasks ({}):", plan.tasks.len());
    for task in &plan.tasks {
        println!("  - {} ({}, {})", task.id, task.name, task.kind);
        println!("      work: {}", task.work_config);
        if !task.dependencies.is_empty() {
            println!("      after: {:?}", task.dependencies);
        }
        if task.requires_approval {
            println!("      requires_approval: true");
        }
        if task.max_retries > 0 {
            println!("      max_retries: {}", task.max_retries);
        }
        if task.allow_concurrent_siblings {
            println!("      allow_concurrent_siblings: true");
        }
        for tag in &task.required_capabilities {
            let marker = if capabilities.is_available(tag) {
                "available"
            } else {
                "missing"
            };
            println!("      requires: {tag} ({marker})");
        }
        let mut fallback = task.fallback.as_deref();
        while let Some(fb) = fallback {
            println!("      fallback: {} ({})", fb.id, fb.work_config);
            fallback = fb.fallback.as_deref();
        }
    }

    debug!("dry-run complete (no execution)");
}
