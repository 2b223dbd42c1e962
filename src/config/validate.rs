// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{OrchestratorSection, PlanFile, RawPlanFile, TaskConfig};
use crate::dag::{DagGraph, Task};
use crate::engine::OrchestratorOptions;
use crate::errors::{GatedagError, Result};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = GatedagError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let options = orchestrator_options(&raw.orchestrator)?;

        let tasks = raw
            .task
            .iter()
            .map(|(id, cfg)| task_from_config(id, cfg))
            .collect::<Result<Vec<_>>>()?;

        // Unknown and self dependencies, duplicate fallback ids and cycles
        // are caught by the same checks a run performs.
        DagGraph::build(&tasks)?;

        Ok(PlanFile {
            options,
            capabilities: raw.orchestrator.capabilities,
            tasks,
        })
    }
}

fn ensure_has_tasks(raw: &RawPlanFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(GatedagError::ConfigError(
            "plan must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn orchestrator_options(section: &OrchestratorSection) -> Result<OrchestratorOptions> {
    if section.max_concurrent == 0 {
        return Err(GatedagError::ConfigError(
            "[orchestrator].max_concurrent must be >= 1 (got 0)".to_string(),
        ));
    }

    let poll_interval = duration_field("poll_interval", &section.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(GatedagError::ConfigError(
            "[orchestrator].poll_interval must be greater than zero".to_string(),
        ));
    }

    Ok(OrchestratorOptions {
        max_concurrent: section.max_concurrent,
        retry_base_delay: duration_field("retry_base_delay", &section.retry_base_delay)?,
        poll_interval,
        completion_timeout: duration_field("completion_timeout", &section.completion_timeout)?,
        approval_timeout: duration_field("approval_timeout", &section.approval_timeout)?,
        stall_timeout: duration_field("stall_timeout", &section.stall_timeout)?,
        denial_policy: section.denial_policy,
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| GatedagError::ConfigError(format!("[orchestrator].{field}: {e}")))
}

fn task_from_config(id: &str, cfg: &TaskConfig) -> Result<Task> {
    if id.trim().is_empty() {
        return Err(GatedagError::ConfigError(
            "task ids must not be empty".to_string(),
        ));
    }

    let mut task = Task::new(id)
        .named(cfg.name.clone().unwrap_or_else(|| id.to_string()))
        .kind(cfg.kind)
        .work_config(work_config(id, cfg)?)
        .requires_approval(cfg.requires_approval)
        .max_retries(cfg.max_retries)
        .allow_concurrent_siblings(cfg.allow_concurrent_siblings);

    for dep in &cfg.after {
        task = task.after(dep.as_str());
    }
    for tag in &cfg.requires {
        task = task.require_capability(tag.as_str());
    }
    if let Some(fallback) = &cfg.fallback {
        task = task.fallback(task_from_config(&fallback.id, &fallback.task)?);
    }

    Ok(task)
}

fn work_config(id: &str, cfg: &TaskConfig) -> Result<serde_json::Value> {
    match (&cfg.cmd, &cfg.work) {
        (Some(cmd), None) => Ok(serde_json::json!({ "cmd": cmd })),
        (None, Some(work)) => serde_json::to_value(work).map_err(|e| {
            GatedagError::ConfigError(format!("task '{id}': invalid `work` table: {e}"))
        }),
        (Some(_), Some(_)) => Err(GatedagError::ConfigError(format!(
            "task '{id}' sets both `cmd` and `work`; use one"
        ))),
        (None, None) => Err(GatedagError::ConfigError(format!(
            "task '{id}' needs either `cmd` or a `work` table"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DenialPolicy, TaskKind};

    fn parse(src: &str) -> Result<PlanFile> {
        let raw: RawPlanFile = toml::from_str(src)?;
        PlanFile::try_from(raw)
    }

    #[test]
    fn full_plan_is_converted() {
        let plan = parse(
            r#"
            [orchestrator]
            max_concurrent = 2
            retry_base_delay = "10ms"
            denial_policy = "terminal"
            capabilities = ["gpu"]

            [task.prep]
            name = "Prepare"
            kind = "simulation"
            cmd = "echo prep"
            max_retries = 2
            requires = ["gpu"]

            [task.prep.fallback]
            id = "prep_cpu"
            cmd = "echo prep --cpu"

            [task.dock]
            kind = "docking"
            after = ["prep"]
            requires_approval = true
            allow_concurrent_siblings = true
            work = { cmd = "echo dock", address = "127.0.0.1:9000" }
            "#,
        )
        .unwrap();

        assert_eq!(plan.options.max_concurrent, 2);
        assert_eq!(plan.options.retry_base_delay, Duration::from_millis(10));
        assert_eq!(plan.options.denial_policy, DenialPolicy::Terminal);
        assert_eq!(plan.capabilities, vec!["gpu".to_string()]);

        let dock = &plan.tasks[0];
        assert_eq!(dock.id, "dock");
        assert_eq!(dock.kind, TaskKind::Docking);
        assert!(dock.requires_approval);
        assert!(dock.allow_concurrent_siblings);
        assert_eq!(dock.work_config["address"], "127.0.0.1:9000");

        let prep = &plan.tasks[1];
        assert_eq!(prep.name, "Prepare");
        assert_eq!(prep.work_config["cmd"], "echo prep");
        assert!(prep.required_capabilities.contains("gpu"));
        let fallback = prep.fallback.as_deref().unwrap();
        assert_eq!(fallback.id, "prep_cpu");
        assert_eq!(fallback.work_config["cmd"], "echo prep --cpu");
    }

    #[test]
    fn defaults_apply_without_orchestrator_section() {
        let plan = parse("[task.a]\ncmd = \"true\"\n").unwrap();
        assert_eq!(plan.options.max_concurrent, 4);
        assert_eq!(plan.options.poll_interval, Duration::from_millis(250));
        assert_eq!(plan.tasks[0].name, "a");
    }

    #[test]
    fn task_without_work_is_rejected() {
        let err = parse("[task.a]\nafter = []\n").unwrap_err();
        assert!(matches!(err, GatedagError::ConfigError(msg) if msg.contains("either `cmd`")));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let err = parse(
            "[orchestrator]\nstall_timeout = \"soon\"\n[task.a]\ncmd = \"true\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, GatedagError::ConfigError(msg) if msg.contains("stall_timeout")));
    }
}
