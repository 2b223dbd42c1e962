// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `gatedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gatedag",
    version,
    about = "Run a dependency graph of tasks with approval gates, retries and fallbacks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Gatedag.toml")]
    pub plan: String,

    /// Override `[orchestrator].max_concurrent`.
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// How approval gates are answered.
    #[arg(long, value_enum, value_name = "MODE", default_value_t = ApproveMode::Prompt)]
    pub approve: ApproveMode,

    /// Capability tag available to this run, in addition to the plan's.
    /// May be given several times.
    #[arg(long = "capability", value_name = "TAG")]
    pub capabilities: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GATEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate the plan, print the graph, but start nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final results as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Answer given at every approval gate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ApproveMode {
    /// Grant every gate.
    Always,
    /// Deny every gate.
    Never,
    /// Ask on the terminal.
    Prompt,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_are_repeatable() {
        let args = CliArgs::parse_from([
            "gatedag",
            "--capability",
            "gpu",
            "--capability",
            "license:vina",
            "--approve",
            "never",
        ]);
        assert_eq!(args.capabilities, vec!["gpu", "license:vina"]);
        assert_eq!(args.approve, ApproveMode::Never);
        assert_eq!(args.plan, "Gatedag.toml");
        assert!(args.max_concurrent.is_none());
    }
}
