//! Maintenance CLI for Arbor tree namespaces
//!
//! Operator entry point for the whole-namespace operations that request
//! paths never run: validation, rebuild, planner statistics and tombstone
//! purging. Results are printed to stdout as JSON, one document per
//! namespace.
//!
//! # Usage
//!
//! ```bash
//! arbor-maint validate taxonomies
//! arbor-maint rebuild all
//! arbor-maint stats menus --db ./data/arbor.db
//! ```
//!
//! # Configuration
//!
//! Database settings come from `ARBOR_*` environment variables (see
//! `ArborConfig::from_env`); `--db <path>` overrides `ARBOR_DATABASE_PATH`.
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use anyhow::{bail, Context};
use arbor_core::{Arbor, ArborConfig, NestedSetIndex, OpContext};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: arbor-maint <validate|rebuild|optimize|stats|purge> <namespace|all> [--db <path>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Validate,
    Rebuild,
    Optimize,
    Stats,
    Purge,
}

impl Command {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(match raw {
            "validate" => Command::Validate,
            "rebuild" => Command::Rebuild,
            "optimize" => Command::Optimize,
            "stats" => Command::Stats,
            "purge" => Command::Purge,
            other => bail!("unknown command '{}'\n{}", other, USAGE),
        })
    }
}

#[derive(Debug)]
struct Args {
    command: Command,
    target: String,
    database_path: Option<PathBuf>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut database_path = None;

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--db" => {
                let path = raw.next().context("--db needs a path")?;
                database_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }

    let [command, target] = <[String; 2]>::try_from(positional)
        .map_err(|_| anyhow::anyhow!("expected a command and a namespace\n{}", USAGE))?;

    Ok(Args {
        command: Command::parse(&command)?,
        target,
        database_path,
    })
}

async fn run_on(command: Command, index: &NestedSetIndex) -> anyhow::Result<(Value, bool)> {
    let ctx = OpContext::background();
    Ok(match command {
        Command::Validate => {
            let violations = index.validate(&ctx).await?;
            let healthy = violations.is_empty();
            (
                json!({
                    "namespace": index.table(),
                    "valid": healthy,
                    "violations": violations,
                }),
                healthy,
            )
        }
        Command::Rebuild => (serde_json::to_value(index.rebuild(&ctx).await?)?, true),
        Command::Optimize => (serde_json::to_value(index.optimize(&ctx).await?)?, true),
        Command::Stats => {
            let statistics = index.tree_statistics(&ctx).await?;
            let metrics = index.performance_metrics(&ctx).await?;
            (
                json!({ "statistics": statistics, "performance": metrics }),
                true,
            )
        }
        Command::Purge => {
            let outcome = index.purge_deleted(&ctx).await?;
            (
                json!({
                    "namespace": index.table(),
                    "purged": outcome.affected_ids(),
                }),
                true,
            )
        }
    })
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = ArborConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if let Some(path) = args.database_path {
        config.database_path = path;
    }

    let arbor = Arbor::open(config)
        .await
        .context("Failed to open tree store")?;

    let namespaces = if args.target == "all" {
        arbor.namespaces().await?
    } else {
        vec![args.target]
    };
    if namespaces.is_empty() {
        tracing::warn!("No namespaces found");
    }

    let mut healthy = true;
    for namespace in namespaces {
        let index = arbor
            .index(&namespace)
            .await
            .with_context(|| format!("Failed to open namespace '{}'", namespace))?;
        tracing::info!("Running {:?} on '{}'", args.command, namespace);

        let (report, ok) = run_on(args.command, &index).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        healthy &= ok;
    }

    arbor.close().await?;
    Ok(healthy)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::warn!("Validation found violations");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> anyhow::Result<Args> {
        parse_args(raw.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["rebuild", "menus", "--db", "/tmp/a.db"]).unwrap();
        assert_eq!(parsed.command, Command::Rebuild);
        assert_eq!(parsed.target, "menus");
        assert_eq!(parsed.database_path, Some(PathBuf::from("/tmp/a.db")));

        let parsed = args(&["validate", "all"]).unwrap();
        assert_eq!(parsed.command, Command::Validate);
        assert!(parsed.database_path.is_none());
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(args(&["explode", "menus"]).is_err());
        assert!(args(&["validate"]).is_err());
        assert!(args(&["validate", "menus", "extra"]).is_err());
        assert!(args(&["validate", "menus", "--db"]).is_err());
    }
}
