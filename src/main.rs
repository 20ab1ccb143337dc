//! Thin CLI over `orchestrator_core`. Parses `--workspace`, `--message`,
//! `--user-id`, `--session-id`, `--verbose` by hand (no arg-parsing crate —
//! the surface is five flags), resolves the workspace's runtime, runs the
//! message to completion, and prints the final session state as JSON.

use anyhow::{bail, Context, Result};
use orchestrator_core::workspace::WorkspaceHub;
use tracing_subscriber::EnvFilter;

struct CliArgs {
    workspace: String,
    message: String,
    user_id: String,
    session_id: Option<String>,
    verbose: bool,
}

fn parse_cli_args(args: &[String]) -> Result<CliArgs> {
    let mut workspace = None;
    let mut message = None;
    let mut user_id = None;
    let mut session_id = None;
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--workspace" => {
                workspace = Some(next_value(args, &mut i, "--workspace")?);
            }
            "--message" => {
                message = Some(next_value(args, &mut i, "--message")?);
            }
            "--user-id" => {
                user_id = Some(next_value(args, &mut i, "--user-id")?);
            }
            "--session-id" => {
                session_id = Some(next_value(args, &mut i, "--session-id")?);
            }
            "--verbose" => {
                verbose = true;
                i += 1;
            }
            other => bail!("unrecognized argument: {other}"),
        }
    }

    Ok(CliArgs {
        workspace: workspace.context("--workspace is required")?,
        message: message.context("--message is required")?,
        user_id: user_id.context("--user-id is required")?,
        session_id,
        verbose,
    })
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    let value = args.get(*i + 1).cloned().with_context(|| format!("{flag} requires a value"))?;
    *i += 2;
    Ok(value)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_cli_args(&raw_args)?;
    init_logging(args.verbose);

    let workspaces_root = std::env::current_dir().context("resolving current directory")?;
    let hub = WorkspaceHub::new(workspaces_root);
    let runtime = hub.runtime_for(&args.workspace).await.with_context(|| format!("loading workspace '{}'", args.workspace))?;

    let namespace_session_id = args.session_id.clone().unwrap_or_else(|| format!("{}:{}", args.user_id, uuid::Uuid::new_v4()));
    let final_state = runtime
        .run_user_message(&args.message, Some(namespace_session_id), args.verbose)
        .await
        .context("running user message")?;

    let output = serde_json::to_string_pretty(&final_state).context("serializing final session state")?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_and_optional_flags() {
        let args = parse_cli_args(&[
            "--workspace".into(),
            "demo".into(),
            "--message".into(),
            "hi".into(),
            "--user-id".into(),
            "u1".into(),
            "--session-id".into(),
            "s1".into(),
            "--verbose".into(),
        ])
        .unwrap();
        assert_eq!(args.workspace, "demo");
        assert_eq!(args.message, "hi");
        assert_eq!(args.user_id, "u1");
        assert_eq!(args.session_id.as_deref(), Some("s1"));
        assert!(args.verbose);
    }

    #[test]
    fn missing_required_flag_is_an_error() {
        let result = parse_cli_args(&["--workspace".into(), "demo".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn session_id_and_verbose_are_optional() {
        let args = parse_cli_args(&["--workspace".into(), "demo".into(), "--message".into(), "hi".into(), "--user-id".into(), "u1".into()]).unwrap();
        assert!(args.session_id.is_none());
        assert!(!args.verbose);
    }
}
