//! `conclave run` — Send one request through the orchestrator.

use chrono::{DateTime, Utc};
use conclave_config::AppConfig;
use conclave_core::error::OrchestrationError;
use conclave_core::{Error, Message, SessionId, ToolRegistry};
use conclave_orchestrator::{ExecutionMode, Orchestrator, ProcessOptions};
use conclave_providers::OpenAiCompatProvider;
use conclave_telemetry::TelemetryEngine;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct RunArgs {
    pub message: String,
    pub mode: ExecutionMode,
    pub session: Option<String>,
    pub agents: Vec<String>,
    pub evaluator: Option<String>,
    pub max_iterations: Option<usize>,
    pub metrics: bool,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    GROQ_API_KEY       (default endpoint)");
        eprintln!("    OPENAI_API_KEY     (with CONCLAVE_API_URL=https://api.openai.com/v1)");
        eprintln!("    CONCLAVE_API_KEY   (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let telemetry = Arc::new(TelemetryEngine::new());
    let orchestrator =
        Orchestrator::new(&config, provider, ToolRegistry::new())?.with_sink(telemetry.clone());

    let sessions_path = AppConfig::sessions_path();
    let session_id = args.session.map(SessionId::from).unwrap_or_default();
    restore_sessions(&orchestrator, &sessions_path, &session_id, Utc::now())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut options = ProcessOptions::new()
        .with_agents(args.agents)
        .with_cancel(cancel);
    if let Some(evaluator) = args.evaluator {
        options = options.with_evaluator_agent(evaluator);
    }
    if let Some(max) = args.max_iterations {
        options = options.with_max_iterations(max);
    }

    eprint!("  Thinking ({})...", args.mode);
    let outcome = orchestrator
        .process(&session_id, Message::user(args.message), args.mode, options)
        .await;
    eprint!("\r                              \r");

    // Outputs written before a failure are kept too
    let saved = orchestrator.store().save_to(&sessions_path)?;
    debug!(saved, "Session snapshot written");

    let result = match outcome {
        Ok(result) => result,
        Err(Error::Orchestration(OrchestrationError::NotConverged {
            iterations,
            best_output,
            best_score,
        })) => {
            println!("{best_output}");
            eprintln!();
            match best_score {
                Some(score) => eprintln!("  ⚠️  Not converged after {iterations} iterations (best score {score:.2})"),
                None => eprintln!("  ⚠️  Not converged after {iterations} iterations"),
            }
            eprintln!("  Session: {session_id}");
            return Ok(());
        }
        Err(Error::Orchestration(OrchestrationError::PartialPipelineFailure {
            failed_stage,
            cause,
            completed,
        })) => {
            for output in &completed {
                println!("[{}]: {}", output.agent_id, output.output);
            }
            return Err(format!("pipeline aborted at stage {failed_stage}: {cause}").into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", result.output);
    eprintln!();
    for failure in &result.failures {
        eprintln!("  ⚠️  {failure}");
    }
    if result.mode == ExecutionMode::Loop {
        eprintln!("  Iterations: {}", result.iterations);
    }
    eprintln!("  Session: {}  ({} ms)", result.session_id, result.duration_ms);

    if args.metrics {
        println!();
        print!("{}", telemetry.export_prometheus());
    }

    Ok(())
}

/// Load the session snapshot and archive sessions idle past
/// `memory.archive_after_secs`. The session this run continues is
/// reactivated if it was archived.
fn restore_sessions(
    orchestrator: &Orchestrator,
    path: &Path,
    session_id: &SessionId,
    now: DateTime<Utc>,
) -> conclave_core::Result<()> {
    let store = orchestrator.store();
    let loaded = store.load_from(path)?;
    let archived = store.archive_idle(now);
    debug!(loaded, archived = archived.len(), path = %path.display(), "Session snapshot loaded");

    if store.snapshot(session_id).is_ok_and(|s| s.archived) {
        store.reactivate(session_id)?;
        info!(session_id = %session_id, "Archived session reactivated");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        let provider = Arc::new(OpenAiCompatProvider::ollama(None).unwrap());
        Orchestrator::new(&AppConfig::default(), provider, ToolRegistry::new()).unwrap()
    }

    #[test]
    fn restore_archives_idle_sessions_but_keeps_the_current_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let first = orchestrator();
        for id in ["old", "trip"] {
            first
                .store()
                .append(&SessionId::from(id), Message::user("hello"))
                .unwrap();
        }
        first.store().save_to(&path).unwrap();

        let second = orchestrator();
        let later = Utc::now() + chrono::Duration::hours(2);
        restore_sessions(&second, &path, &SessionId::from("trip"), later).unwrap();

        let store = second.store();
        assert!(store.snapshot(&SessionId::from("old")).unwrap().archived);
        assert!(!store.snapshot(&SessionId::from("trip")).unwrap().archived);
        assert_eq!(store.archived_count(), 1);
    }

    #[test]
    fn restore_keeps_recent_sessions_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let first = orchestrator();
        first
            .store()
            .append(&SessionId::from("s"), Message::user("hello"))
            .unwrap();
        first.store().save_to(&path).unwrap();

        let second = orchestrator();
        restore_sessions(&second, &path, &SessionId::from("other"), Utc::now()).unwrap();
        assert_eq!(second.store().archived_count(), 0);
        assert_eq!(second.store().active_count(), 1);
    }
}
