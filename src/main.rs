use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use dialog_orchestrator::agents::{BookingLedger, HandlerRegistry, register_builtin_handlers};
use dialog_orchestrator::intent::IntentCatalog;
use dialog_orchestrator::nlu::NluDeps;
use dialog_orchestrator::store::{LibSqlSessionStore, MemorySessionStore, SessionStore};
use dialog_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OrchestratorConfig::from_env().context("invalid configuration")?;

    let catalog = match std::env::var("ORCHESTRATOR_CATALOG_PATH") {
        Ok(path) => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read catalog at {path}"))?;
            IntentCatalog::from_json(&json).with_context(|| format!("invalid catalog at {path}"))?
        }
        Err(_) => IntentCatalog::builtin(),
    };

    // ── Session store ────────────────────────────────────────────────────
    let store: Arc<dyn SessionStore> = match std::env::var("ORCHESTRATOR_DB_PATH") {
        Ok(path) => {
            let store = LibSqlSessionStore::new_local(std::path::Path::new(&path))
                .await
                .with_context(|| format!("failed to open session store at {path}"))?;
            tracing::info!(path = %path, "Using libSQL session store");
            Arc::new(store)
        }
        Err(_) => Arc::new(MemorySessionStore::new()),
    };

    // ── Handlers ─────────────────────────────────────────────────────────
    let mut handlers = HandlerRegistry::new();
    register_builtin_handlers(&mut handlers, Arc::new(BookingLedger::new()));
    tracing::info!(
        handlers = handlers.count(),
        intents = catalog.len(),
        "Handlers registered"
    );

    let orchestrator = Orchestrator::new(
        config,
        OrchestratorDeps {
            store,
            nlu: NluDeps::rule_based(),
            handlers: Arc::new(handlers),
            catalog: Arc::new(catalog),
        },
    );

    let session_id =
        std::env::var("ORCHESTRATOR_SESSION_ID").unwrap_or_else(|_| "local-user".to_string());

    eprintln!("Dialog Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Session: {session_id}");
    eprintln!("   Type a message and press Enter. /quit to exit.\n");
    eprint!("> ");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        if line == "/quit" {
            break;
        }

        let reply = orchestrator.reply(&session_id, line).await;
        println!("\n{}\n", reply.text());
        for (task_id, provenance) in reply.response.provenance() {
            eprintln!(
                "   [{}] {} {} ({} ms, confidence {:.2})",
                &task_id.to_string()[..8],
                provenance.agent_type,
                provenance.status,
                provenance.latency_ms,
                provenance.confidence
            );
        }
        eprint!("> ");
    }

    Ok(())
}
