use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mailflow::actions::ActionExecutor;
use mailflow::classify::{create_classifier, ClassifierConfig};
use mailflow::config::{load_seed_file, Account, JobsConfig, ServerConfig};
use mailflow::digest::DigestAssembler;
use mailflow::ingest::EventIngestor;
use mailflow::jobs::{spawn_job_ticker, JobRunner};
use mailflow::provider::{EmailProvider, MemoryProvider};
use mailflow::rules::RuleMatcher;
use mailflow::server::webhook_routes;
use mailflow::store::{AutomationStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; MAILFLOW_LOG_DIR switches to rolling files.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match std::env::var("MAILFLOW_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "mailflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let account = Account::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export MAILFLOW_ACCOUNT_EMAIL=you@example.com");
        std::process::exit(1);
    });
    let server_config = ServerConfig::from_env();
    let jobs_config = JobsConfig::from_env()?;
    let classifier_config = ClassifierConfig::from_env();

    eprintln!("📬 Mailflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", account.email);
    eprintln!("   Webhook: http://{}/webhooks/email", server_config.bind_addr);
    match &classifier_config {
        Some(config) => eprintln!("   Classifier: {}", config.model),
        None => eprintln!("   Classifier: disabled (set MAILFLOW_CLASSIFIER_API_KEY)"),
    }

    // ── Store and provider ───────────────────────────────────────────
    let store: Arc<dyn AutomationStore> = Arc::new(MemoryStore::new());
    let provider: Arc<dyn EmailProvider> = Arc::new(MemoryProvider::new(&account.email));

    if let Ok(path) = std::env::var("MAILFLOW_RULES") {
        let seed = load_seed_file(&PathBuf::from(&path))?;
        for rule in &seed.rules {
            store.upsert_rule(rule).await?;
        }
        for group in &seed.groups {
            store.upsert_group(group).await?;
        }
        eprintln!(
            "   Seeded: {} rule(s), {} group(s) from {}",
            seed.rules.len(),
            seed.groups.len(),
            path
        );
    }

    // ── Engine ───────────────────────────────────────────────────────
    let classifier = create_classifier(classifier_config.as_ref());
    let matcher = Arc::new(RuleMatcher::new(store.clone(), classifier.clone()));
    let executor = Arc::new(ActionExecutor::new(
        store.clone(),
        provider.clone(),
        classifier,
    ));
    let ingestor = Arc::new(EventIngestor::new(
        store.clone(),
        provider.clone(),
        matcher.clone(),
        executor.clone(),
    ));

    // ── Background jobs ──────────────────────────────────────────────
    let digest = DigestAssembler::new(store.clone(), provider.clone());
    let runner = Arc::new(JobRunner::new(account.clone(), digest, &jobs_config)?);
    let ticker = spawn_job_ticker(runner, Duration::from_secs(jobs_config.tick_secs));

    // ── Push subscription ────────────────────────────────────────────
    match provider.watch().await {
        Ok(expiry) => tracing::info!(expiry = %expiry, "provider watch registered"),
        Err(e) => tracing::warn!(error = %e, "provider watch failed, relying on redelivery"),
    }

    // ── Webhook server ───────────────────────────────────────────────
    let app = webhook_routes(account.clone(), provider.clone(), ingestor);
    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr).await?;
    tracing::info!(addr = %server_config.bind_addr, "webhook server started");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nShutting down");
        }
    }

    ticker.abort();
    if let Err(e) = provider.unwatch().await {
        tracing::warn!(error = %e, "unwatch failed");
    }

    Ok(())
}
