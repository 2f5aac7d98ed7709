//! Replays a JSON file of lead states through the processor.
//!
//! Usage: `replay_leads <file>` (or set `LEADS_FILE`). The file holds a JSON
//! array of tagged lead states, each optionally carrying a `leadId`.
//! Repeated lead ids are answered from the outcome cache.

use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;

use rust_lead_core::cache::ConcurrentCache;
use rust_lead_core::circuit_breaker::create_lead_circuit_breaker;
use rust_lead_core::config::Config;
use rust_lead_core::lead_state::LeadState;
use rust_lead_core::processor::TransitionProcessor;
use rust_lead_core::telemetry::{CompositeMetrics, FacadeMetrics, InMemoryMetrics, MetricsSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LEADS_FILE").ok())
        .context("Pass the leads file as first argument or set LEADS_FILE")?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array", path))?;

    let config = Config::from_env()?;
    let metrics = Arc::new(InMemoryMetrics::new());
    // The in-memory copy feeds the summary; the facade feeds any installed recorder.
    let sink: Arc<dyn MetricsSink> = Arc::new(CompositeMetrics::new(vec![
        metrics.clone(),
        Arc::new(FacadeMetrics),
    ]));
    let breaker = Arc::new(create_lead_circuit_breaker(config.breaker_config()));
    let processor = TransitionProcessor::new(breaker.clone(), sink.clone());
    let outcomes: ConcurrentCache<String, String> = ConcurrentCache::new(sink);

    tracing::info!("Replaying {} lead states from {}", entries.len(), path);

    let mut rejected = 0;
    for (index, entry) in entries.iter().enumerate() {
        let lead_id = entry
            .get("leadId")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("entry-{}", index));

        if let Some(cached) = outcomes.get(&lead_id) {
            println!("[{}] (cached) {}", lead_id, cached);
            continue;
        }

        let state = match LeadState::try_from_json(entry) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", lead_id, e);
                rejected += 1;
                continue;
            }
        };

        let message = processor.process_lead(&lead_id, &state);
        println!("[{}] {}", lead_id, message);
        outcomes.put(lead_id, message);
        outcomes.settle().await;
    }

    let snapshot = breaker.snapshot();
    println!();
    println!("=== Summary ===");
    println!("Entries:             {}", entries.len());
    println!("Rejected payloads:   {}", rejected);
    println!("Transitions:         {}", metrics.transition_count());
    println!("Cache hits / misses: {} / {}", metrics.hits(), metrics.misses());
    println!(
        "Breaker:             {:?} ({} consecutive failures)",
        snapshot.status, snapshot.consecutive_failures
    );
    if let Some(last) = snapshot.last_error {
        println!("Last failure:        {}", last);
    }

    Ok(())
}
