//! Sync engine demo
//!
//! Runs a full pass, an incremental pass after a remote mutation, a pass that
//! fails halfway and the pass that resumes it, all against the in-process
//! fixture remote.

use std::sync::Arc;

use feedsync_sdk::{
    Fault, MemoryRemote, RetryPolicy, SchedulerConfig, StorageManager, SyncConfig, SyncEngine,
    SyncEvent, SyncOutcome,
};

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n==============================================");
    println!("feedsync demo");
    println!("==============================================\n");

    let remote = Arc::new(MemoryRemote::new().with_latency(10, 60).with_shuffled_pages(true));
    let start = chrono::Utc::now().timestamp_millis() - 733 * DAY_MS;
    remote.seed("alice", 1, 733, start, DAY_MS);

    let config = SyncConfig::builder()
        .page_size(200)
        .concurrency(5)
        .retry(RetryPolicy {
            base_delay_ms: 200,
            ..Default::default()
        })
        .scheduler(SchedulerConfig {
            jitter_max_ms: 80,
            ..SchedulerConfig::default()
        })
        .build()?;
    let engine = SyncEngine::new(config, StorageManager::temporary()?, remote.clone())?;

    engine.progress().subscribe(|current, total, message| {
        println!("  progress {:>4}/{:<4} {}", current, total, message);
    });
    let mut events = engine.progress().events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SyncEvent::Completed { owner, items_committed, .. } = &event {
                println!("  [event] {} completed, {} items written", owner, items_committed);
            }
        }
    });

    println!("1. full sync");
    print_outcome(engine.sync("alice").await?);

    println!("\n2. incremental sync after a score change inside the overlap window");
    remote.mutate("alice", 720, 999, 42);
    print_outcome(engine.sync("alice").await?);
    let items = engine.items("alice").await?;
    if let Some(item) = items.iter().find(|item| item.id == 720) {
        println!("  item 720: no={} score={}", item.no, item.score);
    }

    println!("\n3. a pass rejected halfway, then resumed");
    remote.seed("bob", 10_000, 900, start, DAY_MS);
    remote.inject_fault(3, Fault::BadRequest);
    match engine.sync("bob").await {
        Ok(outcome) => print_outcome(outcome),
        Err(e) => println!("  pass failed ({}): {}", e.kind(), e),
    }
    println!("  cached after failure: {}", engine.items("bob").await?.len());
    print_outcome(engine.sync("bob").await?);

    let stats = engine.scheduler_stats();
    println!(
        "\nscheduler: dispatched={} succeeded={} failed={}",
        stats.dispatched, stats.succeeded, stats.failed
    );
    Ok(())
}

fn print_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => println!(
            "  boundary={} committed={} last_sequence={} cached={} in {} ms",
            report.resume.start_boundary,
            report.items_committed,
            report.last_sequence,
            report.item_count,
            report.duration_ms
        ),
        SyncOutcome::AlreadyRunning => println!("  another pass is running"),
    }
}
