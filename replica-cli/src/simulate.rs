//! `replica simulate`: host workload, faulty link, replica, comparison

use crate::SimulateArgs;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replica_core::core_boundary::{spawn_link, LinkHandle, RetentionTable};
use replica_core::core_sync::{DeltaPublisher, ObservableMap, ObservableSource, Reconciler};
use replica_core::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_POLL: Duration = Duration::from_millis(10);

const MAX_PRIORITY: u8 = 4;

/// Value stored under each workload key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub label: String,
    pub priority: u8,
}

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub seed: u64,
    pub ops: usize,
    pub drop_rate: f64,
    pub reorder_rate: f64,
    pub host_version: u64,
    pub replica_version: u64,
    pub entries: usize,
    pub frames_admitted: u64,
    pub frames_dropped: u64,
    pub frames_reordered: u64,
    pub deltas_applied: u64,
    pub snapshots_applied: u64,
    pub resyncs: u64,
    pub resync_failures: u64,
    pub settled_without_resync: bool,
    pub converged: bool,
    pub elapsed_ms: u64,
}

fn mutate(rng: &mut StdRng, host: &ObservableMap<String, Task>, keys: usize) {
    let key = format!("task-{}", rng.random_range(0..keys.max(1)));
    match rng.random_range(0..4) {
        0 => host.remove(&key),
        1 => {
            let priority = rng.random_range(0..=MAX_PRIORITY);
            host.update(|current| {
                if let Some(task) = current.get(&key).cloned() {
                    current.insert(key, Task { priority, ..task });
                }
            })
        }
        _ => {
            let label = format!("job {}", rng.random_range(0..10_000));
            host.insert(key, Task { label, priority: 0 })
        }
    }
}

pub async fn run(mut config: Config, args: &SimulateArgs) -> Result<Report> {
    if let Some(drop_rate) = args.drop_rate {
        config.link.drop_rate = drop_rate;
    }
    if let Some(reorder_rate) = args.reorder_rate {
        config.link.reorder_rate = reorder_rate;
    }
    let seed = args.seed.or(config.link.seed).unwrap_or_else(rand::random);
    config.link.seed = Some(seed);
    config.validate()?;

    info!(seed, ops = args.ops, drop_rate = config.link.drop_rate, reorder_rate = config.link.reorder_rate, "simulation starting");
    let started = Instant::now();

    let host = Arc::new(ObservableMap::<String, Task>::default());
    let publisher = Arc::new(DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new())));
    let link: Arc<LinkHandle<String, Task>> = Arc::new(spawn_link(publisher.clone(), &config.link));
    let replica: Reconciler<String, Task> = Reconciler::create(link.clone(), Arc::new(RetentionTable::new()), config.reconciler.clone())
        .await
        .context("creating replica across the link")?;

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..args.ops {
        mutate(&mut rng, &host, args.keys);
        tokio::task::yield_now().await;
    }

    let target = publisher.version();
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while replica.version() != target && Instant::now() < deadline {
        tokio::time::sleep(SETTLE_POLL).await;
    }
    let settled_without_resync = replica.version() == target && replica.current() == host.current();

    if !settled_without_resync {
        warn!(replica = replica.version(), host = target, "replica behind after workload, resyncing");
        replica.resync().await.context("final resync")?;
    }
    let converged = replica.current() == host.current();

    let stats = replica.stats();
    let faults = link.fault_stats();
    let report = Report {
        seed,
        ops: args.ops,
        drop_rate: config.link.drop_rate,
        reorder_rate: config.link.reorder_rate,
        host_version: publisher.version(),
        replica_version: stats.version,
        entries: stats.entries,
        frames_admitted: faults.admitted,
        frames_dropped: faults.dropped,
        frames_reordered: faults.reordered,
        deltas_applied: stats.deltas_applied,
        snapshots_applied: stats.snapshots_applied,
        resyncs: stats.resyncs,
        resync_failures: stats.resync_failures,
        settled_without_resync,
        converged,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    replica.destroy().await.context("destroying replica")?;
    link.shutdown().await.context("shutting down link")?;
    info!(converged, resyncs = report.resyncs, "simulation finished");

    Ok(report)
}

pub fn print(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("seed              {}", report.seed);
    println!("ops               {}", report.ops);
    println!("faults            drop {} / reorder {}", report.drop_rate, report.reorder_rate);
    println!("versions          host {} / replica {}", report.host_version, report.replica_version);
    println!("entries           {}", report.entries);
    println!(
        "frames            {} admitted, {} dropped, {} reordered",
        report.frames_admitted, report.frames_dropped, report.frames_reordered
    );
    println!(
        "applied           {} deltas, {} snapshots",
        report.deltas_applied, report.snapshots_applied
    );
    println!("resyncs           {} ({} failed)", report.resyncs, report.resync_failures);
    println!("settled unaided   {}", report.settled_without_resync);
    println!("converged         {}", report.converged);
    println!("elapsed           {} ms", report.elapsed_ms);
    Ok(())
}
