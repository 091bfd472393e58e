//! Load testing for the incident paths.

use std::time::{Duration, Instant};

use portal_resilience::correction::{FaultReport, FaultType};
use portal_resilience::security::ThreatCategory;
use portal_resilience::storage::entities::Severity;
use portal_resilience::storage::PersistenceProvider;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_incident_load() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = common::test_config();
    config.correction.scratch_dir = Some(scratch.path().display().to_string());
    let h = common::harness_with(config, Default::default());
    let orch = h.components.orchestrator.clone();
    orch.start();

    let threat_sources = 200;
    let faults = 50;
    let start = Instant::now();

    let mut threats = Vec::with_capacity(threat_sources);
    for i in 0..threat_sources {
        let ip = format!("198.51.{}.{}", i / 250, i % 250 + 1);
        let (category, severity) = match i % 3 {
            0 => (ThreatCategory::BruteForce, Severity::High),
            1 => (ThreatCategory::Ddos, Severity::Critical),
            _ => (ThreatCategory::Suspicious, Severity::Medium),
        };
        threats.push(orch.report_threat(common::threat(&ip, category, severity, 97)));
    }

    let mut corrections = Vec::with_capacity(faults);
    for i in 0..faults {
        let fault = if i % 2 == 0 {
            FaultType::MemoryLeak
        } else {
            FaultType::FileSystemError
        };
        corrections.push(orch.report_fault(FaultReport::new(fault)));
    }

    let mut blocked = 0;
    for handle in threats {
        let outcome = handle.await.unwrap();
        assert!(outcome.latency_ms < 100, "mitigation took {}ms", outcome.latency_ms);
        if orch.threats().is_blocked(outcome.source_ip) {
            blocked += 1;
        }
    }
    for handle in corrections {
        let outcome = handle.await.unwrap();
        assert!(outcome.success, "{} failed: {}", outcome.action, outcome.details);
    }

    let elapsed = start.elapsed();
    println!("Load test results:");
    println!("  Threat reports: {}", threat_sources);
    println!("  Fault reports: {}", faults);
    println!("  Blocked sources: {}", blocked);
    println!("  Duration: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "load took {:?}", elapsed);

    let status = orch.status();
    assert!(status.is_running);
    assert_eq!(status.active_incidents.threats, 0);
    assert_eq!(status.active_incidents.faults, 0);
    assert_eq!(status.threats_handled, threat_sources as u64);
    assert_eq!(status.faults_handled, faults as u64);
    assert_eq!(status.corrections.attempted, faults as u64);
    assert_eq!(status.corrections.failed, 0);

    orch.shutdown().await;
    assert!(!orch.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cached_reads_under_load() {
    let h = common::harness();
    let storage = h.components.storage.clone();
    let user = storage.create_user(common::new_user("load")).await.unwrap();

    let concurrency = 20;
    let reads_per_task = 50;
    let mut tasks = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let storage = storage.clone();
        let id = user.id.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..reads_per_task {
                let read = storage.get_user(&id).await.unwrap();
                assert!(read.is_some());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Single flight: one backend load serves every reader.
    assert_eq!(h.backend.calls_for(portal_resilience::storage::Operation::GetUser), 1);
}
