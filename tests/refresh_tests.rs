//! Concurrency properties: snapshot atomicity of the published store and
//! single-flight semantics of the check gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use cluster_atlas::models::{DiagramArtifact, DiagramKind};
use cluster_atlas::server::DiagramStore;
use cluster_atlas::versions::CheckGate;

fn artifact_set(marker: usize) -> Vec<DiagramArtifact> {
    // Every artifact in a set carries the same marker; a reader observing
    // two different markers at once has seen a torn snapshot.
    (0..4)
        .map(|i| DiagramArtifact {
            id: format!("diagram-{i}"),
            title: format!("Diagram {i}"),
            kind: DiagramKind::Markdown,
            content: marker.to_string(),
        })
        .collect()
}

#[test]
fn test_store_readers_never_observe_mixed_sets() {
    let store = Arc::new(DiagramStore::new());
    store.publish(artifact_set(0));

    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = store.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut marker = 1usize;
            while !stop.load(Ordering::Relaxed) {
                store.publish(artifact_set(marker));
                marker += 1;
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let published = store.current().expect("store was seeded");
                    let first = &published.diagrams[0].content;
                    for artifact in &published.diagrams {
                        assert_eq!(
                            &artifact.content, first,
                            "torn snapshot: mixed markers in one published set"
                        );
                    }
                }
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(200));
    stop.store(true, Ordering::Relaxed);

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_reader_keeps_old_set_across_publish() {
    let store = DiagramStore::new();
    store.publish(artifact_set(1));

    let held = store.current().unwrap();
    store.publish(artifact_set(2));

    // The old reference is unaffected by the new publication
    assert!(held.diagrams.iter().all(|d| d.content == "1"));
    assert!(
        store
            .current()
            .unwrap()
            .diagrams
            .iter()
            .all(|d| d.content == "2")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_refresh_single_flight() {
    // N concurrent invocations execute the body at most once while one is
    // in flight; the rest return immediately.
    let gate = Arc::new(CheckGate::new());
    let executions = Arc::new(AtomicUsize::new(0));
    let immediate_returns = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let gate = gate.clone();
        let executions = executions.clone();
        let immediate_returns = immediate_returns.clone();
        handles.push(tokio::spawn(async move {
            match gate.try_begin(Duration::ZERO) {
                Some(permit) => {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    permit.complete();
                }
                None => {
                    immediate_returns.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(immediate_returns.load(Ordering::SeqCst), 31);
}

#[tokio::test]
async fn test_interval_gate_blocks_rerun_until_elapsed() {
    let gate = CheckGate::new();
    let interval = Duration::from_millis(80);

    gate.try_begin(interval).unwrap().complete();
    assert!(gate.try_begin(interval).is_none(), "gate must hold during interval");

    tokio::time::sleep(interval + Duration::from_millis(20)).await;
    assert!(
        gate.try_begin(interval).is_some(),
        "gate must reopen after the interval"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_gate_race_after_interval_admits_exactly_one() {
    // Both the running flag and the completion timestamp live under one
    // lock: two callers racing past an expired interval must not both win.
    let gate = Arc::new(CheckGate::new());
    gate.try_begin(Duration::ZERO).unwrap().complete();

    let winners = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let gate = gate.clone();
        let winners = winners.clone();
        handles.push(tokio::spawn(async move {
            if let Some(permit) = gate.try_begin(Duration::ZERO) {
                winners.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                permit.complete();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
}
