use crate::harness::{MockClock, TestWorkspace};
use ckpt_core::{CheckpointEngine, HookEvent, SessionContext};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread;

const EVENTS_PER_SESSION: usize = 8;

fn project() -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    files.insert("README.md".to_string(), b"# demo\n".to_vec());
    files
}

/// Two engines on one repository stand in for two hook processes.
fn open_engine(workspace: &TestWorkspace, clock: &MockClock) -> CheckpointEngine {
    workspace
        .open_engine()
        .expect("engine should open")
        .with_time_provider(clock.as_provider())
}

#[test]
fn test_concurrent_sessions_on_disjoint_files() {
    let workspace = TestWorkspace::with_files(&project()).unwrap();
    // Frozen clock: ids must stay unique without any help from time.
    let clock = MockClock::new();
    let engines = [
        Arc::new(open_engine(&workspace, &clock)),
        Arc::new(open_engine(&workspace, &clock)),
    ];

    let handles: Vec<_> = engines
        .iter()
        .zip(["alpha", "beta"])
        .map(|(engine, session)| {
            let engine = Arc::clone(engine);
            thread::spawn(move || {
                let ctx = SessionContext::new(session);
                (0..EVENTS_PER_SESSION)
                    .map(|i| {
                        let outcome = engine.dispatch(
                            &ctx,
                            HookEvent::PreCreate {
                                files: vec![format!("{}/file_{}.rs", session, i)],
                            },
                        );
                        assert!(outcome.is_ok(), "{:?}", outcome.error);
                        outcome.checkpoint_id.expect("checkpoint recorded")
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("worker panicked"))
        .collect();

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 2 * EVENTS_PER_SESSION);

    let engine = &engines[0];
    assert_eq!(engine.list().unwrap().len(), 2 * EVENTS_PER_SESSION);
    for session in engine.sessions().unwrap() {
        assert_eq!(session.checkpoint_ids.len(), EVENTS_PER_SESSION);
        let mut sorted = session.checkpoint_ids.clone();
        sorted.sort();
        assert_eq!(sorted, session.checkpoint_ids, "session list out of order");
    }
    assert!(!engine.verify().unwrap().has_issues());
}

#[test]
fn test_batch_holds_off_other_writers() {
    let workspace = TestWorkspace::with_files(&project()).unwrap();
    let engine = open_engine(&workspace, &MockClock::new());
    let ctx = SessionContext::new("batch");

    let ids = engine
        .batch(|engine| {
            ["a.rs", "b.rs", "c.rs"]
                .iter()
                .filter_map(|f| {
                    engine
                        .dispatch(&ctx, HookEvent::PreCreate {
                            files: vec![f.to_string()],
                        })
                        .checkpoint_id
                })
                .collect::<Vec<_>>()
        })
        .unwrap();

    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}
