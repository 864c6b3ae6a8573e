use crate::harness::{Assertion, ErrorMatch, Scenario};
use ckpt_core::CheckpointKind;
use std::time::Duration;

#[test]
fn test_clean_never_touches_open_sessions() {
    Scenario::new("clean_open_session")
        .with_project()
        .pre_create(&["a.rs"])
        .pre_create(&["b.rs"])
        .task_start("more")
        .clean_max_count(0)
        .assert_checkpoint_count(3)
        .clean_max_age(Duration::from_secs(0))
        .assert_checkpoint_count(3)
        .run()
        .unwrap();
}

#[test]
fn test_clean_max_count_zero_after_stop() {
    Scenario::new("clean_all_after_stop")
        .with_project()
        .pre_create(&["a.rs"])
        .pre_create(&["b.rs"])
        .stop()
        .assert_checkpoint_count(3)
        .clean_max_count(0)
        .assert_checkpoint_count(0)
        .assert(Assertion::SessionCheckpointCount {
            session: "session-1".into(),
            count: 0,
        })
        .assert_store_healthy()
        .run()
        .unwrap();
}

#[test]
fn test_clean_keeps_newest_per_kind() {
    Scenario::new("clean_newest_per_kind")
        .with_project()
        .pre_create(&["a.rs"])
        .label("old")
        .wait(Duration::from_secs(5))
        .pre_create(&["b.rs"])
        .label("new")
        .stop()
        .label("end")
        .clean_max_count(1)
        .assert_gone("old")
        .assert_exists("new")
        .assert_exists("end")
        .assert_kind_count(CheckpointKind::PreCreate, 1)
        .assert_store_healthy()
        .run()
        .unwrap();
}

#[test]
fn test_clean_by_age() {
    Scenario::new("clean_by_age")
        .with_project()
        .pre_create(&["a.rs"])
        .label("old")
        .wait_days(10)
        .pre_create(&["b.rs"])
        .label("fresh")
        .stop()
        .label("end")
        .clean_max_age(Duration::from_secs(7 * 86400))
        .assert_gone("old")
        .assert_exists("fresh")
        .assert_exists("end")
        .run()
        .unwrap();
}

#[test]
fn test_clean_spares_other_open_sessions() {
    Scenario::new("clean_mixed_sessions")
        .with_project()
        .in_session("done")
        .pre_create(&["done.rs"])
        .label("closed")
        .stop()
        .in_session("working")
        .pre_create(&["working.rs"])
        .label("open")
        .clean_max_count(0)
        .assert_gone("closed")
        .assert_exists("open")
        .assert_session_open("working")
        .run()
        .unwrap();
}

#[test]
fn test_delete_refuses_open_session_checkpoint() {
    Scenario::new("delete_protected")
        .with_project()
        .pre_create(&["a.rs"])
        .label("c")
        .delete_fails("c", ErrorMatch::RetentionPolicyViolation)
        .assert_exists("c")
        .stop()
        .delete("c")
        .assert_gone("c")
        .run()
        .unwrap();
}
