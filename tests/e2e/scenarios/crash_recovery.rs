use crate::harness::{Assertion, Scenario, DEFAULT_SESSION};
use ckpt_core::RollbackMode;

#[test]
fn test_crash_inside_pre_edit_restores_work() {
    Scenario::new("crash_inside_pre_edit")
        .with_project()
        .agent_writes("src/lib.rs", b"// half done\n")
        .crash_during_pre_edit()
        .assert_file("src/lib.rs", b"pub fn answer() -> u32 {\n    42\n}\n")
        .restart()
        .assert(Assertion::RecoveryRan)
        .assert_file("src/lib.rs", b"// half done\n")
        .assert(Assertion::NoCheckpointStashes)
        .assert_checkpoint_count(0)
        .assert_store_healthy()
        .run()
        .unwrap();
}

#[test]
fn test_crash_after_record_repairs_session() {
    Scenario::new("crash_after_record")
        .with_project()
        .pre_create(&["src/new.rs"])
        .label("c")
        .crash_after_metadata("c")
        .restart()
        .assert(Assertion::RecoveryRan)
        .assert_exists("c")
        .assert(Assertion::SessionCheckpointCount {
            session: DEFAULT_SESSION.into(),
            count: 1,
        })
        .assert_store_healthy()
        .run()
        .unwrap();
}

#[test]
fn test_crash_between_events_needs_no_recovery() {
    Scenario::new("crash_between_events")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", b"// edited\n")
        .crash()
        .restart()
        .check(|engine| {
            anyhow::ensure!(engine.last_recovery().is_clean());
            Ok(())
        })
        .post_edit(&["src/lib.rs"])
        .assert_recorded()
        .rollback("before", RollbackMode::Hard)
        .assert_file("src/lib.rs", b"pub fn answer() -> u32 {\n    42\n}\n")
        .assert_store_healthy()
        .run()
        .unwrap();
}

#[test]
fn test_work_continues_after_recovery() {
    Scenario::new("work_after_recovery")
        .with_project()
        .agent_writes("src/main.rs", b"fn main() { run() }\n")
        .crash_during_pre_edit()
        .restart()
        .pre_edit(&["src/main.rs"])
        .label("retry")
        .assert_recorded()
        .assert_file("src/main.rs", b"fn main() { run() }\n")
        .assert_checkpoint_count(1)
        .run()
        .unwrap();
}
