use crate::harness::{Assertion, Scenario};
use ckpt_core::RollbackMode;

#[test]
fn test_missing_record_is_listed_as_degraded() {
    Scenario::new("missing_record_degraded")
        .with_project()
        .pre_create(&["a.rs"])
        .label("c")
        .pre_create(&["b.rs"])
        .label("intact")
        .drop_metadata("c")
        .assert_checkpoint_count(2)
        .assert(Assertion::CheckpointDegraded { label: "c".into() })
        .assert(Assertion::CheckpointHasFile {
            label: "intact".into(),
            path: "b.rs".into(),
        })
        .check(|engine| {
            let report = engine.verify()?;
            anyhow::ensure!(report.degraded.len() == 1, "{:?}", report);
            anyhow::ensure!(report.has_issues());
            Ok(())
        })
        .run()
        .unwrap();
}

#[test]
fn test_degraded_checkpoint_still_rolls_back() {
    Scenario::new("degraded_rollback")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", b"// rewritten\n")
        .post_edit(&["src/lib.rs"])
        .drop_metadata("before")
        .rollback("before", RollbackMode::Hard)
        .assert_file("src/lib.rs", b"pub fn answer() -> u32 {\n    42\n}\n")
        .run()
        .unwrap();
}

#[test]
fn test_degraded_checkpoint_in_closed_session_is_cleaned() {
    Scenario::new("degraded_clean")
        .with_project()
        .pre_create(&["a.rs"])
        .label("c")
        .stop()
        .drop_metadata("c")
        .clean_max_count(0)
        .assert_gone("c")
        .assert_checkpoint_count(0)
        .run()
        .unwrap();
}

#[test]
fn test_degraded_checkpoint_can_be_deleted() {
    Scenario::new("degraded_delete")
        .with_project()
        .pre_create(&["a.rs"])
        .label("c")
        .stop()
        .drop_metadata("c")
        .delete("c")
        .assert_gone("c")
        .run()
        .unwrap();
}
