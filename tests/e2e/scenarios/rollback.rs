use crate::harness::{Assertion, ErrorMatch, Scenario};
use ckpt_core::RollbackMode;

const LIB_V1: &[u8] = b"pub fn answer() -> u32 {\n    42\n}\n";
const LIB_V2: &[u8] = b"pub fn answer() -> u32 {\n    0\n}\n";

#[test]
fn test_soft_rollback_keeps_working_tree() {
    Scenario::new("soft_rollback")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", LIB_V2)
        .post_edit(&["src/lib.rs"])
        .rollback("before", RollbackMode::Soft)
        .assert_file("src/lib.rs", LIB_V2)
        .check(|engine| {
            let entries = engine.list()?;
            let before = entries
                .iter()
                .find(|e| e.kind() == ckpt_core::CheckpointKind::PreEdit)
                .ok_or_else(|| anyhow::anyhow!("pre-edit checkpoint missing"))?;
            let diff = engine.diff(before.id().as_str())?;
            anyhow::ensure!(diff.files == vec!["src/lib.rs".to_string()]);
            Ok(())
        })
        .run()
        .unwrap();
}

#[test]
fn test_branch_rollback_switches_to_restore_branch() {
    Scenario::new("branch_rollback")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", LIB_V2)
        .post_edit(&["src/lib.rs"])
        .rollback("before", RollbackMode::Branch)
        .assert(Assertion::OnRestoreBranch {
            label: "before".into(),
        })
        .assert_file("src/lib.rs", LIB_V1)
        .run()
        .unwrap();
}

#[test]
fn test_branch_rollback_refuses_to_overwrite_changes() {
    Scenario::new("branch_rollback_dirty")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", LIB_V2)
        .post_edit(&["src/lib.rs"])
        .agent_writes("src/lib.rs", b"// uncommitted\n")
        .rollback_fails("before", RollbackMode::Branch, ErrorMatch::DirtyWorkingTree)
        .assert_file("src/lib.rs", b"// uncommitted\n")
        .run()
        .unwrap();
}

#[test]
fn test_hard_rollback_refuses_dirty_tree() {
    Scenario::new("hard_rollback_dirty")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", LIB_V2)
        .rollback_fails("before", RollbackMode::Hard, ErrorMatch::DirtyWorkingTree)
        .assert_file("src/lib.rs", LIB_V2)
        .rollback_forced("before")
        .assert_file("src/lib.rs", LIB_V1)
        .run()
        .unwrap();
}

#[test]
fn test_rollback_after_user_commit() {
    Scenario::new("rollback_after_user_commit")
        .with_project()
        .pre_edit(&["src/lib.rs"])
        .label("before")
        .agent_writes("src/lib.rs", LIB_V2)
        .user_commits("manual change")
        .rollback("before", RollbackMode::Hard)
        .assert_file("src/lib.rs", LIB_V1)
        .run()
        .unwrap();
}

#[test]
fn test_rollback_to_deleted_checkpoint() {
    Scenario::new("rollback_to_deleted")
        .with_project()
        .pre_create(&["src/gone.rs"])
        .label("gone")
        .stop()
        .delete("gone")
        .assert_gone("gone")
        .rollback_fails("gone", RollbackMode::Hard, ErrorMatch::CheckpointNotFound)
        .run()
        .unwrap();
}
