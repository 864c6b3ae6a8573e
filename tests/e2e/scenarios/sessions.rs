use crate::harness::{Assertion, ErrorMatch, Scenario, DEFAULT_SESSION};
use ckpt_core::{CheckpointKind, Config};

#[test]
fn test_stop_closes_session_with_summary() {
    Scenario::new("stop_closes_session_with_summary")
        .with_project()
        .task_start("tidy up")
        .pre_edit(&["src/lib.rs"])
        .agent_writes("src/lib.rs", b"pub fn answer() -> u32 {\n    7\n}\n")
        .post_edit(&["src/lib.rs"])
        .stop()
        .label("end")
        .assert_session_closed(DEFAULT_SESSION)
        .assert_kind_count(CheckpointKind::SessionEnd, 1)
        .assert(Assertion::SessionCheckpointCount {
            session: DEFAULT_SESSION.into(),
            count: 4,
        })
        .assert(Assertion::SummaryContains {
            session: DEFAULT_SESSION.into(),
            text: "# Session session-1".into(),
        })
        .assert(Assertion::SummaryContains {
            session: DEFAULT_SESSION.into(),
            text: "| pre-edit | 1 |".into(),
        })
        .assert(Assertion::SummaryContains {
            session: DEFAULT_SESSION.into(),
            text: "src/lib.rs".into(),
        })
        .check(|engine| {
            let summary = engine.summary(None)?;
            anyhow::ensure!(summary.contains("## Timeline"));
            let path = engine
                .store_root()
                .join("summaries")
                .join(format!("{}.md", DEFAULT_SESSION));
            anyhow::ensure!(path.exists(), "{} not written", path.display());
            Ok(())
        })
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_repeated_stop_is_a_no_op() {
    Scenario::new("repeated_stop")
        .with_project()
        .pre_create(&["src/extra.rs"])
        .stop()
        .assert_recorded()
        .wait_hours(1)
        .stop()
        .assert(Assertion::LastEventSkipped)
        .assert_kind_count(CheckpointKind::SessionEnd, 1)
        .assert_session_closed(DEFAULT_SESSION)
        .run()
        .unwrap();
}

#[test]
fn test_events_after_stop_are_rejected() {
    Scenario::new("events_after_stop")
        .with_project()
        .pre_create(&["a.rs"])
        .stop()
        .pre_edit(&["src/lib.rs"])
        .assert_event_failed(ErrorMatch::SessionClosed)
        .assert_checkpoint_count(2)
        .run()
        .unwrap();
}

#[test]
fn test_sessions_are_independent() {
    Scenario::new("sessions_are_independent")
        .with_project()
        .in_session("alpha")
        .pre_create(&["alpha.rs"])
        .in_session("beta")
        .pre_create(&["beta.rs"])
        .stop()
        .assert_session_open("alpha")
        .assert_session_closed("beta")
        .assert(Assertion::SessionCheckpointCount {
            session: "alpha".into(),
            count: 1,
        })
        .assert(Assertion::SessionCheckpointCount {
            session: "beta".into(),
            count: 2,
        })
        .in_session("alpha")
        .pre_create(&["alpha2.rs"])
        .assert_recorded()
        .run()
        .unwrap();
}

#[test]
fn test_stop_without_session_end_tag() {
    let mut config = Config::default();
    config.hooks.tag_session_end = false;

    Scenario::new("stop_without_session_end_tag")
        .with_project()
        .with_config(config)
        .pre_create(&["a.rs"])
        .stop()
        .assert(Assertion::LastEventSkipped)
        .assert_session_closed(DEFAULT_SESSION)
        .assert_kind_count(CheckpointKind::SessionEnd, 0)
        .run()
        .unwrap();
}

#[test]
fn test_stop_for_unknown_session_closes_it() {
    Scenario::new("stop_unknown_session")
        .with_project()
        .in_session("never-seen")
        .stop()
        .assert_recorded()
        .assert_session_closed("never-seen")
        .run()
        .unwrap();
}
