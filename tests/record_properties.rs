use proptest::prelude::*;
use serde_json::{Map, json};

use execflow::job::JobRecord;
use execflow::types::JobStatus;

/// One attempted mutation of a record.
#[derive(Debug, Clone)]
enum Op {
    Log(String),
    Run,
    Succeed,
    Fail,
    Cancel,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => "[a-z ]{0,12}".prop_map(Op::Log),
        1 => Just(Op::Run),
        1 => Just(Op::Succeed),
        1 => Just(Op::Fail),
        1 => Just(Op::Cancel),
    ]
}

fn apply(record: &mut JobRecord, op: &Op) -> bool {
    let res = match op {
        Op::Log(line) => record.append_log(line.clone()),
        Op::Run => record.mark_running(),
        Op::Succeed => record.succeed(json!({"result": "ok"})),
        Op::Fail => record.fail(json!({"error": "boom"})),
        Op::Cancel => record.cancel(),
    };
    res.is_ok()
}

fn allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Failed)
            | (Pending, Cancelled)
            | (Running, Success)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

proptest! {
    #[test]
    fn record_invariants_hold_for_any_operation_sequence(
        ops in proptest::collection::vec(op_strategy(), 0..40)
    ) {
        let mut record = JobRecord::new(Map::new());
        let mut sealed_at = None;

        for op in &ops {
            let before = record.clone();
            let applied = apply(&mut record, op);

            if !applied {
                // Rejected operations leave the record untouched.
                prop_assert_eq!(&record, &before);
                continue;
            }

            if before.status() != record.status() {
                prop_assert!(allowed(before.status(), record.status()));
            }

            // Logs only ever grow, and only by appending.
            prop_assert!(record.logs().starts_with(before.logs()));

            // finished_at is set iff terminal, and never rewritten.
            prop_assert_eq!(record.finished_at().is_some(), record.is_terminal());
            if let Some(at) = sealed_at {
                prop_assert_eq!(record.finished_at(), Some(at));
            }
            if record.is_terminal() {
                sealed_at = record.finished_at();
            }

            // result is present only on SUCCESS/FAILED.
            prop_assert_eq!(
                record.result().is_some(),
                matches!(record.status(), JobStatus::Success | JobStatus::Failed)
            );
        }

        if record.is_terminal() {
            // A terminal record accepts nothing further.
            let mut probe = record.clone();
            prop_assert!(!apply(&mut probe, &Op::Log("late".into())));
            prop_assert!(!apply(&mut probe, &Op::Cancel));
            prop_assert_eq!(&probe, &record);
        }
    }
}
