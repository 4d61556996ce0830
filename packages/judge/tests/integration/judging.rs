use std::time::Duration;

use common::{SubmissionStatus, Verdict};

use crate::harness::{Behavior, MEMORY_LIMIT_KB, ScriptedService, TIME_LIMIT_MS, TestJudge};

fn three_cases() -> [(&'static str, &'static str); 3] {
    [("1", "1\n"), ("2", "2\n"), ("3", "3\n")]
}

mod verdicts {
    use super::*;

    #[tokio::test]
    async fn all_matching_outputs_are_accepted() {
        let mut judge = TestJudge::new(ScriptedService::new(|stdin| {
            Behavior::echo(&format!("{stdin}\n"))
        }));
        judge.seed(1, &three_cases());

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::Accepted);

        let stored = judge.stored(1);
        assert_eq!(stored.submission.status, SubmissionStatus::Accepted);
        assert!(stored.test_cases.iter().all(|run| run.passed));
        assert!(
            stored
                .test_cases
                .iter()
                .all(|run| run.verdict == Some(Verdict::Accepted))
        );
        // Representative snippet comes from the last case when all pass.
        assert_eq!(stored.submission.stdout.as_deref(), Some("3\n"));
        assert_eq!(stored.submission.time_used, Some(10));
        assert_eq!(judge.service.calls(), 3);

        let events = judge.notifications();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].submission_id, 1);
        assert_eq!(events[0].status, SubmissionStatus::Accepted);
    }

    #[tokio::test]
    async fn time_limit_on_one_case_still_runs_the_rest() {
        let judge = TestJudge::new(ScriptedService::new(|stdin| match stdin {
            "2" => Behavior::slow(TIME_LIMIT_MS + 500),
            other => Behavior::echo(&format!("{other}\n")),
        }));
        judge.seed(1, &three_cases());

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::TimeLimitExceeded);

        let stored = judge.stored(1);
        let verdicts: Vec<_> = stored.test_cases.iter().map(|run| run.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Some(Verdict::Accepted),
                Some(Verdict::TimeLimitExceeded),
                Some(Verdict::Accepted),
            ]
        );
        assert!(judge.service.started().contains(&"3".to_string()));
        assert_eq!(
            stored.submission.time_used,
            Some((TIME_LIMIT_MS + 500) as i64)
        );
    }

    #[tokio::test]
    async fn most_severe_verdict_wins_and_first_failure_is_reported() {
        let judge = TestJudge::new(ScriptedService::new(|stdin| match stdin {
            "2" => Behavior::echo("wrong\n"),
            "3" => Behavior::Output {
                stdout: "3\n".into(),
                time_ms: 10,
                memory_kb: MEMORY_LIMIT_KB * 2,
                after: Duration::from_millis(5),
            },
            other => Behavior::echo(&format!("{other}\n")),
        }));
        judge.seed(1, &three_cases());

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::MemoryLimitExceeded);

        let stored = judge.stored(1);
        assert_eq!(stored.test_cases[1].verdict, Some(Verdict::WrongAnswer));
        assert_eq!(
            stored.test_cases[2].verdict,
            Some(Verdict::MemoryLimitExceeded)
        );
        assert_eq!(stored.submission.stdout.as_deref(), Some("wrong\n"));
        assert_eq!(
            stored.submission.memory_used,
            Some((MEMORY_LIMIT_KB * 2) as i64)
        );
    }

    #[tokio::test]
    async fn trailing_whitespace_differences_are_accepted() {
        let judge = TestJudge::new(ScriptedService::new(|stdin| {
            Behavior::echo(&format!("{stdin}   \n\n"))
        }));
        judge.seed(1, &[("7", "7")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::Accepted);
    }
}

mod compile_errors {
    use super::*;

    #[tokio::test]
    async fn compile_error_on_first_case_skips_the_rest() {
        let mut judge = TestJudge::new(ScriptedService::new(|_| Behavior::CompileError));
        judge.seed(1, &three_cases());

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::CompileError);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(judge.service.calls(), 1);
        assert_eq!(judge.service.started(), vec!["1".to_string()]);

        let stored = judge.stored(1);
        assert_eq!(stored.test_cases[0].verdict, Some(Verdict::CompileError));
        assert!(stored.test_cases[1..].iter().all(|run| run.verdict.is_none()));
        assert!(
            stored
                .submission
                .compile_output
                .as_deref()
                .unwrap()
                .contains("SyntaxError")
        );
        assert_eq!(judge.notifications().len(), 1);
    }

    #[tokio::test]
    async fn single_case_compile_error_finalizes() {
        let judge = TestJudge::new(ScriptedService::new(|_| Behavior::CompileError));
        judge.seed(1, &[("1", "1")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::CompileError);
        assert_eq!(judge.stored(1).submission.status, SubmissionStatus::CompileError);
    }
}
