use std::time::Duration;

use common::{SubmissionStatus, Verdict};
use judge::{JudgeError, TransitionError};

use crate::harness::{Behavior, ScriptedService, TestJudge, eventually};

fn echo_line() -> std::sync::Arc<ScriptedService> {
    ScriptedService::new(|stdin| Behavior::echo(&format!("{stdin}\n")))
}

mod execution_failures {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_resolves_internal_error() {
        let judge = TestJudge::new(ScriptedService::new(|_| Behavior::Unavailable));
        judge.seed(1, &[("1", "1\n"), ("2", "2\n")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::InternalError);

        let stored = judge.stored(1);
        assert_eq!(stored.submission.status, SubmissionStatus::InternalError);
        for run in &stored.test_cases {
            assert_eq!(run.verdict, Some(Verdict::InternalError));
            assert!(!run.passed);
            assert!(run.stderr.as_deref().unwrap().contains("connection refused"));
        }
        // Three attempts for each of the two cases.
        assert_eq!(judge.service.calls(), 6);
    }

    #[tokio::test]
    async fn one_failing_case_does_not_fail_its_siblings() {
        let judge = TestJudge::new(ScriptedService::new(|stdin| match stdin {
            "2" => Behavior::Unavailable,
            other => Behavior::echo(&format!("{other}\n")),
        }));
        judge.seed(1, &[("1", "1\n"), ("2", "2\n"), ("3", "3\n")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::InternalError);

        let stored = judge.stored(1);
        assert_eq!(stored.test_cases[0].verdict, Some(Verdict::Accepted));
        assert_eq!(stored.test_cases[1].verdict, Some(Verdict::InternalError));
        assert_eq!(stored.test_cases[2].verdict, Some(Verdict::Accepted));
    }

    #[tokio::test]
    async fn hung_service_hits_judging_deadline() {
        let judge = TestJudge::builder(ScriptedService::new(|_| Behavior::Hang))
            .deadline(Duration::from_millis(100))
            .build();
        judge.seed(1, &[("1", "1\n"), ("2", "2\n")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::InternalError);

        let stored = judge.stored(1);
        assert!(
            stored
                .test_cases
                .iter()
                .all(|run| run.verdict == Some(Verdict::InternalError))
        );
        assert!(
            stored.test_cases[0]
                .stderr
                .as_deref()
                .unwrap()
                .contains("deadline")
        );
        let service = judge.service.clone();
        eventually(move || service.cancelled() == 1).await;
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancelled_submission_ignores_late_results() {
        let mut judge = TestJudge::new(ScriptedService::new(|stdin| match stdin {
            "2" => Behavior::IgnoresCancel {
                after: Duration::from_millis(80),
            },
            other => Behavior::echo(&format!("{other}\n")),
        }));
        judge.seed(1, &[("1", "1\n"), ("2", "2\n"), ("3", "3\n")]);

        let orchestrator = judge.orchestrator.clone();
        let judging = tokio::spawn(async move { orchestrator.judge_submission(1).await });

        let service = judge.service.clone();
        eventually(move || service.started().iter().any(|stdin| stdin == "2")).await;
        assert!(judge.orchestrator.is_judging(1));
        assert!(judge.orchestrator.cancel(1));

        let status = judging.await.unwrap().unwrap();
        assert_eq!(status, SubmissionStatus::InternalError);
        assert!(!judge.orchestrator.is_judging(1));
        assert!(!judge.orchestrator.cancel(1));
        assert!(!judge.service.delivered().contains(&"2".to_string()));

        let stored = judge.stored(1);
        assert_eq!(stored.test_cases[0].verdict, Some(Verdict::Accepted));
        assert_eq!(stored.test_cases[1].verdict, Some(Verdict::InternalError));
        assert!(
            stored.test_cases[1]
                .stderr
                .as_deref()
                .unwrap()
                .contains("cancelled")
        );

        // Case "2" would pass, but its result only arrives after cancellation.
        let service = judge.service.clone();
        eventually(move || service.delivered().contains(&"2".to_string())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(judge.stored(1), stored);

        let err = judge.orchestrator.judge_submission(1).await.unwrap_err();
        assert!(matches!(
            err,
            JudgeError::Transition(TransitionError::AlreadyJudged {
                submission_id: 1,
                status: SubmissionStatus::InternalError,
            })
        ));
        assert_eq!(judge.stored(1), stored);

        let notifications = judge.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].status, SubmissionStatus::InternalError);
    }
}

mod persistence {
    use super::*;

    #[tokio::test]
    async fn failed_write_is_retried_without_rejudging() {
        let mut judge = TestJudge::builder(echo_line()).save_failures(2, 3).build();
        judge.seed(1, &[("1", "1\n"), ("2", "2\n")]);

        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::Accepted);
        assert_eq!(judge.store.saves(), 3);
        assert_eq!(judge.service.calls(), 2);
        assert_eq!(judge.orchestrator.pending_writes(), 0);
        assert_eq!(judge.notifications().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_write_keeps_result_cached() {
        let mut judge = TestJudge::builder(echo_line()).save_failures(10, 2).build();
        judge.seed(1, &[("1", "1\n")]);

        let err = judge.orchestrator.judge_submission(1).await.unwrap_err();
        assert!(matches!(err, JudgeError::Persistence { submission_id: 1, .. }));
        assert!(err.is_retryable());
        assert_eq!(judge.orchestrator.pending_writes(), 1);
        assert_eq!(judge.stored(1).submission.status, SubmissionStatus::Running);
        assert!(judge.notifications().is_empty());

        judge.store.fail_next_saves(0);
        let status = judge.orchestrator.judge_submission(1).await.unwrap();
        assert_eq!(status, SubmissionStatus::Accepted);
        assert_eq!(judge.service.calls(), 1);
        assert_eq!(judge.stored(1).submission.status, SubmissionStatus::Accepted);
        assert_eq!(judge.orchestrator.pending_writes(), 0);
        assert_eq!(judge.notifications().len(), 1);
    }

    #[tokio::test]
    async fn flush_persists_cached_results_once() {
        let mut judge = TestJudge::builder(echo_line()).save_failures(10, 1).build();
        judge.seed(1, &[("1", "1\n")]);
        judge.seed(2, &[("2", "2\n")]);

        assert!(judge.orchestrator.judge_submission(1).await.is_err());
        assert!(judge.orchestrator.judge_submission(2).await.is_err());
        assert_eq!(judge.orchestrator.pending_writes(), 2);

        judge.store.fail_next_saves(0);
        assert_eq!(judge.orchestrator.flush_pending().await, 2);
        assert_eq!(judge.orchestrator.flush_pending().await, 0);

        assert_eq!(judge.stored(1).submission.status, SubmissionStatus::Accepted);
        assert_eq!(judge.stored(2).submission.status, SubmissionStatus::Accepted);
        assert_eq!(judge.notifications().len(), 2);
        assert_eq!(judge.service.calls(), 2);
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn empty_test_case_set_is_rejected_before_claim() {
        let mut judge = TestJudge::new(echo_line());
        judge.seed(1, &[]);

        let err = judge.orchestrator.judge_submission(1).await.unwrap_err();
        assert!(matches!(err, JudgeError::Validation { submission_id: 1, .. }));
        assert_eq!(judge.service.calls(), 0);
        assert_eq!(judge.stored(1).submission.status, SubmissionStatus::Pending);
        assert!(judge.notifications().is_empty());
    }

    #[tokio::test]
    async fn unknown_submission_is_not_found() {
        let judge = TestJudge::new(echo_line());

        let err = judge.orchestrator.judge_submission(42).await.unwrap_err();
        assert!(matches!(err, JudgeError::NotFound(42)));
    }

    #[tokio::test]
    async fn judged_submission_is_never_judged_again() {
        let mut judge = TestJudge::new(echo_line());
        judge.seed(1, &[("1", "1\n")]);

        judge.orchestrator.judge_submission(1).await.unwrap();
        let err = judge.orchestrator.judge_submission(1).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(judge.service.calls(), 1);
        assert_eq!(judge.notifications().len(), 1);
    }
}
