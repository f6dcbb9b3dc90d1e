use chrono::{DateTime, Utc};
use mlq_schemas::{Question, QuestionStatus, ReconcileAction};

use crate::{FailureKind, QuestionMutation, ReconcileDecision, RemoteOutcome, RemoteState};

fn decision(
    q: &Question,
    action: ReconcileAction,
    mutation: QuestionMutation,
    error: Option<String>,
) -> ReconcileDecision {
    let emit_update = mutation.status_changed()
        || (mutation.requires_manual_review && !q.requires_manual_review);
    ReconcileDecision {
        question_id: q.id,
        account_id: q.account_id,
        action,
        mutation,
        emit_update,
        error,
        deferred: false,
        retry_after: None,
        flag_account_reauth: false,
    }
}

/// One state-machine step for a question that passed eligibility.
///
/// - remote answer => COMPLETED, `approved_at` from the marketplace
/// - remote closed or gone => EXPIRED
/// - remote open => NO_CHANGE (an ERROR question still spends one attempt)
/// - transient failure => RETRY_FAILED, one attempt spent; reaching
///   `max_attempts` parks the question in ERROR with manual review
/// - 429, limiter starvation, rejected credentials => RETRY_FAILED, budget untouched
pub fn classify(
    q: &Question,
    outcome: &RemoteOutcome,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> ReconcileDecision {
    let base = QuestionMutation::touch(q, now);

    match outcome {
        RemoteOutcome::Observed(remote) => match &remote.state {
            RemoteState::Answered { text, answered_at } => {
                let m = QuestionMutation {
                    status: QuestionStatus::Completed,
                    approved_at: Some(answered_at.unwrap_or(now)),
                    answer_text: Some(text.clone()),
                    ..base
                };
                decision(q, ReconcileAction::MarkedAnsweredManually, m, None)
            }
            RemoteState::Closed { .. } => {
                let m = QuestionMutation {
                    status: QuestionStatus::Expired,
                    approved_at: None,
                    ..base
                };
                decision(q, ReconcileAction::MarkedExpired, m, None)
            }
            RemoteState::Open => {
                let m = if q.status == QuestionStatus::Error {
                    QuestionMutation {
                        reconcile_attempts: q.reconcile_attempts.saturating_add(1),
                        ..base
                    }
                } else {
                    base
                };
                decision(q, ReconcileAction::NoChange, m, None)
            }
        },

        RemoteOutcome::NotFound => {
            let m = QuestionMutation {
                status: QuestionStatus::Expired,
                approved_at: None,
                ..base
            };
            decision(q, ReconcileAction::MarkedExpired, m, None)
        }

        RemoteOutcome::Failed {
            kind: FailureKind::Transient,
            detail,
            ..
        } => {
            let attempts = q.reconcile_attempts.saturating_add(1);
            let give_up = attempts >= max_attempts;
            let m = if give_up {
                QuestionMutation {
                    status: QuestionStatus::Error,
                    approved_at: None,
                    reconcile_attempts: attempts,
                    requires_manual_review: true,
                    ..base
                }
            } else {
                QuestionMutation {
                    reconcile_attempts: attempts,
                    ..base
                }
            };
            let error = if give_up {
                format!("{detail}; giving up after {attempts} attempts")
            } else {
                detail.clone()
            };
            decision(q, ReconcileAction::RetryFailed, m, Some(error))
        }

        RemoteOutcome::Failed {
            kind,
            detail,
            retry_after,
        } => {
            let mut d = decision(
                q,
                ReconcileAction::RetryFailed,
                base,
                Some(format!("{kind}: {detail}")),
            );
            d.deferred = *kind == FailureKind::RateLimited;
            d.retry_after = retry_after.filter(|_| d.deferred);
            d.flag_account_reauth = *kind == FailureKind::Unauthorized;
            d
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RemoteQuestion;
    use chrono::Duration;
    use mlq_schemas::ItemRef;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn question(status: QuestionStatus, attempts: u32) -> Question {
        Question {
            id: Uuid::new_v4(),
            marketplace_question_id: "13000000001".to_string(),
            account_id: Uuid::new_v4(),
            body: "is it waterproof?".to_string(),
            ai_suggestion: Some("yes".to_string()),
            answer_text: None,
            status,
            received_at: now() - Duration::hours(3),
            approved_at: None,
            item: ItemRef::default(),
            last_reconciled_at: None,
            reconcile_attempts: attempts,
            requires_manual_review: false,
        }
    }

    fn observed(state: RemoteState) -> RemoteOutcome {
        RemoteOutcome::Observed(RemoteQuestion {
            marketplace_question_id: "13000000001".to_string(),
            raw_status: "X".to_string(),
            state,
        })
    }

    #[test]
    fn remote_answer_completes_with_remote_timestamp() {
        let q = question(QuestionStatus::Error, 2);
        let answered_at = now() - Duration::minutes(40);
        let d = classify(
            &q,
            &observed(RemoteState::Answered {
                text: "Yes, IP67.".to_string(),
                answered_at: Some(answered_at),
            }),
            5,
            now(),
        );
        assert_eq!(d.action, ReconcileAction::MarkedAnsweredManually);
        assert_eq!(d.mutation.status, QuestionStatus::Completed);
        assert_eq!(d.mutation.approved_at, Some(answered_at));
        assert_eq!(d.mutation.answer_text.as_deref(), Some("Yes, IP67."));
        assert_eq!(d.mutation.reconcile_attempts, 2);
        assert!(d.emit_update);
        assert!(d.mutation.apply_to(&q).check_invariants().is_ok());
    }

    #[test]
    fn missing_answer_timestamp_falls_back_to_now() {
        let q = question(QuestionStatus::Processing, 0);
        let d = classify(
            &q,
            &observed(RemoteState::Answered {
                text: "ok".to_string(),
                answered_at: None,
            }),
            5,
            now(),
        );
        assert_eq!(d.mutation.approved_at, Some(now()));
    }

    #[test]
    fn closed_and_not_found_expire() {
        for outcome in [
            observed(RemoteState::Closed { closed_at: None }),
            RemoteOutcome::NotFound,
        ] {
            let q = question(QuestionStatus::Error, 1);
            let d = classify(&q, &outcome, 5, now());
            assert_eq!(d.action, ReconcileAction::MarkedExpired);
            assert_eq!(d.mutation.status, QuestionStatus::Expired);
            assert!(d.emit_update);
            assert!(d.error.is_none());
            assert!(d.mutation.apply_to(&q).check_invariants().is_ok());
        }
    }

    #[test]
    fn open_remote_only_counts_attempts_for_error() {
        let err = question(QuestionStatus::Error, 1);
        let d = classify(&err, &observed(RemoteState::Open), 5, now());
        assert_eq!(d.action, ReconcileAction::NoChange);
        assert_eq!(d.mutation.reconcile_attempts, 2);
        assert!(!d.emit_update);
        assert_eq!(d.to_result().new_status, None);

        let processing = question(QuestionStatus::Processing, 1);
        let d = classify(&processing, &observed(RemoteState::Open), 5, now());
        assert_eq!(d.mutation.reconcile_attempts, 1);
        assert_eq!(d.mutation.last_reconciled_at, now());
    }

    #[test]
    fn transient_failure_gives_up_at_ceiling() {
        let q = question(QuestionStatus::Processing, 3);
        let d = classify(
            &q,
            &RemoteOutcome::failed(FailureKind::Transient, "502 bad gateway"),
            5,
            now(),
        );
        assert_eq!(d.action, ReconcileAction::RetryFailed);
        assert_eq!(d.mutation.reconcile_attempts, 4);
        assert!(!d.mutation.requires_manual_review);
        assert!(!d.emit_update);

        let q = question(QuestionStatus::Processing, 4);
        let d = classify(
            &q,
            &RemoteOutcome::failed(FailureKind::Transient, "502 bad gateway"),
            5,
            now(),
        );
        assert_eq!(d.mutation.reconcile_attempts, 5);
        assert_eq!(d.mutation.status, QuestionStatus::Error);
        assert!(d.mutation.requires_manual_review);
        assert!(d.emit_update);
        assert!(d.error.unwrap().contains("giving up"));
    }

    #[test]
    fn throttling_and_auth_leave_budget_alone() {
        let q = question(QuestionStatus::Error, 2);

        let d = classify(
            &q,
            &RemoteOutcome::throttled("http status=429", Some(std::time::Duration::from_secs(2))),
            5,
            now(),
        );
        assert!(d.deferred);
        assert_eq!(d.retry_after, Some(std::time::Duration::from_secs(2)));
        assert_eq!(d.mutation.reconcile_attempts, 2);

        let d = classify(
            &q,
            &RemoteOutcome::failed(FailureKind::RateLimitTimeout, "waited 30s"),
            5,
            now(),
        );
        assert!(!d.deferred);
        assert_eq!(d.mutation.reconcile_attempts, 2);

        let d = classify(
            &q,
            &RemoteOutcome::failed(FailureKind::Unauthorized, "invalid_grant"),
            5,
            now(),
        );
        assert!(d.flag_account_reauth);
        assert_eq!(d.action, ReconcileAction::RetryFailed);
        assert_eq!(d.mutation.reconcile_attempts, 2);
        assert!(!d.emit_update);
    }
}
