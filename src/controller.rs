//! Transition controller: the single authority for phase-instance state
//! changes.
//!
//! Every write here follows the same shape: pre-read the instance and check
//! the guard (returning a typed error naming the current status and the
//! unmet requirement), then apply a status-guarded conditional UPDATE
//! (`... WHERE id = ? AND status = ?`) inside one transaction together with
//! its audit entries. A zero row count after a passing pre-read means a
//! concurrent writer won and maps to `ConcurrencyConflict` — never a silent
//! overwrite. Correctness therefore holds across server instances, not just
//! behind this process's mutex.

use rusqlite::{Transaction, params};

use crate::audit::{self, NewAuditEntry};
use crate::db::{WorkflowDb, now_utc};
use crate::errors::WorkflowError;
use crate::models::{
    AuditAction, PhaseInstance, PhaseReview, PhaseStatus, Principal, ReasonCode, ReviewOutcome,
    TransitionResult,
};
use crate::review::{self, ReviewMeta};

/// Conditional status update. Timestamps and the review link are only ever
/// filled in, never cleared.
fn set_status(
    tx: &Transaction<'_>,
    instance_id: i64,
    expected: PhaseStatus,
    to: PhaseStatus,
    started_at: Option<&str>,
    completed_at: Option<&str>,
    review_id: Option<i64>,
) -> Result<(), WorkflowError> {
    let updated = tx.execute(
        "UPDATE phase_instances
         SET status = ?1,
             started_at = COALESCE(?2, started_at),
             completed_at = COALESCE(?3, completed_at),
             review_id = COALESCE(?4, review_id)
         WHERE id = ?5 AND status = ?6",
        params![
            to.as_str(),
            started_at,
            completed_at,
            review_id,
            instance_id,
            expected.as_str(),
        ],
    )?;
    if updated == 0 {
        return Err(WorkflowError::ConcurrencyConflict {
            instance_id,
            expected,
        });
    }
    Ok(())
}

impl WorkflowDb {
    /// Lifecycle position of an instance's phase definition.
    fn definition_order(&self, phase_definition_id: i64) -> Result<i64, WorkflowError> {
        Ok(self.conn.query_row(
            "SELECT sort_order FROM phase_definitions WHERE id = ?1",
            params![phase_definition_id],
            |row| row.get(0),
        )?)
    }

    /// The project's instance at the given lifecycle position, if any.
    fn instance_at_order(
        &self,
        project_id: i64,
        sort_order: i64,
    ) -> Result<Option<PhaseInstance>, WorkflowError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.project_id, i.phase_definition_id, i.status,
                    i.started_at, i.completed_at, i.review_id
             FROM phase_instances i
             JOIN phase_definitions d ON d.id = i.phase_definition_id
             WHERE i.project_id = ?1 AND d.sort_order = ?2",
        )?;
        let mut rows = stmt.query_map(params![project_id, sort_order], crate::db::map_instance_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_instance()?)),
            None => Ok(None),
        }
    }

    /// Submit an active phase for its gate review: creates a pending
    /// `PhaseReview` and moves the instance to `under_review` in a single
    /// transaction.
    pub fn submit_for_review(
        &self,
        instance_id: i64,
        meta: &ReviewMeta,
        principal: &Principal,
    ) -> Result<PhaseReview, WorkflowError> {
        let instance = self.require_instance(instance_id)?;
        if !instance.status.is_submittable() {
            return Err(WorkflowError::InvalidState {
                instance_id,
                current: instance.status,
                requirement: "must be active to submit for review".to_string(),
            });
        }

        let tx = self.conn.unchecked_transaction()?;
        let review_id = review::insert_review(&tx, instance_id, meta)?;
        set_status(
            &tx,
            instance_id,
            instance.status,
            PhaseStatus::UnderReview,
            None,
            None,
            Some(review_id),
        )?;
        audit::append(
            &tx,
            &NewAuditEntry {
                phase_instance_id: instance_id,
                action: AuditAction::ReviewSubmitted,
                from_status: Some(instance.status),
                to_status: Some(PhaseStatus::UnderReview),
                performed_by: &principal.user_id,
                reason_code: None,
                comments: Some(&meta.review_title),
            },
        )?;
        tx.commit()?;

        tracing::info!(instance_id, review_id, "phase submitted for gate review");
        self.require_review(review_id)
    }

    /// Apply a gate decision to a pending review.
    ///
    /// Rejection reopens the phase for rework. Approval locks the phase
    /// and, when `auto_advance` is set and a successor exists, activates it
    /// — all in one transaction. With `auto_advance` off the phase is left
    /// `approved` for a later manual `request_transition`.
    pub fn complete_review(
        &self,
        review_id: i64,
        outcome: ReviewOutcome,
        comments: Option<&str>,
        principal: &Principal,
        auto_advance: bool,
    ) -> Result<TransitionResult, WorkflowError> {
        if !principal.role.can_decide_gate() {
            return Err(WorkflowError::Authorization(format!(
                "role {} may not finalize gate reviews",
                principal.role
            )));
        }
        if outcome == ReviewOutcome::Pending {
            return Err(WorkflowError::Validation(
                "outcome must be approved, approved_with_conditions, or rejected".to_string(),
            ));
        }

        let existing = self.require_review(review_id)?;
        if existing.outcome != ReviewOutcome::Pending {
            return Err(WorkflowError::AlreadyCompleted {
                review_id,
                outcome: existing.outcome.to_string(),
            });
        }
        let instance = self.require_instance(existing.phase_instance_id)?;
        if instance.status != PhaseStatus::UnderReview {
            return Err(WorkflowError::InvalidState {
                instance_id: instance.id,
                current: instance.status,
                requirement: "must be under_review to apply a gate decision".to_string(),
            });
        }

        let now = now_utc();
        let tx = self.conn.unchecked_transaction()?;
        review::finalize_review(&tx, review_id, outcome, comments, &principal.user_id, &now)?;

        let (locked_id, activated_id) = if outcome == ReviewOutcome::Rejected {
            set_status(
                &tx,
                instance.id,
                PhaseStatus::UnderReview,
                PhaseStatus::RejectedActive,
                None,
                None,
                None,
            )?;
            audit::append(
                &tx,
                &NewAuditEntry {
                    phase_instance_id: instance.id,
                    action: AuditAction::ReviewRejected,
                    from_status: Some(PhaseStatus::UnderReview),
                    to_status: Some(PhaseStatus::RejectedActive),
                    performed_by: &principal.user_id,
                    reason_code: Some(ReasonCode::Rework),
                    comments,
                },
            )?;
            (None, None)
        } else {
            let order = self.definition_order(instance.phase_definition_id)?;
            let successor = self.instance_at_order(instance.project_id, order + 1)?;
            match (auto_advance, successor) {
                (true, Some(next)) => {
                    set_status(
                        &tx,
                        instance.id,
                        PhaseStatus::UnderReview,
                        PhaseStatus::Locked,
                        None,
                        Some(&now),
                        None,
                    )?;
                    audit::append(
                        &tx,
                        &NewAuditEntry {
                            phase_instance_id: instance.id,
                            action: AuditAction::PhaseLocked,
                            from_status: Some(PhaseStatus::UnderReview),
                            to_status: Some(PhaseStatus::Locked),
                            performed_by: &principal.user_id,
                            reason_code: Some(ReasonCode::GateDecision),
                            comments,
                        },
                    )?;
                    set_status(
                        &tx,
                        next.id,
                        PhaseStatus::NotStarted,
                        PhaseStatus::Active,
                        Some(&now),
                        None,
                        None,
                    )?;
                    audit::append(
                        &tx,
                        &NewAuditEntry {
                            phase_instance_id: next.id,
                            action: AuditAction::PhaseActivated,
                            from_status: Some(PhaseStatus::NotStarted),
                            to_status: Some(PhaseStatus::Active),
                            performed_by: &principal.user_id,
                            reason_code: Some(ReasonCode::GateDecision),
                            comments: None,
                        },
                    )?;
                    (Some(instance.id), Some(next.id))
                }
                // Final phase, or auto-advance declined: the phase rests at
                // approved until a successor activation locks it.
                _ => {
                    set_status(
                        &tx,
                        instance.id,
                        PhaseStatus::UnderReview,
                        PhaseStatus::Approved,
                        None,
                        Some(&now),
                        None,
                    )?;
                    audit::append(
                        &tx,
                        &NewAuditEntry {
                            phase_instance_id: instance.id,
                            action: AuditAction::ReviewApproved,
                            from_status: Some(PhaseStatus::UnderReview),
                            to_status: Some(PhaseStatus::Approved),
                            performed_by: &principal.user_id,
                            reason_code: Some(ReasonCode::GateDecision),
                            comments,
                        },
                    )?;
                    (None, None)
                }
            }
        };
        tx.commit()?;

        tracing::info!(
            review_id,
            outcome = %outcome,
            activated = ?activated_id,
            "gate review completed"
        );
        Ok(TransitionResult {
            review: Some(self.require_review(review_id)?),
            locked: locked_id.map(|id| self.require_instance(id)).transpose()?,
            activated: activated_id.map(|id| self.require_instance(id)).transpose()?,
            overridden: None,
            warning: None,
        })
    }

    /// Explicit manual-transition path, used when a gate decision was made
    /// with auto-advance off. Re-validates the same guards as the automatic
    /// path: the source phase is approved behind a completed review and the
    /// target is exactly next in sequence.
    pub fn request_transition(
        &self,
        project_id: i64,
        from_id: i64,
        to_id: i64,
        principal: &Principal,
    ) -> Result<TransitionResult, WorkflowError> {
        if !principal.role.can_decide_gate() {
            return Err(WorkflowError::Authorization(format!(
                "role {} may not advance phases",
                principal.role
            )));
        }

        let from = self.require_instance(from_id)?;
        let to = self.require_instance(to_id)?;
        if from.project_id != project_id || to.project_id != project_id {
            return Err(WorkflowError::Validation(format!(
                "phase instances {} and {} must both belong to project {}",
                from_id, to_id, project_id
            )));
        }

        let from_order = self.definition_order(from.phase_definition_id)?;
        let to_order = self.definition_order(to.phase_definition_id)?;
        if to_order != from_order + 1 {
            return Err(WorkflowError::SequenceViolation {
                from_order,
                to_order,
            });
        }

        if from.status != PhaseStatus::Approved {
            return Err(WorkflowError::InvalidState {
                instance_id: from_id,
                current: from.status,
                requirement: "predecessor phase not yet approved".to_string(),
            });
        }
        let review_id = from.review_id.ok_or_else(|| WorkflowError::InvalidState {
            instance_id: from_id,
            current: from.status,
            requirement: "no gate review recorded for the approved phase".to_string(),
        })?;
        let gate = self.require_review(review_id)?;
        if !gate.outcome.is_approval() {
            return Err(WorkflowError::InvalidState {
                instance_id: from_id,
                current: from.status,
                requirement: "gate review outcome is not an approval".to_string(),
            });
        }
        if to.status != PhaseStatus::NotStarted {
            return Err(WorkflowError::InvalidState {
                instance_id: to_id,
                current: to.status,
                requirement: "target phase must be not_started".to_string(),
            });
        }

        let now = now_utc();
        let tx = self.conn.unchecked_transaction()?;
        set_status(
            &tx,
            from_id,
            PhaseStatus::Approved,
            PhaseStatus::Locked,
            None,
            None,
            None,
        )?;
        audit::append(
            &tx,
            &NewAuditEntry {
                phase_instance_id: from_id,
                action: AuditAction::PhaseLocked,
                from_status: Some(PhaseStatus::Approved),
                to_status: Some(PhaseStatus::Locked),
                performed_by: &principal.user_id,
                reason_code: Some(ReasonCode::ManualAdvance),
                comments: None,
            },
        )?;
        set_status(
            &tx,
            to_id,
            PhaseStatus::NotStarted,
            PhaseStatus::Active,
            Some(&now),
            None,
            None,
        )?;
        audit::append(
            &tx,
            &NewAuditEntry {
                phase_instance_id: to_id,
                action: AuditAction::PhaseActivated,
                from_status: Some(PhaseStatus::NotStarted),
                to_status: Some(PhaseStatus::Active),
                performed_by: &principal.user_id,
                reason_code: Some(ReasonCode::ManualAdvance),
                comments: None,
            },
        )?;
        tx.commit()?;

        tracing::info!(project_id, from_id, to_id, "manual phase transition applied");
        Ok(TransitionResult {
            review: None,
            locked: Some(self.require_instance(from_id)?),
            activated: Some(self.require_instance(to_id)?),
            overridden: None,
            warning: None,
        })
    }

    /// Audited bypass of the sequence and review guards. Requires a
    /// quality-lead principal and a substantive reason; the audit entry is
    /// written unconditionally — overrides are never silent.
    pub fn emergency_override(
        &self,
        instance_id: i64,
        target: PhaseStatus,
        reason: &str,
        principal: &Principal,
    ) -> Result<TransitionResult, WorkflowError> {
        if reason.trim().len() < 10 {
            return Err(WorkflowError::Validation(
                "override reason must be at least 10 characters".to_string(),
            ));
        }
        if !principal.role.can_override() {
            return Err(WorkflowError::Authorization(format!(
                "role {} may not perform emergency overrides",
                principal.role
            )));
        }

        let instance = self.require_instance(instance_id)?;
        if instance.status == target {
            return Err(WorkflowError::Validation(format!(
                "phase instance {} is already {}",
                instance_id, target
            )));
        }

        let now = now_utc();
        let started_at = matches!(
            target,
            PhaseStatus::Active | PhaseStatus::UnderReview | PhaseStatus::RejectedActive
        )
        .then_some(now.as_str());
        let completed_at = target
            .satisfies_predecessor()
            .then_some(now.as_str());

        let tx = self.conn.unchecked_transaction()?;
        set_status(
            &tx,
            instance_id,
            instance.status,
            target,
            started_at,
            completed_at,
            None,
        )?;
        audit::append(
            &tx,
            &NewAuditEntry {
                phase_instance_id: instance_id,
                action: AuditAction::EmergencyOverride,
                from_status: Some(instance.status),
                to_status: Some(target),
                performed_by: &principal.user_id,
                reason_code: Some(ReasonCode::EmergencyOverride),
                comments: Some(reason),
            },
        )?;
        tx.commit()?;

        tracing::warn!(
            instance_id,
            from = %instance.status,
            to = %target,
            approver = %principal.user_id,
            "emergency override applied"
        );
        Ok(TransitionResult {
            review: None,
            locked: None,
            activated: None,
            overridden: Some(self.require_instance(instance_id)?),
            warning: Some("sequence and review guards bypassed by emergency override".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::templates::TemplateSet;

    fn reviewer() -> Principal {
        Principal {
            user_id: "rev.one".to_string(),
            role: Role::Reviewer,
        }
    }

    fn quality_lead() -> Principal {
        Principal {
            user_id: "qa.lead".to_string(),
            role: Role::QualityLead,
        }
    }

    fn contributor() -> Principal {
        Principal {
            user_id: "eng.one".to_string(),
            role: Role::Contributor,
        }
    }

    fn meta(title: &str) -> ReviewMeta {
        ReviewMeta {
            review_title: title.to_string(),
            scope: "full phase deliverables".to_string(),
            reviewer_ids: vec!["rev.one".to_string()],
            action_items: vec![],
        }
    }

    fn initialized_db(project_id: i64) -> (WorkflowDb, Vec<i64>) {
        let db = WorkflowDb::new_in_memory().unwrap();
        db.seed_templates(&TemplateSet::builtin()).unwrap();
        let views = db.initialize_phases(project_id, &contributor()).unwrap();
        let ids = views.iter().map(|v| v.instance.id).collect();
        (db, ids)
    }

    fn open_count(db: &WorkflowDb, project_id: i64) -> usize {
        db.get_workflow(project_id)
            .unwrap()
            .iter()
            .filter(|v| v.instance.status.is_open())
            .count()
    }

    #[test]
    fn submit_for_review_opens_pending_review() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("Planning gate"), &contributor())
            .unwrap();
        assert_eq!(review.outcome, ReviewOutcome::Pending);
        assert_eq!(review.phase_instance_id, ids[0]);
        assert!(review.signature_hash.is_none());

        let instance = db.require_instance(ids[0]).unwrap();
        assert_eq!(instance.status, PhaseStatus::UnderReview);
        assert_eq!(instance.review_id, Some(review.id));
    }

    #[test]
    fn submit_for_review_rejects_non_active_phase() {
        let (db, ids) = initialized_db(1);
        let err = db
            .submit_for_review(ids[1], &meta("too early"), &contributor())
            .unwrap_err();
        match err {
            WorkflowError::InvalidState { current, .. } => {
                assert_eq!(current, PhaseStatus::NotStarted);
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }
    }

    #[test]
    fn approved_review_locks_phase_and_activates_successor() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("Planning gate"), &contributor())
            .unwrap();
        let result = db
            .complete_review(
                review.id,
                ReviewOutcome::Approved,
                Some("all deliverables present"),
                &reviewer(),
                true,
            )
            .unwrap();

        let locked = result.locked.unwrap();
        assert_eq!(locked.id, ids[0]);
        assert_eq!(locked.status, PhaseStatus::Locked);
        assert!(locked.completed_at.is_some());

        let activated = result.activated.unwrap();
        assert_eq!(activated.id, ids[1]);
        assert_eq!(activated.status, PhaseStatus::Active);
        assert!(activated.started_at.is_some());

        let signed = result.review.unwrap();
        assert_eq!(signed.outcome, ReviewOutcome::Approved);
        assert!(signed.signature_hash.is_some());
        assert!(signed.signed_at.is_some());

        // Exactly two new audit rows: lock + activate.
        let trail = db.audit_trail(ids[0]).unwrap();
        let lock_entries: Vec<_> = trail
            .iter()
            .filter(|e| e.action == AuditAction::PhaseLocked)
            .collect();
        assert_eq!(lock_entries.len(), 1);
        assert_eq!(lock_entries[0].reason_code, Some(ReasonCode::GateDecision));
        let next_trail = db.audit_trail(ids[1]).unwrap();
        assert_eq!(next_trail.len(), 1);
        assert_eq!(next_trail[0].action, AuditAction::PhaseActivated);

        assert_eq!(open_count(&db, 1), 1);
    }

    #[test]
    fn rejected_review_reopens_phase_for_rework() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("Planning gate"), &contributor())
            .unwrap();
        let result = db
            .complete_review(
                review.id,
                ReviewOutcome::Rejected,
                Some("traceability matrix incomplete"),
                &reviewer(),
                true,
            )
            .unwrap();
        assert!(result.locked.is_none());
        assert!(result.activated.is_none());

        let instance = db.require_instance(ids[0]).unwrap();
        assert_eq!(instance.status, PhaseStatus::RejectedActive);

        // Rework resubmission appends a new review; the rejected one stays.
        let second = db
            .submit_for_review(ids[0], &meta("Planning gate (rework)"), &contributor())
            .unwrap();
        assert_ne!(second.id, review.id);
        assert_eq!(
            db.require_review(review.id).unwrap().outcome,
            ReviewOutcome::Rejected
        );
    }

    #[test]
    fn complete_review_twice_is_already_completed() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        db.complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), true)
            .unwrap();
        let trail_len = db.audit_trail(ids[0]).unwrap().len();

        let err = db
            .complete_review(review.id, ReviewOutcome::Rejected, None, &reviewer(), true)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyCompleted { .. }));

        // No duplicate audit entries, no double activation.
        assert_eq!(db.audit_trail(ids[0]).unwrap().len(), trail_len);
        assert_eq!(
            db.require_instance(ids[1]).unwrap().status,
            PhaseStatus::Active
        );
        assert_eq!(open_count(&db, 1), 1);
    }

    #[test]
    fn complete_review_requires_gate_authority() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        let err = db
            .complete_review(review.id, ReviewOutcome::Approved, None, &contributor(), true)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Authorization(_)));
        // Guard fired before any state was touched.
        assert_eq!(
            db.require_review(review.id).unwrap().outcome,
            ReviewOutcome::Pending
        );
    }

    #[test]
    fn pending_is_not_a_valid_decision() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        let err = db
            .complete_review(review.id, ReviewOutcome::Pending, None, &reviewer(), true)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn final_phase_approval_activates_nothing() {
        let (db, ids) = initialized_db(1);
        // Drive all six phases through their gates.
        for (i, id) in ids.iter().enumerate() {
            let review = db
                .submit_for_review(*id, &meta(&format!("gate {}", i + 1)), &contributor())
                .unwrap();
            let result = db
                .complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), true)
                .unwrap();
            if i < ids.len() - 1 {
                assert_eq!(result.activated.as_ref().unwrap().id, ids[i + 1]);
            } else {
                assert!(result.activated.is_none());
                assert!(result.locked.is_none());
            }
        }
        let last = db.require_instance(*ids.last().unwrap()).unwrap();
        assert_eq!(last.status, PhaseStatus::Approved);
        assert!(last.completed_at.is_some());
        assert_eq!(open_count(&db, 1), 0);
    }

    #[test]
    fn manual_transition_after_deferred_advance() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        let result = db
            .complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), false)
            .unwrap();
        assert!(result.activated.is_none());
        assert_eq!(
            db.require_instance(ids[0]).unwrap().status,
            PhaseStatus::Approved
        );

        let result = db
            .request_transition(1, ids[0], ids[1], &reviewer())
            .unwrap();
        assert_eq!(result.locked.unwrap().status, PhaseStatus::Locked);
        assert_eq!(result.activated.unwrap().status, PhaseStatus::Active);
        assert_eq!(open_count(&db, 1), 1);
    }

    #[test]
    fn skipping_a_phase_is_a_sequence_violation() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        db.complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), false)
            .unwrap();

        let trail_before = db.audit_trail(ids[0]).unwrap().len();
        let err = db
            .request_transition(1, ids[0], ids[2], &reviewer())
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::SequenceViolation {
                from_order: 1,
                to_order: 3
            }
        ));
        // No state change, no audit entry.
        assert_eq!(
            db.require_instance(ids[0]).unwrap().status,
            PhaseStatus::Approved
        );
        assert_eq!(
            db.require_instance(ids[2]).unwrap().status,
            PhaseStatus::NotStarted
        );
        assert_eq!(db.audit_trail(ids[0]).unwrap().len(), trail_before);
    }

    #[test]
    fn manual_transition_requires_approved_source() {
        let (db, ids) = initialized_db(1);
        let err = db
            .request_transition(1, ids[0], ids[1], &reviewer())
            .unwrap_err();
        match err {
            WorkflowError::InvalidState { requirement, .. } => {
                assert!(requirement.contains("not yet approved"));
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }
    }

    #[test]
    fn override_with_short_reason_is_rejected() {
        let (db, ids) = initialized_db(1);
        let err = db
            .emergency_override(ids[1], PhaseStatus::Approved, "ok", &quality_lead())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert_eq!(
            db.require_instance(ids[1]).unwrap().status,
            PhaseStatus::NotStarted
        );
    }

    #[test]
    fn override_requires_quality_lead() {
        let (db, ids) = initialized_db(1);
        let err = db
            .emergency_override(
                ids[1],
                PhaseStatus::Approved,
                "business-critical deadline override",
                &reviewer(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Authorization(_)));
    }

    #[test]
    fn override_bypasses_sequence_and_is_audited() {
        let (db, ids) = initialized_db(1);
        let result = db
            .emergency_override(
                ids[1],
                PhaseStatus::Approved,
                "business-critical deadline override",
                &quality_lead(),
            )
            .unwrap();
        assert!(result.warning.is_some());
        // The forced instance comes back in its own field, not as an
        // activation or a lock.
        assert!(result.locked.is_none());
        assert!(result.activated.is_none());
        let overridden = result.overridden.unwrap();
        assert_eq!(overridden.id, ids[1]);
        assert_eq!(overridden.status, PhaseStatus::Approved);
        assert_eq!(
            db.require_instance(ids[1]).unwrap().status,
            PhaseStatus::Approved
        );

        let trail = db.audit_trail(ids[1]).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::EmergencyOverride);
        assert_eq!(trail[0].reason_code, Some(ReasonCode::EmergencyOverride));
        assert_eq!(
            trail[0].comments.as_deref(),
            Some("business-critical deadline override")
        );
    }

    #[test]
    fn single_open_phase_invariant_holds_through_lifecycle() {
        let (db, ids) = initialized_db(1);
        assert_eq!(open_count(&db, 1), 1);

        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        assert_eq!(open_count(&db, 1), 1);

        db.complete_review(review.id, ReviewOutcome::Rejected, None, &reviewer(), true)
            .unwrap();
        assert_eq!(open_count(&db, 1), 1);

        let review = db
            .submit_for_review(ids[0], &meta("gate rework"), &contributor())
            .unwrap();
        db.complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), true)
            .unwrap();
        assert_eq!(open_count(&db, 1), 1);
    }

    #[test]
    fn sequence_invariant_holds_after_each_gate() {
        let (db, ids) = initialized_db(1);
        for id in &ids[..3] {
            let review = db
                .submit_for_review(*id, &meta("gate"), &contributor())
                .unwrap();
            db.complete_review(review.id, ReviewOutcome::Approved, None, &reviewer(), true)
                .unwrap();

            let views = db.get_workflow(1).unwrap();
            for pair in views.windows(2) {
                if pair[1].instance.status != PhaseStatus::NotStarted {
                    assert!(pair[0].instance.status.satisfies_predecessor());
                }
            }
        }
    }

    #[test]
    fn approved_with_conditions_advances_like_approved() {
        let (db, ids) = initialized_db(1);
        let review = db
            .submit_for_review(ids[0], &meta("gate"), &contributor())
            .unwrap();
        let result = db
            .complete_review(
                review.id,
                ReviewOutcome::ApprovedWithConditions,
                Some("close action items before verification"),
                &reviewer(),
                true,
            )
            .unwrap();
        assert_eq!(result.locked.unwrap().status, PhaseStatus::Locked);
        assert_eq!(result.activated.unwrap().status, PhaseStatus::Active);
    }
}
