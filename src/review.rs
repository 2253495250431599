//! Phase gate reviews and electronic signature capture.
//!
//! A review is created when a phase is submitted for its gate and is
//! immutable once its outcome is finalized: corrections are appended as new
//! reviews, never edited in place. The signature is a content hash bound to
//! the review, the approver, and the signing time.

use rusqlite::{Transaction, params};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::WorkflowError;
use crate::models::ReviewOutcome;

/// Caller-supplied review metadata for a gate submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewMeta {
    pub review_title: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub reviewer_ids: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

/// SHA-256 content hash binding a review to its approver and signing time.
pub fn signature_hash(review_id: i64, approver: &str, signed_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", review_id, approver, signed_at));
    format!("{:x}", hasher.finalize())
}

/// Insert a pending review for a phase instance inside the caller's
/// transaction and return its id.
pub(crate) fn insert_review(
    tx: &Transaction<'_>,
    phase_instance_id: i64,
    meta: &ReviewMeta,
) -> Result<i64, WorkflowError> {
    if meta.review_title.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "review_title must not be empty".to_string(),
        ));
    }
    let reviewer_ids = serde_json::to_string(&meta.reviewer_ids)
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?;
    let action_items = serde_json::to_string(&meta.action_items)
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?;
    tx.execute(
        "INSERT INTO phase_reviews (phase_instance_id, review_title, scope, reviewer_ids, action_items)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            phase_instance_id,
            meta.review_title,
            meta.scope,
            reviewer_ids,
            action_items,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Finalize a pending review with its outcome, comments, and signature.
///
/// The UPDATE is guarded on `outcome = 'pending'`, so a review can never be
/// completed twice: a zero row count means another completion won the race
/// and maps to `AlreadyCompleted`.
pub(crate) fn finalize_review(
    tx: &Transaction<'_>,
    review_id: i64,
    outcome: ReviewOutcome,
    comments: Option<&str>,
    approver: &str,
    signed_at: &str,
) -> Result<String, WorkflowError> {
    let hash = signature_hash(review_id, approver, signed_at);
    let updated = tx.execute(
        "UPDATE phase_reviews
         SET outcome = ?1, comments = ?2, signature_hash = ?3, signed_at = ?4
         WHERE id = ?5 AND outcome = 'pending'",
        params![outcome.as_str(), comments, hash, signed_at, review_id],
    )?;
    if updated == 0 {
        return Err(WorkflowError::AlreadyCompleted {
            review_id,
            outcome: "non-pending".to_string(),
        });
    }
    Ok(hash)
}
