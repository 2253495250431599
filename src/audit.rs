//! Append-only audit trail recorder.
//!
//! `append` deliberately takes the caller's open transaction: there is no
//! standalone write path, so a state mutation and its audit entry commit or
//! roll back together. Entries are never updated or deleted.

use std::str::FromStr;

use rusqlite::{Transaction, params};

use crate::db::WorkflowDb;
use crate::errors::WorkflowError;
use crate::models::{AuditAction, AuditEntry, PhaseStatus, ReasonCode};

/// An audit entry about to be written. The id and timestamp are assigned by
/// the database.
pub struct NewAuditEntry<'a> {
    pub phase_instance_id: i64,
    pub action: AuditAction,
    pub from_status: Option<PhaseStatus>,
    pub to_status: Option<PhaseStatus>,
    pub performed_by: &'a str,
    pub reason_code: Option<ReasonCode>,
    pub comments: Option<&'a str>,
}

/// Insert one ledger row inside the caller's transaction.
pub(crate) fn append(tx: &Transaction<'_>, entry: &NewAuditEntry<'_>) -> Result<(), WorkflowError> {
    tx.execute(
        "INSERT INTO audit_entries
            (phase_instance_id, action, from_status, to_status, performed_by, reason_code, comments)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.phase_instance_id,
            entry.action.as_str(),
            entry.from_status.map(|s| s.as_str()),
            entry.to_status.map(|s| s.as_str()),
            entry.performed_by,
            entry.reason_code.map(|r| r.as_str()),
            entry.comments,
        ],
    )?;
    Ok(())
}

impl WorkflowDb {
    /// The full trail for a phase instance, ordered by timestamp (insertion
    /// order breaks ties within a second). Each call runs a fresh query, so
    /// the sequence is restartable.
    pub fn audit_trail(&self, phase_instance_id: i64) -> Result<Vec<AuditEntry>, WorkflowError> {
        // Unknown instance is a lookup failure, not an empty trail.
        self.require_instance(phase_instance_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, phase_instance_id, action, from_status, to_status,
                    performed_by, reason_code, comments, created_at
             FROM audit_entries
             WHERE phase_instance_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![phase_instance_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, instance_id, action, from, to, performed_by, reason, comments, created_at) =
                row?;
            entries.push(AuditEntry {
                id,
                phase_instance_id: instance_id,
                action: AuditAction::from_str(&action)
                    .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?,
                from_status: parse_opt_status(from)?,
                to_status: parse_opt_status(to)?,
                performed_by,
                reason_code: reason
                    .map(|r| ReasonCode::from_str(&r))
                    .transpose()
                    .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?,
                comments,
                created_at,
            });
        }
        Ok(entries)
    }
}

fn parse_opt_status(raw: Option<String>) -> Result<Option<PhaseStatus>, WorkflowError> {
    raw.map(|s| PhaseStatus::from_str(&s))
        .transpose()
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))
}
