//! Bottleneck reporter: derives "what is blocking progress" from instance
//! and review state. Pure read, never mutates.

use crate::db::WorkflowDb;
use crate::errors::WorkflowError;
use crate::models::{Bottleneck, BottleneckKind, PhaseStatus};
use crate::store::build_views;

impl WorkflowDb {
    /// Blockers for a project: phases sitting at an open gate
    /// (`under_review`) and not-started phases queued behind an uncleared
    /// predecessor, each annotated with the name of the phase holding it up.
    pub fn bottlenecks(&self, project_id: i64) -> Result<Vec<Bottleneck>, WorkflowError> {
        let rows = self.list_instances(project_id)?;
        if rows.is_empty() {
            return Err(WorkflowError::ProjectNotFound { project_id });
        }
        let views = build_views(rows);

        let mut out = Vec::new();
        for (idx, view) in views.iter().enumerate() {
            match view.instance.status {
                PhaseStatus::UnderReview => out.push(Bottleneck {
                    instance: view.instance.clone(),
                    phase_name: view.phase_name.clone(),
                    sort_order: view.sort_order,
                    kind: BottleneckKind::ActiveGate,
                    blocking_phase: None,
                }),
                PhaseStatus::NotStarted if view.is_blocked => {
                    // The nearest preceding phase that has not cleared its
                    // gate is what this one is waiting on.
                    let blocking = views[..idx]
                        .iter()
                        .rev()
                        .find(|v| !v.instance.status.satisfies_predecessor())
                        .map(|v| v.phase_name.clone());
                    out.push(Bottleneck {
                        instance: view.instance.clone(),
                        phase_name: view.phase_name.clone(),
                        sort_order: view.sort_order,
                        kind: BottleneckKind::QueuedWork,
                        blocking_phase: blocking,
                    });
                }
                _ => {}
            }
        }
        Ok(out)
    }
}
