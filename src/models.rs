use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a per-project phase instance.
///
/// Illegal states are unrepresentable: the database stores the snake_case
/// string form and every read goes back through `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Active,
    UnderReview,
    Approved,
    Locked,
    /// Reopened after a rejected gate review. Treated as `Active` for
    /// subsequent submission, kept distinct so the rework history is
    /// visible in the stored state.
    RejectedActive,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Locked => "locked",
            Self::RejectedActive => "rejected_active",
        }
    }

    /// The phase is open for work and may be submitted for gate review.
    pub fn is_submittable(&self) -> bool {
        matches!(self, Self::Active | Self::RejectedActive)
    }

    /// The phase counts as open for the single-active-phase invariant.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::UnderReview | Self::RejectedActive)
    }

    /// A successor phase may start once its predecessor reaches this status.
    pub fn satisfies_predecessor(&self) -> bool {
        matches!(self, Self::Approved | Self::Locked)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "active" => Ok(Self::Active),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "locked" => Ok(Self::Locked),
            "rejected_active" => Ok(Self::RejectedActive),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

/// Outcome of a phase gate review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Pending,
    Approved,
    ApprovedWithConditions,
    Rejected,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ApprovedWithConditions => "approved_with_conditions",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedWithConditions)
    }
}

impl std::fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "approved_with_conditions" => Ok(Self::ApprovedWithConditions),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid review outcome: {}", s)),
        }
    }
}

/// Action recorded in the audit trail, one entry per state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PhasesInitialized,
    ReviewSubmitted,
    ReviewRejected,
    ReviewApproved,
    PhaseLocked,
    PhaseActivated,
    EmergencyOverride,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhasesInitialized => "phases_initialized",
            Self::ReviewSubmitted => "review_submitted",
            Self::ReviewRejected => "review_rejected",
            Self::ReviewApproved => "review_approved",
            Self::PhaseLocked => "phase_locked",
            Self::PhaseActivated => "phase_activated",
            Self::EmergencyOverride => "emergency_override",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phases_initialized" => Ok(Self::PhasesInitialized),
            "review_submitted" => Ok(Self::ReviewSubmitted),
            "review_rejected" => Ok(Self::ReviewRejected),
            "review_approved" => Ok(Self::ReviewApproved),
            "phase_locked" => Ok(Self::PhaseLocked),
            "phase_activated" => Ok(Self::PhaseActivated),
            "emergency_override" => Ok(Self::EmergencyOverride),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// Why a transition happened, for compliance reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    GateDecision,
    ManualAdvance,
    Rework,
    EmergencyOverride,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GateDecision => "gate_decision",
            Self::ManualAdvance => "manual_advance",
            Self::Rework => "rework",
            Self::EmergencyOverride => "emergency_override",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gate_decision" => Ok(Self::GateDecision),
            "manual_advance" => Ok(Self::ManualAdvance),
            "rework" => Ok(Self::Rework),
            "emergency_override" => Ok(Self::EmergencyOverride),
            _ => Err(format!("Invalid reason code: {}", s)),
        }
    }
}

/// Role of the acting principal, supplied by the external identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Contributor,
    Reviewer,
    QualityLead,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Reviewer => "reviewer",
            Self::QualityLead => "quality_lead",
        }
    }

    /// May finalize gate reviews.
    pub fn can_decide_gate(&self) -> bool {
        matches!(self, Self::Reviewer | Self::QualityLead)
    }

    /// May bypass sequence and review guards (audited, never silent).
    pub fn can_override(&self) -> bool {
        matches!(self, Self::QualityLead)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contributor" => Ok(Self::Contributor),
            "reviewer" => Ok(Self::Reviewer),
            "quality_lead" => Ok(Self::QualityLead),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// The acting principal. Required on every state-mutating call; there is no
/// fallback identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

/// Immutable phase template. The catalog of these seeds every project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub id: i64,
    pub name: String,
    /// 1-based, dense, unique within the template set.
    pub sort_order: i64,
    pub entry_criteria: String,
    pub exit_criteria: String,
    pub deliverables: Vec<String>,
}

/// Per-project occurrence of a phase. Mutated exclusively by the transition
/// controller, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseInstance {
    pub id: i64,
    pub project_id: i64,
    pub phase_definition_id: i64,
    pub status: PhaseStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub review_id: Option<i64>,
}

/// A phase instance joined with its definition and the derived gating
/// fields callers need to render the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseInstanceView {
    #[serde(flatten)]
    pub instance: PhaseInstance,
    pub phase_name: String,
    pub sort_order: i64,
    /// Predecessor is approved or locked (always true for the first phase).
    pub can_start: bool,
    /// Not started and the predecessor has not cleared its gate.
    pub is_blocked: bool,
}

/// A formal gate review attached to a phase instance. Immutable once the
/// outcome is finalized; corrections are appended as new reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReview {
    pub id: i64,
    pub phase_instance_id: i64,
    pub review_title: String,
    pub scope: String,
    pub reviewer_ids: Vec<String>,
    pub outcome: ReviewOutcome,
    pub comments: Option<String>,
    pub action_items: Vec<String>,
    pub signature_hash: Option<String>,
    pub signed_at: Option<String>,
    pub created_at: String,
}

/// One append-only ledger row per state transition, written in the same
/// transaction as the state change it records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub phase_instance_id: i64,
    pub action: AuditAction,
    pub from_status: Option<PhaseStatus>,
    pub to_status: Option<PhaseStatus>,
    pub performed_by: String,
    pub reason_code: Option<ReasonCode>,
    pub comments: Option<String>,
    pub created_at: String,
}

/// Result of applying a review outcome, a manual transition, or an
/// emergency override: which phase (if any) was locked, which (if any) was
/// newly activated, and which (if any) had its status forced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResult {
    pub review: Option<PhaseReview>,
    pub locked: Option<PhaseInstance>,
    pub activated: Option<PhaseInstance>,
    /// Set only by an emergency override: the instance whose status was
    /// forced, at whatever status the override targeted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overridden: Option<PhaseInstance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// A phase instance currently blocking downstream progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub instance: PhaseInstance,
    pub phase_name: String,
    pub sort_order: i64,
    pub kind: BottleneckKind,
    /// Name of the predecessor phase holding this one up, when queued.
    pub blocking_phase: Option<String>,
}

/// Whether the blocker is an open gate or work queued behind one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    ActiveGate,
    QueuedWork,
}

impl BottleneckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveGate => "active_gate",
            Self::QueuedWork => "queued_work",
        }
    }
}

impl std::fmt::Display for BottleneckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
