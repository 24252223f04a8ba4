//! Pure step-resolution rules shared by signoff submission, delegation and
//! the timeout sweep. Nothing here touches the database.

use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use super::SignoffStatus;

/// Approval policy of one snapshotted step.
#[derive(Debug, Clone)]
pub struct StepPolicy<'a> {
    pub approver_ids: &'a [Uuid],
    pub requires_all: bool,
    pub sequential: bool,
}

impl StepPolicy<'_> {
    /// Approvers who receive a signoff as soon as the step is reached.
    pub fn initial_approvers(&self) -> Vec<Uuid> {
        if self.requires_all && self.sequential {
            self.approver_ids.iter().take(1).copied().collect()
        } else {
            self.approver_ids.to_vec()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignoffState {
    pub id: Uuid,
    pub approver_id: Uuid,
    /// Approver whose slot this signoff fills. Differs from `approver_id`
    /// for delegated and escalated replacements.
    pub assigned_to: Uuid,
    pub status: SignoffStatus,
}

/// A stored signoff and the signoff it replaced, if any.
#[derive(Debug, Clone, Copy)]
pub struct SignoffLink {
    pub id: Uuid,
    pub approver_id: Uuid,
    pub replaces: Option<Uuid>,
}

/// Follows replacements back to the originally assigned signoff and returns
/// its approver. Chains are walked at most `links.len()` hops.
pub fn assigned_approver(links: &[SignoffLink], id: Uuid) -> Option<Uuid> {
    let mut current = links.iter().find(|link| link.id == id)?;
    for _ in 0..links.len() {
        let Some(previous) = current.replaces else {
            break;
        };
        match links.iter().find(|link| link.id == previous) {
            Some(link) => current = link,
            None => break,
        }
    }
    Some(current.approver_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResolution {
    pub outcome: StepOutcome,
    /// Pending signoffs that become `skipped` once the step resolves.
    pub skip: Vec<Uuid>,
    /// Next approver to receive a signoff on a sequential step.
    pub next_approver: Option<Uuid>,
}

impl StepResolution {
    fn pending(next_approver: Option<Uuid>) -> Self {
        Self {
            outcome: StepOutcome::Pending,
            skip: Vec::new(),
            next_approver,
        }
    }
}

/// Resolves a step from the signoffs currently recorded for it. Delegated
/// signoffs are superseded by their replacement and take no part. A bound
/// approver counts as served only by a signoff assigned to them.
pub fn resolve_step(policy: &StepPolicy<'_>, signoffs: &[SignoffState]) -> StepResolution {
    let live: Vec<&SignoffState> = signoffs
        .iter()
        .filter(|signoff| signoff.status != SignoffStatus::Delegated)
        .collect();
    let pending: Vec<Uuid> = live
        .iter()
        .filter(|signoff| signoff.status == SignoffStatus::Pending)
        .map(|signoff| signoff.id)
        .collect();

    if live
        .iter()
        .any(|signoff| signoff.status == SignoffStatus::Rejected)
    {
        return StepResolution {
            outcome: StepOutcome::Rejected,
            skip: pending,
            next_approver: None,
        };
    }

    if policy.requires_all {
        if !pending.is_empty() {
            return StepResolution::pending(None);
        }
        if policy.sequential {
            let next = policy
                .approver_ids
                .iter()
                .find(|approver| !signoffs.iter().any(|s| s.assigned_to == **approver))
                .copied();
            if next.is_some() {
                return StepResolution::pending(next);
            }
        }
        let any_approved = live
            .iter()
            .any(|signoff| signoff.status == SignoffStatus::Approved);
        return if any_approved {
            StepResolution {
                outcome: StepOutcome::Approved,
                skip: Vec::new(),
                next_approver: None,
            }
        } else {
            StepResolution::pending(None)
        };
    }

    if live
        .iter()
        .any(|signoff| signoff.status == SignoffStatus::Approved)
    {
        StepResolution {
            outcome: StepOutcome::Approved,
            skip: pending,
            next_approver: None,
        }
    } else {
        StepResolution::pending(None)
    }
}

/// Timeout-relevant view of a pending signoff and its step.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutCandidate {
    pub approver_id: Uuid,
    pub escalated_from: Option<Uuid>,
    pub due_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub escalate_to: Option<Uuid>,
    pub auto_approve_after_hours: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    Escalate { to: Uuid },
    AutoApprove,
    Overdue,
    None,
}

/// A signoff escalates at most once, and never to its own approver.
pub fn timeout_action(candidate: &TimeoutCandidate, now: NaiveDateTime) -> TimeoutAction {
    let overdue = candidate.due_date.map(|due| due <= now).unwrap_or(false);

    if overdue && candidate.escalated_from.is_none() {
        if let Some(target) = candidate.escalate_to {
            if target != candidate.approver_id {
                return TimeoutAction::Escalate { to: target };
            }
        }
    }

    if let Some(hours) = candidate.auto_approve_after_hours {
        if candidate.created_at + Duration::hours(i64::from(hours)) <= now {
            return TimeoutAction::AutoApprove;
        }
    }

    if overdue {
        TimeoutAction::Overdue
    } else {
        TimeoutAction::None
    }
}
