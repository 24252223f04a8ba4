//! Approval routing: instantiation of a workflow against a document, signoff
//! intake, step advance, cancellation and the timeout sweep.
//!
//! Every decision path locks the `document_approvals` row before reading
//! signoff states, so concurrent submissions on one approval are applied
//! one after another.

use chrono::{Duration, NaiveDateTime};
use diesel::dsl::{count_star, exists};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::access::{ensure_read, ensure_unlocked_for, ensure_write, Viewer};
use super::audit::{self, AuditEvent, RESOURCE_APPROVAL, RESOURCE_SIGNOFF};
use super::documents::has_active_approval;
use super::notifications::{notify, Notice};
use super::organizations::resolve_approvers;
use super::resolution::{
    assigned_approver, resolve_step, timeout_action, SignoffLink, SignoffState, StepOutcome,
    StepPolicy, TimeoutAction, TimeoutCandidate,
};
use super::workflows::{default_workflow_for, load_steps, ApproverBinding, WorkflowSettings};
use super::{
    now, parse_stored, ApprovalStatus, Decision, DocumentStatus, DocumentType, EngineError,
    EngineResult, NotificationKind, Page, PageRequest, SignoffStatus,
};
use crate::models::{
    ApprovalDelegation, ApprovalSignoff, ApprovalStep, ApprovalWorkflow, Document,
    DocumentApproval, NewApprovalSignoff, NewApprovalStep, NewDocumentApproval,
};
use crate::schema::{
    approval_delegations, approval_signoffs, approval_steps, approval_workflows,
    document_approvals, documents,
};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StartApproval {
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignoffDecision {
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
    /// Opaque signature material supplied by the signing client.
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalDetail {
    #[serde(flatten)]
    pub approval: DocumentApproval,
    pub steps: Vec<ApprovalStep>,
    pub signoffs: Vec<ApprovalSignoff>,
    pub delegations: Vec<ApprovalDelegation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignoffOutcome {
    pub signoff: ApprovalSignoff,
    pub approval: DocumentApproval,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingSignoff {
    #[serde(flatten)]
    pub signoff: ApprovalSignoff,
    pub document_id: Uuid,
    pub document_title: String,
}

#[derive(Debug, Default, Clone)]
pub struct ApprovalFilter {
    pub organization_id: Uuid,
    pub document_id: Option<Uuid>,
    pub status: Option<ApprovalStatus>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSweepReport {
    pub escalated: usize,
    pub auto_approved: usize,
    pub overdue: usize,
    pub failed: usize,
}

/// Provenance of a newly opened signoff.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct SignoffOrigin {
    pub delegated_from: Option<Uuid>,
    pub escalated_from: Option<Uuid>,
}

pub fn signature_digest(
    approval_id: Uuid,
    signoff_id: Uuid,
    decision: Decision,
    client_signature: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(approval_id.as_bytes());
    hasher.update(signoff_id.as_bytes());
    hasher.update(decision.as_str().as_bytes());
    hasher.update(client_signature.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

fn due_date(timeout_hours: Option<i32>, at: NaiveDateTime) -> Option<NaiveDateTime> {
    timeout_hours.map(|hours| at + Duration::hours(i64::from(hours)))
}

fn snapshot_step(
    approval_id: Uuid,
    step: &crate::models::WorkflowStep,
    settings: &WorkflowSettings,
) -> EngineResult<NewApprovalStep> {
    let binding = ApproverBinding::from_columns(
        step.approver_user_id,
        step.approver_team_id,
        step.approver_role.as_deref(),
    )?;
    let requires_all =
        step.requires_all || (settings.require_all_approvers && binding.is_group());
    Ok(NewApprovalStep {
        id: Uuid::new_v4(),
        approval_id,
        workflow_step_id: step.id,
        step_order: step.step_order,
        name: step.name.clone(),
        approver_user_id: step.approver_user_id,
        approver_team_id: step.approver_team_id,
        approver_role: step.approver_role.clone(),
        requires_all,
        sequential: requires_all && !settings.allow_parallel_approval,
        can_delegate: step.can_delegate,
        timeout_hours: step.timeout_hours.or(settings.escalate_after_hours),
        escalate_to_user_id: step.escalate_to_user_id,
        auto_approve_after_hours: settings.auto_approve_after_hours,
    })
}

fn approval_organization(conn: &mut PgConnection, document_id: Uuid) -> EngineResult<Uuid> {
    let organization_id: Option<Uuid> = documents::table
        .find(document_id)
        .select(documents::organization_id)
        .first(conn)?;
    organization_id
        .ok_or_else(|| EngineError::invalid_state("routed document has no organization"))
}

pub(super) fn load_step(
    conn: &mut PgConnection,
    approval_id: Uuid,
    step_order: i32,
) -> EngineResult<ApprovalStep> {
    Ok(approval_steps::table
        .filter(approval_steps::approval_id.eq(approval_id))
        .filter(approval_steps::step_order.eq(step_order))
        .first(conn)?)
}

/// Reads the signoff's approval id, locks the approval row, then rereads the
/// signoff under that lock.
pub(super) fn lock_signoff(
    conn: &mut PgConnection,
    signoff_id: Uuid,
) -> EngineResult<(DocumentApproval, ApprovalSignoff)> {
    let approval_id: Uuid = approval_signoffs::table
        .find(signoff_id)
        .select(approval_signoffs::approval_id)
        .first(conn)?;
    let approval: DocumentApproval = document_approvals::table
        .find(approval_id)
        .for_update()
        .first(conn)?;
    let signoff: ApprovalSignoff = approval_signoffs::table.find(signoff_id).first(conn)?;
    Ok((approval, signoff))
}

pub(super) fn open_signoff(
    conn: &mut PgConnection,
    approval: &DocumentApproval,
    step: &ApprovalStep,
    approver_id: Uuid,
    due: Option<NaiveDateTime>,
    origin: SignoffOrigin,
) -> EngineResult<ApprovalSignoff> {
    let row = NewApprovalSignoff {
        id: Uuid::new_v4(),
        approval_id: approval.id,
        workflow_step_id: step.workflow_step_id,
        step_order: step.step_order,
        approver_id,
        delegated_from: origin.delegated_from,
        escalated_from: origin.escalated_from,
        status: SignoffStatus::Pending.as_str().to_string(),
        due_date: due,
    };
    let signoff: ApprovalSignoff = diesel::insert_into(approval_signoffs::table)
        .values(&row)
        .get_result(conn)?;

    notify(
        conn,
        Notice {
            user_id: approver_id,
            kind: NotificationKind::ApprovalRequested,
            title: "Approval requested".to_string(),
            message: format!(
                "Your signoff is requested for step {} ({})",
                step.step_order, step.name
            ),
            document_id: Some(approval.document_id),
            approval_id: Some(approval.id),
        },
    )?;
    Ok(signoff)
}

/// Resolves the step's approvers now (not at template time) and opens the
/// first round of signoffs.
fn instantiate_step(
    conn: &mut PgConnection,
    approval: &DocumentApproval,
    step: &ApprovalStep,
    organization_id: Uuid,
    at: NaiveDateTime,
) -> EngineResult<Vec<ApprovalSignoff>> {
    let binding = ApproverBinding::from_columns(
        step.approver_user_id,
        step.approver_team_id,
        step.approver_role.as_deref(),
    )?;
    let approvers = resolve_approvers(conn, organization_id, &binding)?;
    if approvers.is_empty() {
        return Err(EngineError::invalid_workflow(format!(
            "step {} has no resolvable approvers",
            step.step_order
        )));
    }

    diesel::update(approval_steps::table.find(step.id))
        .set(approval_steps::approver_ids.eq(approvers.clone()))
        .execute(conn)?;

    let policy = StepPolicy {
        approver_ids: &approvers,
        requires_all: step.requires_all,
        sequential: step.sequential,
    };
    policy
        .initial_approvers()
        .into_iter()
        .map(|approver_id| {
            open_signoff(
                conn,
                approval,
                step,
                approver_id,
                due_date(step.timeout_hours, at),
                SignoffOrigin::default(),
            )
        })
        .collect()
}

fn resolve_workflow(
    conn: &mut PgConnection,
    document: &Document,
    organization_id: Uuid,
    workflow_id: Option<Uuid>,
) -> EngineResult<ApprovalWorkflow> {
    let workflow = match workflow_id {
        Some(workflow_id) => {
            let workflow: ApprovalWorkflow =
                approval_workflows::table.find(workflow_id).first(conn)?;
            if workflow.organization_id != organization_id {
                return Err(EngineError::NotFound);
            }
            workflow
        }
        None => {
            let document_type: DocumentType = parse_stored(&document.document_type)?;
            default_workflow_for(conn, organization_id, document_type)?.ok_or_else(|| {
                EngineError::invalid_state(format!(
                    "no default workflow for {document_type} documents"
                ))
            })?
        }
    };
    if !workflow.is_active {
        return Err(EngineError::invalid_state("workflow is not active"));
    }
    Ok(workflow)
}

pub fn start_approval(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    request: &StartApproval,
) -> EngineResult<ApprovalDetail> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_write(viewer, &document)?;
        ensure_unlocked_for(viewer, &document)?;
        let Some(organization_id) = document.organization_id else {
            return Err(EngineError::invalid_state(
                "only organization documents can be routed",
            ));
        };
        if !document.is_latest_version || document.is_archived {
            return Err(EngineError::invalid_state(
                "only the latest, unarchived version can be routed",
            ));
        }
        if document.status == DocumentStatus::Deleted.as_str() {
            return Err(EngineError::NotFound);
        }
        if has_active_approval(conn, document_id)? {
            return Err(EngineError::invalid_state(
                "document already has an active approval",
            ));
        }

        let workflow = resolve_workflow(conn, &document, organization_id, request.workflow_id)?;
        let settings = WorkflowSettings::from_value(&workflow.settings)?;
        let template = load_steps(conn, workflow.id)?;
        if template.is_empty() {
            return Err(EngineError::invalid_workflow("workflow has no steps"));
        }

        let at = now();
        let row = NewDocumentApproval {
            id: Uuid::new_v4(),
            document_id,
            workflow_id: workflow.id,
            current_step: 1,
            total_steps: template.len() as i32,
            status: ApprovalStatus::Pending.as_str().to_string(),
            initiated_by: viewer.user_id,
            notes: request.notes.clone(),
            previous_document_status: document.status.clone(),
        };
        let approval: DocumentApproval = diesel::insert_into(document_approvals::table)
            .values(&row)
            .get_result(conn)?;

        let snapshots = template
            .iter()
            .map(|step| snapshot_step(approval.id, step, &settings))
            .collect::<EngineResult<Vec<_>>>()?;
        let steps: Vec<ApprovalStep> = diesel::insert_into(approval_steps::table)
            .values(&snapshots)
            .get_results(conn)?;
        let first = steps
            .iter()
            .find(|step| step.step_order == 1)
            .ok_or_else(|| EngineError::invalid_workflow("workflow has no first step"))?;
        instantiate_step(conn, &approval, first, organization_id, at)?;

        diesel::update(document_approvals::table.find(approval.id))
            .set(document_approvals::status.eq(ApprovalStatus::InProgress.as_str()))
            .execute(conn)?;
        diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(DocumentStatus::PendingApproval.as_str()),
                documents::updated_at.eq(at),
            ))
            .execute(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "approval.started",
                resource_type: RESOURCE_APPROVAL,
                resource_id: Some(approval.id),
                details: json!({
                    "document_id": document_id,
                    "workflow_id": workflow.id,
                    "total_steps": approval.total_steps,
                }),
            },
        );
        info!(
            approval_id = %approval.id,
            document_id = %document_id,
            workflow_id = %workflow.id,
            "approval routing started"
        );
        load_detail(conn, approval.id)
    })
}

pub fn submit_signoff(
    conn: &mut PgConnection,
    viewer: &Viewer,
    signoff_id: Uuid,
    input: &SignoffDecision,
) -> EngineResult<SignoffOutcome> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let (approval, signoff) = lock_signoff(conn, signoff_id)?;
        if signoff.approver_id != viewer.user_id {
            return Err(EngineError::NotApprover);
        }
        if signoff.status != SignoffStatus::Pending.as_str()
            || signoff.step_order != approval.current_step
        {
            return Err(EngineError::AlreadyResolved);
        }
        let approval_status: ApprovalStatus = parse_stored(&approval.status)?;
        if !matches!(
            approval_status,
            ApprovalStatus::InProgress | ApprovalStatus::Escalated
        ) {
            return Err(EngineError::invalid_state(format!(
                "approval is {approval_status}"
            )));
        }
        let status = match input.decision {
            Decision::Approve => SignoffStatus::Approved,
            Decision::Reject | Decision::RequestChanges => SignoffStatus::Rejected,
            Decision::Delegate => {
                return Err(EngineError::validation(
                    "delegation goes through the delegate operation",
                ));
            }
        };

        let at = now();
        let signature = json!({
            "signer_id": viewer.user_id,
            "signed_at": at,
            "digest": signature_digest(
                approval.id,
                signoff.id,
                input.decision,
                input.signature.as_deref(),
            ),
        });
        let signoff: ApprovalSignoff = diesel::update(approval_signoffs::table.find(signoff_id))
            .set((
                approval_signoffs::status.eq(status.as_str()),
                approval_signoffs::decision.eq(Some(input.decision.as_str())),
                approval_signoffs::comments.eq(input.comments.clone()),
                approval_signoffs::signature.eq(Some(signature)),
                approval_signoffs::signed_at.eq(Some(at)),
            ))
            .get_result(conn)?;

        diesel::update(
            approval_delegations::table
                .filter(approval_delegations::new_signoff_id.eq(signoff_id))
                .filter(approval_delegations::accepted_at.is_null()),
        )
        .set(approval_delegations::accepted_at.eq(Some(at)))
        .execute(conn)?;

        let organization_id = approval_organization(conn, approval.document_id)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "signoff.submitted",
                resource_type: RESOURCE_SIGNOFF,
                resource_id: Some(signoff_id),
                details: json!({
                    "approval_id": approval.id,
                    "step_order": signoff.step_order,
                    "decision": input.decision,
                }),
            },
        );
        info!(
            signoff_id = %signoff_id,
            approval_id = %approval.id,
            decision = %input.decision,
            "signoff recorded"
        );

        let step = load_step(conn, approval.id, signoff.step_order)?;
        let approval = settle_step(
            conn,
            &approval,
            &step,
            organization_id,
            input.decision,
            viewer.user_id,
            at,
        )?;
        Ok(SignoffOutcome { signoff, approval })
    })
}

/// Evaluates the step after a signoff changed state and applies the result.
fn settle_step(
    conn: &mut PgConnection,
    approval: &DocumentApproval,
    step: &ApprovalStep,
    organization_id: Uuid,
    decision: Decision,
    actor: Uuid,
    at: NaiveDateTime,
) -> EngineResult<DocumentApproval> {
    let signoffs: Vec<ApprovalSignoff> = approval_signoffs::table
        .filter(approval_signoffs::approval_id.eq(approval.id))
        .filter(approval_signoffs::step_order.eq(step.step_order))
        .order(approval_signoffs::created_at.asc())
        .load(conn)?;
    let links: Vec<SignoffLink> = signoffs
        .iter()
        .map(|signoff| SignoffLink {
            id: signoff.id,
            approver_id: signoff.approver_id,
            replaces: signoff.delegated_from.or(signoff.escalated_from),
        })
        .collect();
    let states = signoffs
        .iter()
        .map(|signoff| {
            Ok(SignoffState {
                id: signoff.id,
                approver_id: signoff.approver_id,
                assigned_to: assigned_approver(&links, signoff.id)
                    .unwrap_or(signoff.approver_id),
                status: parse_stored(&signoff.status)?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let policy = StepPolicy {
        approver_ids: &step.approver_ids,
        requires_all: step.requires_all,
        sequential: step.sequential,
    };
    let resolution = resolve_step(&policy, &states);

    if !resolution.skip.is_empty() {
        diesel::update(
            approval_signoffs::table.filter(approval_signoffs::id.eq_any(resolution.skip.clone())),
        )
        .set(approval_signoffs::status.eq(SignoffStatus::Skipped.as_str()))
        .execute(conn)?;
    }

    match resolution.outcome {
        StepOutcome::Rejected => reject_approval(conn, approval, organization_id, decision, at),
        StepOutcome::Approved => {
            advance_approval(conn, approval, step, organization_id, actor, at)
        }
        StepOutcome::Pending => {
            if let Some(next) = resolution.next_approver {
                open_signoff(
                    conn,
                    approval,
                    step,
                    next,
                    due_date(step.timeout_hours, at),
                    SignoffOrigin::default(),
                )?;
            }
            Ok(document_approvals::table.find(approval.id).first(conn)?)
        }
    }
}

fn reject_approval(
    conn: &mut PgConnection,
    approval: &DocumentApproval,
    organization_id: Uuid,
    decision: Decision,
    at: NaiveDateTime,
) -> EngineResult<DocumentApproval> {
    let document_status = if decision == Decision::RequestChanges {
        DocumentStatus::Draft
    } else {
        DocumentStatus::Rejected
    };

    let rejected: DocumentApproval = diesel::update(document_approvals::table.find(approval.id))
        .set((
            document_approvals::status.eq(ApprovalStatus::Rejected.as_str()),
            document_approvals::completed_at.eq(Some(at)),
        ))
        .get_result(conn)?;
    diesel::update(documents::table.find(approval.document_id))
        .set((
            documents::status.eq(document_status.as_str()),
            documents::updated_at.eq(at),
        ))
        .execute(conn)?;

    notify(
        conn,
        Notice {
            user_id: approval.initiated_by,
            kind: NotificationKind::ApprovalRejected,
            title: "Approval rejected".to_string(),
            message: if decision == Decision::RequestChanges {
                format!("Changes were requested at step {}", approval.current_step)
            } else {
                format!("The document was rejected at step {}", approval.current_step)
            },
            document_id: Some(approval.document_id),
            approval_id: Some(approval.id),
        },
    )?;
    audit::record_event(
        conn,
        AuditEvent {
            organization_id: Some(organization_id),
            actor: None,
            action: "approval.rejected",
            resource_type: RESOURCE_APPROVAL,
            resource_id: Some(approval.id),
            details: json!({
                "step_order": approval.current_step,
                "decision": decision,
                "document_status": document_status,
            }),
        },
    );
    info!(approval_id = %approval.id, step = approval.current_step, "approval rejected");
    Ok(rejected)
}

fn advance_approval(
    conn: &mut PgConnection,
    approval: &DocumentApproval,
    step: &ApprovalStep,
    organization_id: Uuid,
    actor: Uuid,
    at: NaiveDateTime,
) -> EngineResult<DocumentApproval> {
    if step.step_order >= approval.total_steps {
        let approved: DocumentApproval =
            diesel::update(document_approvals::table.find(approval.id))
                .set((
                    document_approvals::status.eq(ApprovalStatus::Approved.as_str()),
                    document_approvals::completed_at.eq(Some(at)),
                ))
                .get_result(conn)?;
        diesel::update(documents::table.find(approval.document_id))
            .set((
                documents::status.eq(DocumentStatus::Approved.as_str()),
                documents::approved_at.eq(Some(at)),
                documents::approved_by.eq(Some(actor)),
                documents::updated_at.eq(at),
            ))
            .execute(conn)?;

        notify(
            conn,
            Notice {
                user_id: approval.initiated_by,
                kind: NotificationKind::ApprovalApproved,
                title: "Approval complete".to_string(),
                message: "All approval steps were signed off".to_string(),
                document_id: Some(approval.document_id),
                approval_id: Some(approval.id),
            },
        )?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(actor),
                action: "approval.approved",
                resource_type: RESOURCE_APPROVAL,
                resource_id: Some(approval.id),
                details: json!({ "document_id": approval.document_id }),
            },
        );
        info!(approval_id = %approval.id, document_id = %approval.document_id, "approval completed");
        return Ok(approved);
    }

    let next_order = step.step_order + 1;
    let advanced: DocumentApproval = diesel::update(document_approvals::table.find(approval.id))
        .set((
            document_approvals::current_step.eq(next_order),
            document_approvals::status.eq(ApprovalStatus::InProgress.as_str()),
        ))
        .get_result(conn)?;
    let next = load_step(conn, approval.id, next_order)?;
    instantiate_step(conn, &advanced, &next, organization_id, at)?;

    audit::record_event(
        conn,
        AuditEvent {
            organization_id: Some(organization_id),
            actor: Some(actor),
            action: "approval.step_advanced",
            resource_type: RESOURCE_APPROVAL,
            resource_id: Some(approval.id),
            details: json!({ "from_step": step.step_order, "to_step": next_order }),
        },
    );
    info!(approval_id = %approval.id, step = next_order, "approval advanced");
    Ok(advanced)
}

/// Cancels an approval still in `pending` or `in_progress`. The document's
/// status is left for the caller to reset.
pub fn cancel_approval(
    conn: &mut PgConnection,
    viewer: &Viewer,
    approval_id: Uuid,
) -> EngineResult<DocumentApproval> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let approval: DocumentApproval = document_approvals::table
            .find(approval_id)
            .for_update()
            .first(conn)?;
        let organization_id = approval_organization(conn, approval.document_id)?;
        if approval.initiated_by != viewer.user_id && !viewer.is_admin_of(organization_id) {
            return Err(EngineError::Forbidden);
        }
        let status: ApprovalStatus = parse_stored(&approval.status)?;
        if !matches!(status, ApprovalStatus::Pending | ApprovalStatus::InProgress) {
            return Err(EngineError::invalid_state(format!(
                "cannot cancel an approval that is {status}"
            )));
        }

        let cancelled: DocumentApproval =
            diesel::update(document_approvals::table.find(approval_id))
                .set((
                    document_approvals::status.eq(ApprovalStatus::Cancelled.as_str()),
                    document_approvals::completed_at.eq(Some(now())),
                ))
                .get_result(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "approval.cancelled",
                resource_type: RESOURCE_APPROVAL,
                resource_id: Some(approval_id),
                details: json!({
                    "step_order": approval.current_step,
                    "previous_document_status": approval.previous_document_status,
                }),
            },
        );
        info!(approval_id = %approval_id, user_id = %viewer.user_id, "approval cancelled");
        Ok(cancelled)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Escalated,
    AutoApproved,
    Overdue,
    Untouched,
}

/// One sweep over pending signoffs of active approvals. Each signoff is
/// handled in its own transaction; a failure is counted and logged.
pub fn check_timeouts(
    conn: &mut PgConnection,
    at: NaiveDateTime,
) -> EngineResult<TimeoutSweepReport> {
    let candidates: Vec<Uuid> = approval_signoffs::table
        .inner_join(document_approvals::table)
        .inner_join(
            approval_steps::table.on(approval_steps::approval_id
                .eq(approval_signoffs::approval_id)
                .and(approval_steps::step_order.eq(approval_signoffs::step_order))),
        )
        .filter(approval_signoffs::status.eq(SignoffStatus::Pending.as_str()))
        .filter(document_approvals::status.eq_any(ApprovalStatus::active_strs()))
        .filter(
            approval_signoffs::due_date
                .assume_not_null()
                .le(at)
                .or(approval_steps::auto_approve_after_hours.is_not_null()),
        )
        .order(approval_signoffs::created_at.asc())
        .select(approval_signoffs::id)
        .load(conn)?;

    let mut report = TimeoutSweepReport::default();
    for signoff_id in candidates {
        match conn.transaction::<_, EngineError, _>(|conn| handle_timeout(conn, signoff_id, at)) {
            Ok(SweepOutcome::Escalated) => report.escalated += 1,
            Ok(SweepOutcome::AutoApproved) => report.auto_approved += 1,
            Ok(SweepOutcome::Overdue) => report.overdue += 1,
            Ok(SweepOutcome::Untouched) => {}
            Err(err) => {
                warn!(signoff_id = %signoff_id, error = %err, "timeout handling failed");
                report.failed += 1;
            }
        }
    }

    if report != TimeoutSweepReport::default() {
        info!(
            escalated = report.escalated,
            auto_approved = report.auto_approved,
            overdue = report.overdue,
            failed = report.failed,
            "timeout sweep finished"
        );
    }
    Ok(report)
}

fn handle_timeout(
    conn: &mut PgConnection,
    signoff_id: Uuid,
    at: NaiveDateTime,
) -> EngineResult<SweepOutcome> {
    let (approval, signoff) = lock_signoff(conn, signoff_id)?;
    let approval_status: ApprovalStatus = parse_stored(&approval.status)?;
    if signoff.status != SignoffStatus::Pending.as_str()
        || !approval_status.is_active()
        || signoff.step_order != approval.current_step
    {
        return Ok(SweepOutcome::Untouched);
    }
    let step = load_step(conn, approval.id, signoff.step_order)?;
    let candidate = TimeoutCandidate {
        approver_id: signoff.approver_id,
        escalated_from: signoff.escalated_from,
        due_date: signoff.due_date,
        created_at: signoff.created_at,
        escalate_to: step.escalate_to_user_id,
        auto_approve_after_hours: step.auto_approve_after_hours,
    };

    match timeout_action(&candidate, at) {
        TimeoutAction::Escalate { to } => {
            // On an any-of step one escalated signoff serves every overdue
            // original; requires-all slots each keep their own.
            let already_escalated: bool = !step.requires_all
                && diesel::select(exists(
                    approval_signoffs::table
                        .filter(approval_signoffs::approval_id.eq(approval.id))
                        .filter(approval_signoffs::step_order.eq(signoff.step_order))
                        .filter(approval_signoffs::approver_id.eq(to))
                        .filter(approval_signoffs::status.eq(SignoffStatus::Pending.as_str()))
                        .filter(approval_signoffs::escalated_from.is_not_null()),
                ))
                .get_result::<bool>(conn)?;
            if already_escalated {
                return Ok(SweepOutcome::Overdue);
            }

            let organization_id = approval_organization(conn, approval.document_id)?;
            diesel::update(approval_signoffs::table.find(signoff_id))
                .set(approval_signoffs::status.eq(SignoffStatus::Skipped.as_str()))
                .execute(conn)?;
            let escalated = open_signoff(
                conn,
                &approval,
                &step,
                to,
                due_date(step.timeout_hours, at),
                SignoffOrigin {
                    delegated_from: None,
                    escalated_from: Some(signoff_id),
                },
            )?;
            diesel::update(document_approvals::table.find(approval.id))
                .set(document_approvals::status.eq(ApprovalStatus::Escalated.as_str()))
                .execute(conn)?;

            audit::record_event(
                conn,
                AuditEvent {
                    organization_id: Some(organization_id),
                    actor: None,
                    action: "approval.escalated",
                    resource_type: RESOURCE_APPROVAL,
                    resource_id: Some(approval.id),
                    details: json!({
                        "signoff_id": signoff_id,
                        "escalated_signoff_id": escalated.id,
                        "from_user_id": signoff.approver_id,
                        "to_user_id": to,
                    }),
                },
            );
            info!(approval_id = %approval.id, signoff_id = %signoff_id, to_user_id = %to, "signoff escalated");
            Ok(SweepOutcome::Escalated)
        }
        TimeoutAction::AutoApprove => {
            let organization_id = approval_organization(conn, approval.document_id)?;
            diesel::update(approval_signoffs::table.find(signoff_id))
                .set((
                    approval_signoffs::status.eq(SignoffStatus::Approved.as_str()),
                    approval_signoffs::decision.eq(Some(Decision::Approve.as_str())),
                    approval_signoffs::comments
                        .eq(Some("auto-approved after timeout".to_string())),
                    approval_signoffs::signed_at.eq(Some(at)),
                ))
                .execute(conn)?;
            audit::record_event(
                conn,
                AuditEvent {
                    organization_id: Some(organization_id),
                    actor: None,
                    action: "signoff.auto_approved",
                    resource_type: RESOURCE_SIGNOFF,
                    resource_id: Some(signoff_id),
                    details: json!({ "approval_id": approval.id }),
                },
            );
            settle_step(
                conn,
                &approval,
                &step,
                organization_id,
                Decision::Approve,
                signoff.approver_id,
                at,
            )?;
            info!(approval_id = %approval.id, signoff_id = %signoff_id, "signoff auto-approved");
            Ok(SweepOutcome::AutoApproved)
        }
        TimeoutAction::Overdue => Ok(SweepOutcome::Overdue),
        TimeoutAction::None => Ok(SweepOutcome::Untouched),
    }
}

fn load_detail(conn: &mut PgConnection, approval_id: Uuid) -> EngineResult<ApprovalDetail> {
    let approval: DocumentApproval = document_approvals::table.find(approval_id).first(conn)?;
    let steps: Vec<ApprovalStep> = approval_steps::table
        .filter(approval_steps::approval_id.eq(approval_id))
        .order(approval_steps::step_order.asc())
        .load(conn)?;
    let signoffs: Vec<ApprovalSignoff> = approval_signoffs::table
        .filter(approval_signoffs::approval_id.eq(approval_id))
        .order((
            approval_signoffs::step_order.asc(),
            approval_signoffs::created_at.asc(),
        ))
        .load(conn)?;
    let signoff_ids: Vec<Uuid> = signoffs.iter().map(|signoff| signoff.id).collect();
    let delegations: Vec<ApprovalDelegation> = approval_delegations::table
        .filter(approval_delegations::signoff_id.eq_any(signoff_ids))
        .order(approval_delegations::delegated_at.asc())
        .load(conn)?;
    Ok(ApprovalDetail {
        approval,
        steps,
        signoffs,
        delegations,
    })
}

/// Readable by anyone who can read the document, the initiator, and anyone
/// holding a signoff on the approval.
pub fn get_approval(
    conn: &mut PgConnection,
    viewer: &Viewer,
    approval_id: Uuid,
) -> EngineResult<ApprovalDetail> {
    let detail = load_detail(conn, approval_id)?;
    let participant = detail.approval.initiated_by == viewer.user_id
        || detail
            .signoffs
            .iter()
            .any(|signoff| signoff.approver_id == viewer.user_id);
    if !participant {
        let document: Document = documents::table
            .find(detail.approval.document_id)
            .first(conn)?;
        ensure_read(viewer, &document)?;
    }
    Ok(detail)
}

pub fn list_approvals(
    conn: &mut PgConnection,
    viewer: &Viewer,
    filter: &ApprovalFilter,
    page: PageRequest,
) -> EngineResult<Page<DocumentApproval>> {
    viewer.require_member(filter.organization_id)?;
    let query = || {
        let mut query = document_approvals::table
            .inner_join(documents::table)
            .filter(documents::organization_id.eq(filter.organization_id))
            .into_boxed();
        if let Some(document_id) = filter.document_id {
            query = query.filter(document_approvals::document_id.eq(document_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(document_approvals::status.eq(status.as_str()));
        }
        query
    };

    let total: i64 = query().select(count_star()).first(conn)?;
    let items: Vec<DocumentApproval> = query()
        .order(document_approvals::initiated_at.desc())
        .limit(page.limit)
        .offset(page.offset)
        .select(document_approvals::all_columns)
        .load(conn)?;
    Ok(Page::new(items, total, page))
}

pub fn pending_signoffs_for(
    conn: &mut PgConnection,
    viewer: &Viewer,
) -> EngineResult<Vec<PendingSignoff>> {
    let rows: Vec<(ApprovalSignoff, Uuid, String)> = approval_signoffs::table
        .inner_join(document_approvals::table.inner_join(documents::table))
        .filter(approval_signoffs::approver_id.eq(viewer.user_id))
        .filter(approval_signoffs::status.eq(SignoffStatus::Pending.as_str()))
        .filter(document_approvals::status.eq_any(ApprovalStatus::active_strs()))
        .order(approval_signoffs::due_date.asc())
        .select((
            approval_signoffs::all_columns,
            documents::id,
            documents::title,
        ))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(signoff, document_id, document_title)| PendingSignoff {
            signoff,
            document_id,
            document_title,
        })
        .collect())
}

/// Signature payload stored on a signoff, exposed for verification tooling.
pub fn signature_matches(signoff: &ApprovalSignoff, client_signature: Option<&str>) -> bool {
    let (Some(decision), Some(Value::Object(signature))) =
        (signoff.decision.as_deref(), signoff.signature.as_ref())
    else {
        return false;
    };
    let Ok(decision) = decision.parse::<Decision>() else {
        return false;
    };
    let expected = signature_digest(signoff.approval_id, signoff.id, decision, client_signature);
    signature.get("digest").and_then(Value::as_str) == Some(expected.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_decision_sensitive() {
        let approval = Uuid::new_v4();
        let signoff = Uuid::new_v4();
        let approve = signature_digest(approval, signoff, Decision::Approve, Some("sig"));
        assert_eq!(
            approve,
            signature_digest(approval, signoff, Decision::Approve, Some("sig"))
        );
        assert_eq!(approve.len(), 64);
        assert_ne!(
            approve,
            signature_digest(approval, signoff, Decision::Reject, Some("sig"))
        );
        assert_ne!(
            approve,
            signature_digest(approval, signoff, Decision::Approve, None)
        );
    }

    #[test]
    fn due_date_follows_timeout_hours() {
        let at = chrono::Utc::now().naive_utc();
        assert_eq!(due_date(None, at), None);
        assert_eq!(due_date(Some(24), at), Some(at + Duration::hours(24)));
    }

    fn template_step(binding: ApproverBinding, requires_all: bool) -> crate::models::WorkflowStep {
        let (approver_user_id, approver_team_id, approver_role) = binding.columns();
        crate::models::WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            step_order: 1,
            name: "Review".to_string(),
            description: None,
            approver_user_id,
            approver_team_id,
            approver_role,
            requires_all,
            can_delegate: true,
            timeout_hours: None,
            escalate_to_user_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn snapshot_applies_workflow_settings() {
        let settings = WorkflowSettings {
            require_all_approvers: true,
            allow_parallel_approval: false,
            auto_approve_after_hours: Some(72),
            escalate_after_hours: Some(24),
        };
        let team = template_step(
            ApproverBinding::Team {
                team_id: Uuid::new_v4(),
            },
            false,
        );
        let snapshot = snapshot_step(Uuid::new_v4(), &team, &settings).unwrap();
        assert!(snapshot.requires_all);
        assert!(snapshot.sequential);
        assert_eq!(snapshot.timeout_hours, Some(24));
        assert_eq!(snapshot.auto_approve_after_hours, Some(72));

        let user = template_step(
            ApproverBinding::User {
                user_id: Uuid::new_v4(),
            },
            false,
        );
        let snapshot = snapshot_step(Uuid::new_v4(), &user, &settings).unwrap();
        assert!(!snapshot.requires_all);
        assert!(!snapshot.sequential);
    }

    #[test]
    fn step_timeout_overrides_settings() {
        let mut step = template_step(
            ApproverBinding::User {
                user_id: Uuid::new_v4(),
            },
            false,
        );
        step.timeout_hours = Some(6);
        let snapshot = snapshot_step(Uuid::new_v4(), &step, &WorkflowSettings::default()).unwrap();
        assert_eq!(snapshot.timeout_hours, Some(6));
        assert!(!snapshot.sequential);
    }
}
