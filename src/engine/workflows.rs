use std::collections::BTreeSet;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::access::Viewer;
use super::audit::{self, AuditEvent, RESOURCE_WORKFLOW};
use super::organizations::{membership_role, resolve_approvers};
use super::{now, DocumentType, EngineError, EngineResult, OrganizationRole};
use crate::models::{ApprovalWorkflow, NewApprovalWorkflow, NewWorkflowStep, WorkflowStep};
use crate::schema::{approval_workflows, teams, workflow_steps};

/// Who may sign off a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApproverBinding {
    User { user_id: Uuid },
    Team { team_id: Uuid },
    Role { role: OrganizationRole },
}

impl ApproverBinding {
    pub fn from_columns(
        user_id: Option<Uuid>,
        team_id: Option<Uuid>,
        role: Option<&str>,
    ) -> EngineResult<Self> {
        match (user_id, team_id, role) {
            (Some(user_id), None, None) => Ok(ApproverBinding::User { user_id }),
            (None, Some(team_id), None) => Ok(ApproverBinding::Team { team_id }),
            (None, None, Some(role)) => Ok(ApproverBinding::Role {
                role: super::parse_stored(role)?,
            }),
            _ => Err(EngineError::invalid_state(
                "step must carry exactly one approver binding",
            )),
        }
    }

    pub fn columns(&self) -> (Option<Uuid>, Option<Uuid>, Option<String>) {
        match self {
            ApproverBinding::User { user_id } => (Some(*user_id), None, None),
            ApproverBinding::Team { team_id } => (None, Some(*team_id), None),
            ApproverBinding::Role { role } => (None, None, Some(role.as_str().to_string())),
        }
    }

    /// Team and role bindings may resolve to several approvers.
    pub fn is_group(&self) -> bool {
        !matches!(self, ApproverBinding::User { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkflowSettings {
    pub require_all_approvers: bool,
    pub allow_parallel_approval: bool,
    pub auto_approve_after_hours: Option<i32>,
    pub escalate_after_hours: Option<i32>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            require_all_approvers: false,
            allow_parallel_approval: true,
            auto_approve_after_hours: None,
            escalate_after_hours: Some(48),
        }
    }
}

impl WorkflowSettings {
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        let settings: WorkflowSettings = serde_json::from_value(value.clone())
            .map_err(|err| EngineError::invalid_workflow(format!("settings: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_value(&self) -> EngineResult<Value> {
        serde_json::to_value(self)
            .map_err(|err| EngineError::invalid_workflow(format!("settings: {err}")))
    }

    fn validate(&self) -> EngineResult<()> {
        for (name, hours) in [
            ("auto_approve_after_hours", self.auto_approve_after_hours),
            ("escalate_after_hours", self.escalate_after_hours),
        ] {
            if matches!(hours, Some(value) if value <= 0) {
                return Err(EngineError::invalid_workflow(format!(
                    "{name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    pub step_order: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub approver: ApproverBinding,
    #[serde(default)]
    pub requires_all: bool,
    #[serde(default = "default_can_delegate")]
    pub can_delegate: bool,
    #[serde(default)]
    pub timeout_hours: Option<i32>,
    #[serde(default)]
    pub escalate_to_user_id: Option<Uuid>,
}

fn default_can_delegate() -> bool {
    true
}

/// Checks shape only: contiguous 1..N ordering, names, positive timeouts.
pub fn validate_steps(steps: &[StepInput]) -> EngineResult<()> {
    if steps.is_empty() {
        return Err(EngineError::invalid_workflow(
            "workflow needs at least one step",
        ));
    }

    let mut orders: Vec<i32> = steps.iter().map(|step| step.step_order).collect();
    orders.sort_unstable();
    for (index, order) in orders.iter().enumerate() {
        let expected = index as i32 + 1;
        if *order != expected {
            return Err(EngineError::invalid_workflow(format!(
                "step orders must be contiguous from 1; expected {expected}, found {order}"
            )));
        }
    }

    for step in steps {
        if step.name.trim().is_empty() {
            return Err(EngineError::invalid_workflow(format!(
                "step {} needs a name",
                step.step_order
            )));
        }
        if matches!(step.timeout_hours, Some(hours) if hours <= 0) {
            return Err(EngineError::invalid_workflow(format!(
                "step {} timeout must be positive",
                step.step_order
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub document_types: Vec<DocumentType>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub settings: Option<Value>,
    pub steps: Vec<StepInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub document_types: Option<Vec<DocumentType>>,
    pub settings: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub workflow: ApprovalWorkflow,
    pub steps: Vec<WorkflowStep>,
}

fn validate_document_types(types: &[DocumentType]) -> EngineResult<Vec<String>> {
    if types.is_empty() {
        return Err(EngineError::invalid_workflow(
            "workflow must apply to at least one document type",
        ));
    }
    let unique: BTreeSet<&str> = types.iter().map(|ty| ty.as_str()).collect();
    Ok(unique.into_iter().map(str::to_string).collect())
}

fn ensure_bindings_resolvable(
    conn: &mut PgConnection,
    organization_id: Uuid,
    steps: &[StepInput],
) -> EngineResult<()> {
    for step in steps {
        if let ApproverBinding::Team { team_id } = &step.approver {
            let owned: bool = diesel::select(diesel::dsl::exists(
                teams::table
                    .filter(teams::id.eq(*team_id))
                    .filter(teams::organization_id.eq(organization_id)),
            ))
            .get_result(conn)?;
            if !owned {
                return Err(EngineError::invalid_workflow(format!(
                    "step {} references a team outside the organization",
                    step.step_order
                )));
            }
        }
        if resolve_approvers(conn, organization_id, &step.approver)?.is_empty() {
            return Err(EngineError::invalid_workflow(format!(
                "step {} has no resolvable approver",
                step.step_order
            )));
        }
        if let Some(target) = step.escalate_to_user_id {
            if membership_role(conn, organization_id, target)?.is_none() {
                return Err(EngineError::invalid_workflow(format!(
                    "step {} escalates to a user outside the organization",
                    step.step_order
                )));
            }
        }
    }
    Ok(())
}

fn insert_steps(
    conn: &mut PgConnection,
    workflow_id: Uuid,
    steps: &[StepInput],
) -> EngineResult<Vec<WorkflowStep>> {
    let rows: Vec<NewWorkflowStep> = steps
        .iter()
        .map(|step| {
            let (approver_user_id, approver_team_id, approver_role) = step.approver.columns();
            NewWorkflowStep {
                id: Uuid::new_v4(),
                workflow_id,
                step_order: step.step_order,
                name: step.name.trim().to_string(),
                description: step.description.clone(),
                approver_user_id,
                approver_team_id,
                approver_role,
                requires_all: step.requires_all,
                can_delegate: step.can_delegate,
                timeout_hours: step.timeout_hours,
                escalate_to_user_id: step.escalate_to_user_id,
            }
        })
        .collect();

    diesel::insert_into(workflow_steps::table)
        .values(&rows)
        .execute(conn)?;
    load_steps(conn, workflow_id)
}

pub fn load_steps(conn: &mut PgConnection, workflow_id: Uuid) -> EngineResult<Vec<WorkflowStep>> {
    Ok(workflow_steps::table
        .filter(workflow_steps::workflow_id.eq(workflow_id))
        .order(workflow_steps::step_order.asc())
        .load(conn)?)
}

pub fn create_workflow(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    input: WorkflowInput,
) -> EngineResult<WorkflowDetail> {
    viewer.require_admin(organization_id)?;

    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::invalid_workflow("workflow needs a name"));
    }
    let document_types = validate_document_types(&input.document_types)?;
    let settings = match &input.settings {
        Some(value) => WorkflowSettings::from_value(value)?,
        None => WorkflowSettings::default(),
    };
    validate_steps(&input.steps)?;

    conn.transaction::<_, EngineError, _>(|conn| {
        ensure_bindings_resolvable(conn, organization_id, &input.steps)?;

        let row = NewApprovalWorkflow {
            id: Uuid::new_v4(),
            organization_id,
            name,
            description: input.description.clone(),
            document_types,
            is_active: true,
            is_default: false,
            settings: settings.to_value()?,
            created_by: Some(viewer.user_id),
        };
        diesel::insert_into(approval_workflows::table)
            .values(&row)
            .execute(conn)?;
        let steps = insert_steps(conn, row.id, &input.steps)?;

        if input.is_default {
            make_default(conn, organization_id, row.id)?;
        }
        let workflow: ApprovalWorkflow = approval_workflows::table.find(row.id).first(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "workflow.created",
                resource_type: RESOURCE_WORKFLOW,
                resource_id: Some(workflow.id),
                details: json!({ "name": workflow.name, "steps": steps.len() }),
            },
        );
        info!(workflow_id = %workflow.id, organization_id = %organization_id, "workflow created");
        Ok(WorkflowDetail { workflow, steps })
    })
}

pub fn get_workflow(
    conn: &mut PgConnection,
    viewer: &Viewer,
    workflow_id: Uuid,
) -> EngineResult<WorkflowDetail> {
    let workflow: ApprovalWorkflow = approval_workflows::table.find(workflow_id).first(conn)?;
    if !viewer.is_member_of(workflow.organization_id) {
        return Err(EngineError::NotFound);
    }
    let steps = load_steps(conn, workflow_id)?;
    Ok(WorkflowDetail { workflow, steps })
}

pub fn list_workflows(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    document_type: Option<DocumentType>,
    include_inactive: bool,
) -> EngineResult<Vec<ApprovalWorkflow>> {
    viewer.require_member(organization_id)?;

    let mut query = approval_workflows::table
        .filter(approval_workflows::organization_id.eq(organization_id))
        .into_boxed();
    if let Some(ty) = document_type {
        query = query.filter(
            approval_workflows::document_types.contains(vec![ty.as_str().to_string()]),
        );
    }
    if !include_inactive {
        query = query.filter(approval_workflows::is_active.eq(true));
    }
    Ok(query
        .order((
            approval_workflows::is_default.desc(),
            approval_workflows::name.asc(),
        ))
        .load(conn)?)
}

pub fn update_workflow(
    conn: &mut PgConnection,
    viewer: &Viewer,
    workflow_id: Uuid,
    update: WorkflowUpdate,
) -> EngineResult<WorkflowDetail> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let workflow = lock_workflow(conn, workflow_id)?;
        viewer.require_admin(workflow.organization_id)?;

        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(EngineError::invalid_workflow("workflow needs a name")),
            Some(name) => name.to_string(),
            None => workflow.name.clone(),
        };
        let document_types = match &update.document_types {
            Some(types) => validate_document_types(types)?,
            None => workflow.document_types.clone(),
        };
        let settings = match &update.settings {
            Some(value) => WorkflowSettings::from_value(value)?.to_value()?,
            None => workflow.settings.clone(),
        };

        diesel::update(approval_workflows::table.find(workflow_id))
            .set((
                approval_workflows::name.eq(name),
                approval_workflows::description
                    .eq(update.description.clone().or(workflow.description.clone())),
                approval_workflows::document_types.eq(document_types),
                approval_workflows::settings.eq(settings),
                approval_workflows::updated_at.eq(now()),
            ))
            .execute(conn)?;

        if workflow.is_default && update.document_types.is_some() {
            make_default(conn, workflow.organization_id, workflow_id)?;
        }

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(workflow.organization_id),
                actor: Some(viewer.user_id),
                action: "workflow.updated",
                resource_type: RESOURCE_WORKFLOW,
                resource_id: Some(workflow_id),
                details: json!({}),
            },
        );
        let workflow: ApprovalWorkflow = approval_workflows::table.find(workflow_id).first(conn)?;
        let steps = load_steps(conn, workflow_id)?;
        Ok(WorkflowDetail { workflow, steps })
    })
}

/// Approvals already in flight keep the step snapshot they were started
/// with.
pub fn replace_steps(
    conn: &mut PgConnection,
    viewer: &Viewer,
    workflow_id: Uuid,
    steps: Vec<StepInput>,
) -> EngineResult<WorkflowDetail> {
    validate_steps(&steps)?;

    conn.transaction::<_, EngineError, _>(|conn| {
        let workflow = lock_workflow(conn, workflow_id)?;
        viewer.require_admin(workflow.organization_id)?;
        ensure_bindings_resolvable(conn, workflow.organization_id, &steps)?;

        diesel::delete(workflow_steps::table.filter(workflow_steps::workflow_id.eq(workflow_id)))
            .execute(conn)?;
        let steps = insert_steps(conn, workflow_id, &steps)?;
        diesel::update(approval_workflows::table.find(workflow_id))
            .set(approval_workflows::updated_at.eq(now()))
            .execute(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(workflow.organization_id),
                actor: Some(viewer.user_id),
                action: "workflow.steps_replaced",
                resource_type: RESOURCE_WORKFLOW,
                resource_id: Some(workflow_id),
                details: json!({ "steps": steps.len() }),
            },
        );
        let workflow: ApprovalWorkflow = approval_workflows::table.find(workflow_id).first(conn)?;
        Ok(WorkflowDetail { workflow, steps })
    })
}

/// Deactivation also drops the default flag.
pub fn set_active(
    conn: &mut PgConnection,
    viewer: &Viewer,
    workflow_id: Uuid,
    active: bool,
) -> EngineResult<ApprovalWorkflow> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let workflow = lock_workflow(conn, workflow_id)?;
        viewer.require_admin(workflow.organization_id)?;

        if active && load_steps(conn, workflow_id)?.is_empty() {
            return Err(EngineError::invalid_workflow(
                "workflow needs at least one step",
            ));
        }

        let is_default = workflow.is_default && active;
        let updated = diesel::update(approval_workflows::table.find(workflow_id))
            .set((
                approval_workflows::is_active.eq(active),
                approval_workflows::is_default.eq(is_default),
                approval_workflows::updated_at.eq(now()),
            ))
            .get_result::<ApprovalWorkflow>(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(workflow.organization_id),
                actor: Some(viewer.user_id),
                action: if active {
                    "workflow.activated"
                } else {
                    "workflow.deactivated"
                },
                resource_type: RESOURCE_WORKFLOW,
                resource_id: Some(workflow_id),
                details: json!({}),
            },
        );
        info!(workflow_id = %workflow_id, active, "workflow activation changed");
        Ok(updated)
    })
}

pub fn set_default(
    conn: &mut PgConnection,
    viewer: &Viewer,
    workflow_id: Uuid,
) -> EngineResult<ApprovalWorkflow> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let workflow: ApprovalWorkflow = approval_workflows::table.find(workflow_id).first(conn)?;
        viewer.require_admin(workflow.organization_id)?;
        if !workflow.is_active {
            return Err(EngineError::invalid_state(
                "only active workflows can be the default",
            ));
        }

        make_default(conn, workflow.organization_id, workflow_id)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(workflow.organization_id),
                actor: Some(viewer.user_id),
                action: "workflow.default_set",
                resource_type: RESOURCE_WORKFLOW,
                resource_id: Some(workflow_id),
                details: json!({ "document_types": workflow.document_types }),
            },
        );
        Ok(approval_workflows::table.find(workflow_id).first(conn)?)
    })
}

/// Serializes on the organization's workflow rows, then clears the default
/// flag on every other workflow sharing a document type.
fn make_default(
    conn: &mut PgConnection,
    organization_id: Uuid,
    workflow_id: Uuid,
) -> EngineResult<()> {
    let _locked: Vec<Uuid> = approval_workflows::table
        .filter(approval_workflows::organization_id.eq(organization_id))
        .order(approval_workflows::id.asc())
        .select(approval_workflows::id)
        .for_update()
        .load(conn)?;

    let types: Vec<String> = approval_workflows::table
        .find(workflow_id)
        .select(approval_workflows::document_types)
        .first(conn)?;

    diesel::update(
        approval_workflows::table
            .filter(approval_workflows::organization_id.eq(organization_id))
            .filter(approval_workflows::id.ne(workflow_id))
            .filter(approval_workflows::is_default.eq(true))
            .filter(approval_workflows::document_types.overlaps_with(types)),
    )
    .set((
        approval_workflows::is_default.eq(false),
        approval_workflows::updated_at.eq(now()),
    ))
    .execute(conn)?;

    diesel::update(approval_workflows::table.find(workflow_id))
        .set((
            approval_workflows::is_default.eq(true),
            approval_workflows::updated_at.eq(now()),
        ))
        .execute(conn)?;
    Ok(())
}

fn lock_workflow(conn: &mut PgConnection, workflow_id: Uuid) -> EngineResult<ApprovalWorkflow> {
    Ok(approval_workflows::table
        .find(workflow_id)
        .for_update()
        .first(conn)?)
}

pub fn default_workflow_for(
    conn: &mut PgConnection,
    organization_id: Uuid,
    document_type: DocumentType,
) -> EngineResult<Option<ApprovalWorkflow>> {
    Ok(approval_workflows::table
        .filter(approval_workflows::organization_id.eq(organization_id))
        .filter(approval_workflows::is_active.eq(true))
        .filter(approval_workflows::is_default.eq(true))
        .filter(approval_workflows::document_types.contains(vec![document_type.as_str().to_string()]))
        .first(conn)
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: i32) -> StepInput {
        StepInput {
            step_order: order,
            name: format!("Step {order}"),
            description: None,
            approver: ApproverBinding::User {
                user_id: Uuid::new_v4(),
            },
            requires_all: false,
            can_delegate: true,
            timeout_hours: None,
            escalate_to_user_id: None,
        }
    }

    #[test]
    fn accepts_contiguous_steps_in_any_input_order() {
        assert!(validate_steps(&[step(2), step(1), step(3)]).is_ok());
    }

    #[test]
    fn rejects_empty_gapped_and_duplicate_orders() {
        assert!(matches!(
            validate_steps(&[]),
            Err(EngineError::InvalidWorkflow(_))
        ));
        assert!(matches!(
            validate_steps(&[step(1), step(3)]),
            Err(EngineError::InvalidWorkflow(_))
        ));
        assert!(matches!(
            validate_steps(&[step(1), step(1)]),
            Err(EngineError::InvalidWorkflow(_))
        ));
        assert!(matches!(
            validate_steps(&[step(2)]),
            Err(EngineError::InvalidWorkflow(_))
        ));
    }

    #[test]
    fn rejects_blank_names_and_non_positive_timeouts() {
        let mut unnamed = step(1);
        unnamed.name = "  ".into();
        assert!(validate_steps(&[unnamed]).is_err());

        let mut zero_timeout = step(1);
        zero_timeout.timeout_hours = Some(0);
        assert!(validate_steps(&[zero_timeout]).is_err());
    }

    #[test]
    fn settings_default_when_empty() {
        let settings = WorkflowSettings::from_value(&json!({})).unwrap();
        assert_eq!(settings, WorkflowSettings::default());
        assert!(settings.allow_parallel_approval);
        assert_eq!(settings.escalate_after_hours, Some(48));
    }

    #[test]
    fn settings_reject_unknown_keys() {
        let err = WorkflowSettings::from_value(&json!({ "require_all": true })).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[test]
    fn settings_reject_non_positive_hours() {
        let err =
            WorkflowSettings::from_value(&json!({ "auto_approve_after_hours": 0 })).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[test]
    fn binding_round_trips_through_columns() {
        let binding = ApproverBinding::Role {
            role: OrganizationRole::Manager,
        };
        let (user, team, role) = binding.columns();
        let restored = ApproverBinding::from_columns(user, team, role.as_deref()).unwrap();
        assert_eq!(restored, binding);
        assert!(binding.is_group());
    }

    #[test]
    fn binding_deserializes_from_tagged_json() {
        let team_id = Uuid::new_v4();
        let binding: ApproverBinding =
            serde_json::from_value(json!({ "kind": "team", "team_id": team_id })).unwrap();
        assert_eq!(binding, ApproverBinding::Team { team_id });
    }

    #[test]
    fn document_types_are_deduplicated() {
        let types = validate_document_types(&[
            DocumentType::Lease,
            DocumentType::Nda,
            DocumentType::Lease,
        ])
        .unwrap();
        assert_eq!(types, vec!["lease".to_string(), "nda".to_string()]);
        assert!(validate_document_types(&[]).is_err());
    }
}
