use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub original_content: String,
    pub converted_content: Option<String>,
    pub key_terms: Vec<String>,
    pub summary: Option<String>,
    pub document_type: String,
    pub specialty: Option<String>,
    pub category: Option<String>,
    pub priority: String,
    pub status: String,
    pub tags: Vec<String>,
    pub version_number: i32,
    pub is_latest_version: bool,
    pub parent_document_id: Option<Uuid>,
    pub root_document_id: Uuid,
    pub version_notes: Option<String>,
    pub is_archived: bool,
    pub archived_at: Option<NaiveDateTime>,
    pub archived_by: Option<Uuid>,
    pub archive_reason: Option<String>,
    pub can_recall: bool,
    pub auto_delete_at: Option<NaiveDateTime>,
    pub visibility: String,
    pub shared_with: Vec<Uuid>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub search_index: serde_json::Value,
    pub approved_at: Option<NaiveDateTime>,
    pub approved_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub original_content: String,
    pub converted_content: Option<String>,
    pub document_type: String,
    pub specialty: Option<String>,
    pub category: Option<String>,
    pub priority: String,
    pub status: String,
    pub tags: Vec<String>,
    pub version_number: i32,
    pub is_latest_version: bool,
    pub parent_document_id: Option<Uuid>,
    pub root_document_id: Uuid,
    pub version_notes: Option<String>,
    pub can_recall: bool,
    pub visibility: String,
    pub shared_with: Vec<Uuid>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<NaiveDateTime>,
    pub search_index: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = document_versions)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub document_row_id: Uuid,
    pub title: String,
    pub original_content: String,
    pub converted_content: Option<String>,
    pub version_notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub document_row_id: Uuid,
    pub title: String,
    pub original_content: String,
    pub converted_content: Option<String>,
    pub version_notes: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = organization_members)]
pub struct OrganizationMember {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organization_members)]
pub struct NewOrganizationMember {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = teams)]
pub struct Team {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub specialty: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = teams)]
pub struct NewTeam {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = team_members)]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub added_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = team_members)]
pub struct NewTeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = approval_workflows)]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub document_types: Vec<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub settings: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_workflows)]
pub struct NewApprovalWorkflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub document_types: Vec<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub settings: serde_json::Value,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = workflow_steps)]
#[diesel(belongs_to(ApprovalWorkflow, foreign_key = workflow_id))]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub description: Option<String>,
    pub approver_user_id: Option<Uuid>,
    pub approver_team_id: Option<Uuid>,
    pub approver_role: Option<String>,
    pub requires_all: bool,
    pub can_delegate: bool,
    pub timeout_hours: Option<i32>,
    pub escalate_to_user_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workflow_steps)]
pub struct NewWorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub description: Option<String>,
    pub approver_user_id: Option<Uuid>,
    pub approver_team_id: Option<Uuid>,
    pub approver_role: Option<String>,
    pub requires_all: bool,
    pub can_delegate: bool,
    pub timeout_hours: Option<i32>,
    pub escalate_to_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = document_approvals)]
pub struct DocumentApproval {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workflow_id: Uuid,
    pub current_step: i32,
    pub total_steps: i32,
    pub status: String,
    pub initiated_by: Uuid,
    pub initiated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub previous_document_status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_approvals)]
pub struct NewDocumentApproval {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workflow_id: Uuid,
    pub current_step: i32,
    pub total_steps: i32,
    pub status: String,
    pub initiated_by: Uuid,
    pub notes: Option<String>,
    pub previous_document_status: String,
}

/// Step definition copied from the workflow template when routing starts.
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = approval_steps)]
#[diesel(belongs_to(DocumentApproval, foreign_key = approval_id))]
pub struct ApprovalStep {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub workflow_step_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub approver_user_id: Option<Uuid>,
    pub approver_team_id: Option<Uuid>,
    pub approver_role: Option<String>,
    pub approver_ids: Vec<Uuid>,
    pub requires_all: bool,
    pub sequential: bool,
    pub can_delegate: bool,
    pub timeout_hours: Option<i32>,
    pub escalate_to_user_id: Option<Uuid>,
    pub auto_approve_after_hours: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_steps)]
pub struct NewApprovalStep {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub workflow_step_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub approver_user_id: Option<Uuid>,
    pub approver_team_id: Option<Uuid>,
    pub approver_role: Option<String>,
    pub requires_all: bool,
    pub sequential: bool,
    pub can_delegate: bool,
    pub timeout_hours: Option<i32>,
    pub escalate_to_user_id: Option<Uuid>,
    pub auto_approve_after_hours: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = approval_signoffs)]
#[diesel(belongs_to(DocumentApproval, foreign_key = approval_id))]
pub struct ApprovalSignoff {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub workflow_step_id: Uuid,
    pub step_order: i32,
    pub approver_id: Uuid,
    pub delegated_from: Option<Uuid>,
    pub escalated_from: Option<Uuid>,
    pub status: String,
    pub decision: Option<String>,
    pub comments: Option<String>,
    pub signature: Option<serde_json::Value>,
    pub signed_at: Option<NaiveDateTime>,
    pub due_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_signoffs)]
pub struct NewApprovalSignoff {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub workflow_step_id: Uuid,
    pub step_order: i32,
    pub approver_id: Uuid,
    pub delegated_from: Option<Uuid>,
    pub escalated_from: Option<Uuid>,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = approval_delegations)]
pub struct ApprovalDelegation {
    pub id: Uuid,
    pub signoff_id: Uuid,
    pub new_signoff_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub reason: Option<String>,
    pub delegated_at: NaiveDateTime,
    pub accepted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_delegations)]
pub struct NewApprovalDelegation {
    pub id: Uuid,
    pub signoff_id: Uuid,
    pub new_signoff_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_document_id: Option<Uuid>,
    pub related_approval_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_document_id: Option<Uuid>,
    pub related_approval_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
