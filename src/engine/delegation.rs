use std::collections::HashSet;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::access::Viewer;
use super::audit::{self, AuditEvent, RESOURCE_SIGNOFF};
use super::organizations::membership_role;
use super::routing::{load_step, lock_signoff, open_signoff, SignoffOrigin};
use super::{now, parse_stored, ApprovalStatus, EngineError, EngineResult, SignoffStatus};
use crate::models::{ApprovalDelegation, ApprovalSignoff, NewApprovalDelegation};
use crate::schema::{approval_delegations, approval_signoffs, documents};

#[derive(Debug, Clone, Deserialize)]
pub struct DelegationRequest {
    pub to_user_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegationOutcome {
    pub delegation: ApprovalDelegation,
    pub signoff: ApprovalSignoff,
}

/// `chain` holds every user who has held the signoff, current holder first.
pub fn check_delegation(chain: &[Uuid], from: Uuid, to: Uuid) -> EngineResult<()> {
    if to == from || chain.contains(&to) {
        return Err(EngineError::DelegationCycle);
    }
    Ok(())
}

/// Walks `delegated_from` links back to the originally assigned signoff.
fn delegation_chain(
    conn: &mut PgConnection,
    signoff: &ApprovalSignoff,
) -> EngineResult<Vec<Uuid>> {
    let mut chain = vec![signoff.approver_id];
    let mut seen = HashSet::from([signoff.id]);
    let mut cursor = signoff.delegated_from;

    while let Some(previous_id) = cursor {
        if !seen.insert(previous_id) {
            break;
        }
        let (approver_id, delegated_from): (Uuid, Option<Uuid>) = approval_signoffs::table
            .find(previous_id)
            .select((
                approval_signoffs::approver_id,
                approval_signoffs::delegated_from,
            ))
            .first(conn)?;
        chain.push(approver_id);
        cursor = delegated_from;
    }
    Ok(chain)
}

pub fn delegate(
    conn: &mut PgConnection,
    viewer: &Viewer,
    signoff_id: Uuid,
    request: &DelegationRequest,
) -> EngineResult<DelegationOutcome> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let (approval, signoff) = lock_signoff(conn, signoff_id)?;
        if signoff.approver_id != viewer.user_id {
            return Err(EngineError::NotApprover);
        }
        if signoff.status != SignoffStatus::Pending.as_str() {
            return Err(EngineError::AlreadyResolved);
        }
        let approval_status: ApprovalStatus = parse_stored(&approval.status)?;
        if !approval_status.is_active() {
            return Err(EngineError::invalid_state(format!(
                "approval is {approval_status}"
            )));
        }

        let step = load_step(conn, approval.id, signoff.step_order)?;
        if !step.can_delegate {
            return Err(EngineError::invalid_state(
                "this step does not allow delegation",
            ));
        }

        let chain = delegation_chain(conn, &signoff)?;
        check_delegation(&chain, viewer.user_id, request.to_user_id)?;

        let organization_id: Option<Uuid> = documents::table
            .find(approval.document_id)
            .select(documents::organization_id)
            .first(conn)?;
        let organization_id = organization_id
            .ok_or_else(|| EngineError::invalid_state("routed document has no organization"))?;
        if membership_role(conn, organization_id, request.to_user_id)?.is_none() {
            return Err(EngineError::validation(
                "delegate must belong to the organization",
            ));
        }

        diesel::update(approval_signoffs::table.find(signoff_id))
            .set((
                approval_signoffs::status.eq(SignoffStatus::Delegated.as_str()),
                approval_signoffs::decision.eq(Some("delegate")),
                approval_signoffs::signed_at.eq(Some(now())),
            ))
            .execute(conn)?;

        let replacement = open_signoff(
            conn,
            &approval,
            &step,
            request.to_user_id,
            signoff.due_date,
            SignoffOrigin {
                delegated_from: Some(signoff_id),
                escalated_from: None,
            },
        )?;

        let row = NewApprovalDelegation {
            id: Uuid::new_v4(),
            signoff_id,
            new_signoff_id: replacement.id,
            from_user_id: viewer.user_id,
            to_user_id: request.to_user_id,
            reason: request.reason.clone(),
        };
        let delegation: ApprovalDelegation = diesel::insert_into(approval_delegations::table)
            .values(&row)
            .get_result(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "signoff.delegated",
                resource_type: RESOURCE_SIGNOFF,
                resource_id: Some(signoff_id),
                details: json!({
                    "approval_id": approval.id,
                    "to_user_id": request.to_user_id,
                    "new_signoff_id": replacement.id,
                    "reason": request.reason,
                }),
            },
        );
        info!(
            signoff_id = %signoff_id,
            from_user_id = %viewer.user_id,
            to_user_id = %request.to_user_id,
            "signoff delegated"
        );
        Ok(DelegationOutcome {
            delegation,
            signoff: replacement,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegating_to_self_is_a_cycle() {
        let user = Uuid::new_v4();
        assert!(matches!(
            check_delegation(&[user], user, user),
            Err(EngineError::DelegationCycle)
        ));
    }

    #[test]
    fn delegating_back_up_the_chain_is_a_cycle() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // b now holds the signoff that a delegated
        let chain = [b, a];
        assert!(matches!(
            check_delegation(&chain, b, a),
            Err(EngineError::DelegationCycle)
        ));
    }

    #[test]
    fn delegating_to_a_new_user_is_allowed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(check_delegation(&[b, a], b, c).is_ok());
    }
}
