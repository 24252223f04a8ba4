use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::access::Viewer;
use super::audit::{self, AuditEvent, RESOURCE_ORGANIZATION, RESOURCE_TEAM};
use super::workflows::ApproverBinding;
use super::{EngineError, EngineResult, OrganizationRole, TeamRole};
use crate::models::{
    NewOrganizationMember, NewTeam, NewTeamMember, OrganizationMember, Team, TeamMember,
};
use crate::schema::{organization_members, team_members, teams};

#[derive(Debug)]
pub struct TeamInput {
    pub name: String,
    pub description: Option<String>,
    pub specialty: Option<String>,
}

pub fn create_team(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    input: TeamInput,
) -> EngineResult<Team> {
    viewer.require_admin(organization_id)?;
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::validation("team name must not be empty"));
    }

    let row = NewTeam {
        id: Uuid::new_v4(),
        organization_id,
        name,
        description: input.description,
        specialty: input.specialty,
    };

    let team = match diesel::insert_into(teams::table)
        .values(&row)
        .get_result::<Team>(conn)
    {
        Ok(team) => team,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(EngineError::validation("team name already exists"));
        }
        Err(err) => return Err(err.into()),
    };

    audit::record_event(
        conn,
        AuditEvent {
            organization_id: Some(organization_id),
            actor: Some(viewer.user_id),
            action: "team.created",
            resource_type: RESOURCE_TEAM,
            resource_id: Some(team.id),
            details: json!({ "name": team.name }),
        },
    );
    info!(team_id = %team.id, organization_id = %organization_id, "team created");
    Ok(team)
}

pub fn list_teams(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
) -> EngineResult<Vec<Team>> {
    viewer.require_member(organization_id)?;
    Ok(teams::table
        .filter(teams::organization_id.eq(organization_id))
        .order(teams::name.asc())
        .load(conn)?)
}

pub fn add_team_member(
    conn: &mut PgConnection,
    viewer: &Viewer,
    team_id: Uuid,
    user_id: Uuid,
    role: TeamRole,
) -> EngineResult<TeamMember> {
    let team: Team = teams::table.find(team_id).first(conn)?;
    viewer.require_admin(team.organization_id)?;

    conn.transaction::<_, EngineError, _>(|conn| {
        if membership_role(conn, team.organization_id, user_id)?.is_none() {
            return Err(EngineError::validation(
                "team members must belong to the organization",
            ));
        }

        let row = NewTeamMember {
            team_id,
            user_id,
            role: role.as_str().to_string(),
        };
        let member = diesel::insert_into(team_members::table)
            .values(&row)
            .on_conflict((team_members::team_id, team_members::user_id))
            .do_update()
            .set(team_members::role.eq(role.as_str()))
            .get_result::<TeamMember>(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(team.organization_id),
                actor: Some(viewer.user_id),
                action: "team.member_added",
                resource_type: RESOURCE_TEAM,
                resource_id: Some(team_id),
                details: json!({ "user_id": user_id, "role": role }),
            },
        );
        Ok(member)
    })
}

pub fn list_team_members(
    conn: &mut PgConnection,
    viewer: &Viewer,
    team_id: Uuid,
) -> EngineResult<Vec<TeamMember>> {
    let team: Team = teams::table.find(team_id).first(conn)?;
    viewer.require_member(team.organization_id)?;
    Ok(team_members::table
        .filter(team_members::team_id.eq(team_id))
        .order(team_members::user_id.asc())
        .load(conn)?)
}

pub fn upsert_organization_member(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    user_id: Uuid,
    role: OrganizationRole,
) -> EngineResult<OrganizationMember> {
    viewer.require_admin(organization_id)?;
    if role == OrganizationRole::Owner
        && viewer.role_in(organization_id) != Some(OrganizationRole::Owner)
    {
        return Err(EngineError::Forbidden);
    }

    conn.transaction::<_, EngineError, _>(|conn| {
        let row = NewOrganizationMember {
            organization_id,
            user_id,
            role: role.as_str().to_string(),
        };
        let member = diesel::insert_into(organization_members::table)
            .values(&row)
            .on_conflict((
                organization_members::organization_id,
                organization_members::user_id,
            ))
            .do_update()
            .set(organization_members::role.eq(role.as_str()))
            .get_result::<OrganizationMember>(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: Some(organization_id),
                actor: Some(viewer.user_id),
                action: "organization.member_upserted",
                resource_type: RESOURCE_ORGANIZATION,
                resource_id: Some(organization_id),
                details: json!({ "user_id": user_id, "role": role }),
            },
        );
        Ok(member)
    })
}

pub fn list_organization_members(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
) -> EngineResult<Vec<OrganizationMember>> {
    viewer.require_member(organization_id)?;
    Ok(organization_members::table
        .filter(organization_members::organization_id.eq(organization_id))
        .order(organization_members::user_id.asc())
        .load(conn)?)
}

pub fn membership_role(
    conn: &mut PgConnection,
    organization_id: Uuid,
    user_id: Uuid,
) -> EngineResult<Option<OrganizationRole>> {
    let role: Option<String> = organization_members::table
        .find((organization_id, user_id))
        .select(organization_members::role)
        .first(conn)
        .optional()?;
    role.map(|value| super::parse_stored(&value)).transpose()
}

/// Expands an approver binding into concrete user ids, ordered by user id
/// for team and role bindings.
pub fn resolve_approvers(
    conn: &mut PgConnection,
    organization_id: Uuid,
    binding: &ApproverBinding,
) -> EngineResult<Vec<Uuid>> {
    match binding {
        ApproverBinding::User { user_id } => {
            Ok(membership_role(conn, organization_id, *user_id)?
                .map(|_| vec![*user_id])
                .unwrap_or_default())
        }
        ApproverBinding::Team { team_id } => Ok(team_members::table
            .inner_join(teams::table)
            .filter(teams::organization_id.eq(organization_id))
            .filter(team_members::team_id.eq(*team_id))
            .order(team_members::user_id.asc())
            .select(team_members::user_id)
            .load(conn)?),
        ApproverBinding::Role { role } => Ok(organization_members::table
            .filter(organization_members::organization_id.eq(organization_id))
            .filter(organization_members::role.eq(role.as_str()))
            .order(organization_members::user_id.asc())
            .select(organization_members::user_id)
            .load(conn)?),
    }
}
