use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::{EngineError, EngineResult, OrganizationRole, Visibility};
use crate::models::Document;

/// The acting user and the memberships their identity token carries.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: Uuid,
    pub organizations: HashMap<Uuid, OrganizationRole>,
    pub teams: HashSet<Uuid>,
}

impl Viewer {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization_id: Uuid, role: OrganizationRole) -> Self {
        self.organizations.insert(organization_id, role);
        self
    }

    pub fn with_team(mut self, team_id: Uuid) -> Self {
        self.teams.insert(team_id);
        self
    }

    pub fn role_in(&self, organization_id: Uuid) -> Option<OrganizationRole> {
        self.organizations.get(&organization_id).copied()
    }

    pub fn is_member_of(&self, organization_id: Uuid) -> bool {
        self.organizations.contains_key(&organization_id)
    }

    pub fn is_admin_of(&self, organization_id: Uuid) -> bool {
        self.role_in(organization_id)
            .map(|role| role.is_admin())
            .unwrap_or(false)
    }

    pub fn require_admin(&self, organization_id: Uuid) -> EngineResult<()> {
        if self.is_admin_of(organization_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden)
        }
    }

    pub fn require_member(&self, organization_id: Uuid) -> EngineResult<()> {
        if self.is_member_of(organization_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden)
        }
    }
}

/// The ownership and sharing fields of a document that authorization reads.
#[derive(Debug, Clone)]
pub struct AccessTarget<'a> {
    pub owner_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub visibility: Visibility,
    pub shared_with: &'a [Uuid],
}

impl<'a> AccessTarget<'a> {
    pub fn of(document: &'a Document) -> EngineResult<Self> {
        Ok(Self {
            owner_id: document.user_id,
            organization_id: document.organization_id,
            team_id: document.team_id,
            visibility: super::parse_stored(&document.visibility)?,
            shared_with: &document.shared_with,
        })
    }
}

pub fn can_read(viewer: &Viewer, target: &AccessTarget<'_>) -> bool {
    if target.owner_id == viewer.user_id || target.visibility == Visibility::Public {
        return true;
    }
    if target.shared_with.contains(&viewer.user_id) {
        return true;
    }
    match target.visibility {
        Visibility::Organization => target
            .organization_id
            .map(|org| viewer.is_member_of(org))
            .unwrap_or(false),
        Visibility::Team => target
            .team_id
            .map(|team| viewer.teams.contains(&team))
            .unwrap_or(false),
        Visibility::Private | Visibility::Public => false,
    }
}

/// Owners always write; inside an organization, owner/admin/manager roles
/// may edit any member's documents.
pub fn can_write(viewer: &Viewer, target: &AccessTarget<'_>) -> bool {
    if target.owner_id == viewer.user_id {
        return true;
    }
    target
        .organization_id
        .and_then(|org| viewer.role_in(org))
        .map(|role| role.can_edit())
        .unwrap_or(false)
}

pub fn ensure_read(viewer: &Viewer, document: &Document) -> EngineResult<()> {
    let target = AccessTarget::of(document)?;
    if can_read(viewer, &target) {
        Ok(())
    } else {
        // Unreadable documents are reported as absent.
        Err(EngineError::NotFound)
    }
}

pub fn ensure_write(viewer: &Viewer, document: &Document) -> EngineResult<()> {
    let target = AccessTarget::of(document)?;
    if !can_read(viewer, &target) {
        return Err(EngineError::NotFound);
    }
    if can_write(viewer, &target) {
        Ok(())
    } else {
        Err(EngineError::Forbidden)
    }
}

/// Editor lock check: only the holder of a lock may mutate.
pub fn ensure_unlocked_for(viewer: &Viewer, document: &Document) -> EngineResult<()> {
    match document.locked_by {
        Some(holder) if holder != viewer.user_id => Err(EngineError::Locked),
        _ => Ok(()),
    }
}
