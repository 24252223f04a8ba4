pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use uuid::Uuid;

use crate::{engine::access::Viewer, error::AppError, state::AppState};

use jwt::{Claims, MembershipClaim};

/// Identity asserted by the bearer token. Memberships come from the identity
/// provider and are trusted as given.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub organizations: Vec<MembershipClaim>,
    pub teams: Vec<Uuid>,
}

impl AuthenticatedUser {
    pub fn viewer(&self) -> Viewer {
        let viewer = self
            .organizations
            .iter()
            .fold(Viewer::new(self.user_id), |viewer, membership| {
                viewer.with_organization(membership.organization_id, membership.role)
            });
        self.teams
            .iter()
            .fold(viewer, |viewer, team_id| viewer.with_team(*team_id))
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            organizations: claims.organizations,
            teams: claims.teams,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser::from(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OrganizationRole;

    #[test]
    fn viewer_reflects_claimed_memberships() {
        let org = Uuid::new_v4();
        let team = Uuid::new_v4();
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            organizations: vec![MembershipClaim {
                organization_id: org,
                role: OrganizationRole::Admin,
            }],
            teams: vec![team],
        };

        let viewer = user.viewer();
        assert_eq!(viewer.user_id, user.user_id);
        assert!(viewer.is_admin_of(org));
        assert!(viewer.teams.contains(&team));
        assert!(!viewer.is_member_of(Uuid::new_v4()));
    }
}
