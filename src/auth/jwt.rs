use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::OrganizationRole;

/// Verifies tokens minted by the identity provider with the shared secret.
#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipClaim {
    pub organization_id: Uuid,
    pub role: OrganizationRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub organizations: Vec<MembershipClaim>,
    #[serde(default)]
    pub teams: Vec<Uuid>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        organizations: Vec<MembershipClaim>,
        teams: Vec<Uuid>,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            organizations,
            teams,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str, audience: &str) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: secret.into(),
            jwt_issuer: "legalease".into(),
            jwt_audience: audience.into(),
            jwt_expiry_minutes: 5,
            cors_allowed_origin: None,
            conversion_endpoint: None,
            conversion_timeout_secs: 5,
            archive_retention_days: None,
            timeout_sweep_interval_secs: 60,
            worker_poll_interval_secs: 1,
        }
    }

    #[test]
    fn token_carries_memberships() {
        let jwt = JwtService::from_config(&config("secret", "clients")).unwrap();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let team = Uuid::new_v4();
        let token = jwt
            .generate_token(
                user,
                vec![MembershipClaim {
                    organization_id: org,
                    role: OrganizationRole::Manager,
                }],
                vec![team],
            )
            .unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.organizations[0].organization_id, org);
        assert_eq!(claims.organizations[0].role, OrganizationRole::Manager);
        assert_eq!(claims.teams, vec![team]);
    }

    #[test]
    fn rejects_foreign_audience_and_secret() {
        let issuer = JwtService::from_config(&config("secret", "clients")).unwrap();
        let token = issuer
            .generate_token(Uuid::new_v4(), Vec::new(), Vec::new())
            .unwrap();

        let other_audience = JwtService::from_config(&config("secret", "others")).unwrap();
        assert!(other_audience.verify_token(&token).is_err());
        let other_secret = JwtService::from_config(&config("different", "clients")).unwrap();
        assert!(other_secret.verify_token(&token).is_err());
    }
}
