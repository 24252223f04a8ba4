use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use legalease::auth::jwt::{JwtService, MembershipClaim};
use legalease::config::AppConfig;
use legalease::converter::{ConversionProvider, ConversionResult};
use legalease::db::{self, PgPool};
use legalease::engine::access::Viewer;
use legalease::engine::organizations::upsert_organization_member;
use legalease::engine::{ConversionDirection, OrganizationRole};
use legalease::models::Job;
use legalease::routes;
use legalease::state::AppState;
use legalease::{default_handlers, Worker};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Records calls and answers with a predictable conversion.
#[derive(Default)]
pub struct FakeConverter {
    calls: Mutex<Vec<(String, ConversionDirection)>>,
    failing: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl ConversionProvider for FakeConverter {
    async fn convert(
        &self,
        text: &str,
        direction: ConversionDirection,
    ) -> Result<ConversionResult> {
        self.calls.lock().await.push((text.to_string(), direction));
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("provider unavailable");
        }
        Ok(ConversionResult {
            converted_text: format!("plain: {text}"),
            key_terms: vec!["indemnity".to_string()],
            summary: Some("short summary".to_string()),
        })
    }
}

impl FakeConverter {
    #[allow(dead_code)]
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    #[allow(dead_code)]
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    converter: Arc<FakeConverter>,
}

impl TestApp {
    /// `None` when no test database is configured.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            conversion_endpoint: None,
            conversion_timeout_secs: 5,
            archive_retention_days: None,
            timeout_sweep_interval_secs: 60,
            worker_poll_interval_secs: 1,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let converter = Arc::new(FakeConverter::default());
        let converter_for_state: Arc<dyn ConversionProvider> = converter.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, converter_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            converter,
        }))
    }

    #[allow(dead_code)]
    pub fn converter(&self) -> Arc<FakeConverter> {
        self.converter.clone()
    }

    pub fn token(
        &self,
        user_id: Uuid,
        organizations: &[(Uuid, OrganizationRole)],
        teams: &[Uuid],
    ) -> Result<String> {
        let claims = organizations
            .iter()
            .map(|(organization_id, role)| MembershipClaim {
                organization_id: *organization_id,
                role: *role,
            })
            .collect();
        self.state
            .jwt
            .generate_token(user_id, claims, teams.to_vec())
    }

    /// Registers a member row so the user can be resolved as an approver.
    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let admin = Viewer::new(Uuid::new_v4())
                .with_organization(organization_id, OrganizationRole::Owner);
            upsert_organization_member(conn, &admin, organization_id, user_id, role)
                .map_err(|err| anyhow!("failed to add member: {err}"))?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn grant_credits(&self, user_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            use legalease::schema::credit_balances;
            diesel::insert_into(credit_balances::table)
                .values((
                    credit_balances::user_id.eq(user_id),
                    credit_balances::can_proceed.eq(true),
                ))
                .on_conflict(credit_balances::user_id)
                .do_update()
                .set(credit_balances::can_proceed.eq(true))
                .execute(conn)
                .context("failed to grant credits")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use legalease::schema::jobs;
            let rows = jobs::table
                .filter(jobs::job_type.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    /// Runs one worker iteration against the fake converter.
    #[allow(dead_code)]
    pub async fn run_worker_once(&self) -> Result<bool> {
        let worker = Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(),
            Duration::from_millis(10),
        );
        worker
            .run_once()
            .await
            .map_err(|err| anyhow!("worker iteration failed: {err}"))
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        token: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match payload {
            Some(payload) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(payload)?)
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body)?)
            .await
            .expect("infallible response");

        let status = response.status();
        let bytes = body_to_vec(response.into_body()).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };
        Ok((status, json))
    }

    pub async fn get(&self, path: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, path, None, Some(token)).await
    }

    pub async fn post<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
        token: &str,
    ) -> Result<(StatusCode, Value)> {
        let payload = serde_json::to_value(payload)?;
        self.request(Method::POST, path, Some(&payload), Some(token))
            .await
    }

    #[allow(dead_code)]
    pub async fn patch<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
        token: &str,
    ) -> Result<(StatusCode, Value)> {
        let payload = serde_json::to_value(payload)?;
        self.request(Method::PATCH, path, Some(&payload), Some(token))
            .await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::DELETE, path, None, Some(token)).await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Pulls a UUID out of a JSON response field.
pub fn id_of(value: &Value, field: &str) -> Result<Uuid> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing {field} in {value}"))?;
    Ok(raw.parse()?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE approval_delegations, approval_signoffs, approval_steps, \
         document_approvals, workflow_steps, approval_workflows, document_versions, \
         documents, team_members, teams, organization_members, audit_logs, notifications, \
         credit_balances, jobs RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
