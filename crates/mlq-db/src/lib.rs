use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mlq_schemas::{Account, Organization, Question};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod store;

pub use store::{PgQuestionStore, QuestionStore};

pub const ENV_DB_URL: &str = "MLQ_DATABASE_URL";

/// Connect to Postgres using MLQ_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='questions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_questions_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_questions_table: bool,
}

// ---------------------------------------------------------------------------
// Row writers. Ingestion lives elsewhere; these seed fixtures and back the CLI.
// ---------------------------------------------------------------------------

pub async fn insert_organization(pool: &PgPool, org: &Organization) -> Result<()> {
    sqlx::query("insert into organizations (id, name) values ($1, $2)")
        .bind(org.id)
        .bind(&org.name)
        .execute(pool)
        .await
        .context("insert_organization failed")?;
    Ok(())
}

pub async fn insert_account(pool: &PgPool, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        insert into accounts (id, organization_id, nickname, is_active, needs_reauth)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(account.id)
    .bind(account.organization_id)
    .bind(&account.nickname)
    .bind(account.is_active)
    .bind(account.needs_reauth)
    .execute(pool)
    .await
    .context("insert_account failed")?;
    Ok(())
}

/// Clear the re-auth flag after the seller logged in again.
pub async fn clear_account_reauth(pool: &PgPool, account_id: uuid::Uuid) -> Result<()> {
    sqlx::query("update accounts set needs_reauth = false where id = $1")
        .bind(account_id)
        .execute(pool)
        .await
        .context("clear_account_reauth failed")?;
    Ok(())
}

pub async fn insert_question(pool: &PgPool, q: &Question) -> Result<()> {
    q.check_invariants()
        .map_err(|e| anyhow::anyhow!("insert_question rejected: {e}"))?;
    let attempts = i32::try_from(q.reconcile_attempts).context("reconcile_attempts overflow")?;

    sqlx::query(
        r#"
        insert into questions (
          id, marketplace_question_id, account_id, body, ai_suggestion, answer_text,
          status, received_at, approved_at, item_id, item_title, item_price,
          item_permalink, last_reconciled_at, reconcile_attempts, requires_manual_review
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16
        )
        "#,
    )
    .bind(q.id)
    .bind(&q.marketplace_question_id)
    .bind(q.account_id)
    .bind(&q.body)
    .bind(&q.ai_suggestion)
    .bind(&q.answer_text)
    .bind(q.status.as_str())
    .bind(q.received_at)
    .bind(q.approved_at)
    .bind(&q.item.item_id)
    .bind(&q.item.title)
    .bind(&q.item.price)
    .bind(&q.item.permalink)
    .bind(q.last_reconciled_at)
    .bind(attempts)
    .bind(q.requires_manual_review)
    .execute(pool)
    .await
    .context("insert_question failed")?;
    Ok(())
}

pub async fn upsert_account_tokens(
    pool: &PgPool,
    account_id: uuid::Uuid,
    access_token: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into account_tokens (account_id, access_token, refresh_token, expires_at, updated_at)
        values ($1, $2, $3, $4, now())
        on conflict (account_id) do update
          set access_token = excluded.access_token,
              refresh_token = excluded.refresh_token,
              expires_at = excluded.expires_at,
              updated_at = now()
        "#,
    )
    .bind(account_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("upsert_account_tokens failed")?;
    Ok(())
}
