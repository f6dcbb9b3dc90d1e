//! Storage seam for the reconciliation engine.
//!
//! The engine never caches question rows across runs: it loads candidates,
//! and writes back through a single conditional update per question.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mlq_marketplace::{CredentialStore, StoredCredentials, TokenError};
use mlq_reconcile::QuestionMutation;
use mlq_schemas::{CandidateQuestion, ItemRef, Question, QuestionStatus, ReconcileScope};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Questions in `statuses` within `scope`, joined with their account flags.
    async fn load_candidates(
        &self,
        scope: &ReconcileScope,
        statuses: &[QuestionStatus],
    ) -> Result<Vec<CandidateQuestion>>;

    /// One question whatever its status. `None` when the id is unknown.
    async fn load_question(&self, question_id: Uuid) -> Result<Option<CandidateQuestion>>;

    /// Apply `m` only if the row still has the expected status and attempt
    /// count. Returns `false` when another writer got there first.
    async fn apply_mutation(&self, m: &QuestionMutation) -> Result<bool>;

    async fn flag_account_reauth(&self, account_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgQuestionStore {
    pool: PgPool,
}

impl PgQuestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const CANDIDATE_COLUMNS: &str = r#"
    q.id, q.marketplace_question_id, q.account_id, q.body, q.ai_suggestion,
    q.answer_text, q.status, q.received_at, q.approved_at, q.item_id,
    q.item_title, q.item_price, q.item_permalink, q.last_reconciled_at,
    q.reconcile_attempts, q.requires_manual_review,
    a.organization_id, a.is_active, a.needs_reauth
"#;

fn candidate_from_row(row: &PgRow) -> Result<CandidateQuestion> {
    let status_raw: String = row.try_get("status")?;
    let status = QuestionStatus::parse(&status_raw).map_err(|e| anyhow!(e))?;
    let attempts: i32 = row.try_get("reconcile_attempts")?;

    Ok(CandidateQuestion {
        question: Question {
            id: row.try_get("id")?,
            marketplace_question_id: row.try_get("marketplace_question_id")?,
            account_id: row.try_get("account_id")?,
            body: row.try_get("body")?,
            ai_suggestion: row.try_get("ai_suggestion")?,
            answer_text: row.try_get("answer_text")?,
            status,
            received_at: row.try_get("received_at")?,
            approved_at: row.try_get("approved_at")?,
            item: ItemRef {
                item_id: row.try_get("item_id")?,
                title: row.try_get("item_title")?,
                price: row.try_get("item_price")?,
                permalink: row.try_get("item_permalink")?,
            },
            last_reconciled_at: row.try_get("last_reconciled_at")?,
            reconcile_attempts: u32::try_from(attempts).unwrap_or(0),
            requires_manual_review: row.try_get("requires_manual_review")?,
        },
        organization_id: row.try_get("organization_id")?,
        account_active: row.try_get("is_active")?,
        account_needs_reauth: row.try_get("needs_reauth")?,
    })
}

fn scope_binds(scope: &ReconcileScope) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
    match scope {
        ReconcileScope::All => (None, None, None),
        ReconcileScope::Organization(id) => (Some(*id), None, None),
        ReconcileScope::Account(id) => (None, Some(*id), None),
        ReconcileScope::Question(id) => (None, None, Some(*id)),
    }
}

#[async_trait]
impl QuestionStore for PgQuestionStore {
    async fn load_candidates(
        &self,
        scope: &ReconcileScope,
        statuses: &[QuestionStatus],
    ) -> Result<Vec<CandidateQuestion>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let (org, account, question) = scope_binds(scope);

        let sql = format!(
            r#"
            select {CANDIDATE_COLUMNS}
            from questions q
            join accounts a on a.id = q.account_id
            where q.status = any($1)
              and ($2::uuid is null or a.organization_id = $2)
              and ($3::uuid is null or q.account_id = $3)
              and ($4::uuid is null or q.id = $4)
            order by q.received_at asc, q.id asc
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(statuses)
            .bind(org)
            .bind(account)
            .bind(question)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("load_candidates failed scope={scope}"))?;

        rows.iter().map(candidate_from_row).collect()
    }

    async fn load_question(&self, question_id: Uuid) -> Result<Option<CandidateQuestion>> {
        let sql = format!(
            r#"
            select {CANDIDATE_COLUMNS}
            from questions q
            join accounts a on a.id = q.account_id
            where q.id = $1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .context("load_question failed")?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn apply_mutation(&self, m: &QuestionMutation) -> Result<bool> {
        let attempts = i32::try_from(m.reconcile_attempts).context("reconcile_attempts overflow")?;
        let expected_attempts =
            i32::try_from(m.expected_attempts).context("expected_attempts overflow")?;

        let mut tx = self.pool.begin().await.context("apply_mutation begin failed")?;
        let res = sqlx::query(
            r#"
            update questions
               set status = $1,
                   approved_at = $2,
                   answer_text = $3,
                   reconcile_attempts = $4,
                   requires_manual_review = $5,
                   last_reconciled_at = $6
             where id = $7
               and status = $8
               and reconcile_attempts = $9
            "#,
        )
        .bind(m.status.as_str())
        .bind(m.approved_at)
        .bind(&m.answer_text)
        .bind(attempts)
        .bind(m.requires_manual_review)
        .bind(m.last_reconciled_at)
        .bind(m.question_id)
        .bind(m.expected_status.as_str())
        .bind(expected_attempts)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("apply_mutation failed question_id={}", m.question_id))?;
        tx.commit().await.context("apply_mutation commit failed")?;

        Ok(res.rows_affected() == 1)
    }

    async fn flag_account_reauth(&self, account_id: Uuid) -> Result<()> {
        sqlx::query("update accounts set needs_reauth = true where id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("flag_account_reauth failed")?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgQuestionStore {
    async fn load_credentials(
        &self,
        account_id: Uuid,
    ) -> Result<Option<StoredCredentials>, TokenError> {
        let row = sqlx::query(
            r#"
            select access_token, refresh_token, expires_at
            from account_tokens
            where account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TokenError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| TokenError::Storage(e.to_string());
        Ok(Some(StoredCredentials {
            access_token: row.try_get("access_token").map_err(decode)?,
            refresh_token: row.try_get("refresh_token").map_err(decode)?,
            expires_at: row.try_get("expires_at").map_err(decode)?,
        }))
    }

    async fn save_credentials(
        &self,
        account_id: Uuid,
        creds: &StoredCredentials,
    ) -> Result<(), TokenError> {
        crate::upsert_account_tokens(
            &self.pool,
            account_id,
            &creds.access_token,
            &creds.refresh_token,
            creds.expires_at,
        )
        .await
        .map_err(|e| TokenError::Storage(format!("{e:#}")))
    }
}
