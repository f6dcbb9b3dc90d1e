/// Migrating twice must be a no-op the second time, and `status` must then
/// report the questions table.
///
/// DB-backed test, skipped if MLQ_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent() -> anyhow::Result<()> {
    let url = match std::env::var(mlq_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MLQ_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    mlq_db::migrate(&pool).await?;
    mlq_db::migrate(&pool).await?;

    let st = mlq_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_questions_table);

    Ok(())
}
