//! Concurrency persistence operations.

use anyhow::{anyhow, Result};
use hwy_core::Concurrency;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Concurrency rows per bulk INSERT.
const CONCURRENCY_CHUNK_ROWS: usize = 200;

/// Replace every concurrency of a state with `found`, in one transaction.
pub async fn replace_concurrencies(
    pool: &SqlitePool,
    state_id: &str,
    found: &[Concurrency],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM concurrencies WHERE state_id = ?1")
        .bind(state_id)
        .execute(&mut *tx)
        .await?;

    for chunk in found.chunks(CONCURRENCY_CHUNK_ROWS) {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO concurrencies (state_id, route1, route2, first_segment_id, last_segment_id, \
             route2_segment_id, start_point_index, end_point_index) ",
        );
        builder.push_values(chunk, |mut row, concurrency| {
            row.push_bind(state_id)
                .push_bind(concurrency.route1.to_string())
                .push_bind(concurrency.route2.to_string())
                .push_bind(concurrency.first_segment_id)
                .push_bind(concurrency.last_segment_id)
                .push_bind(concurrency.route2_segment_id)
                .push_bind(concurrency.start_point_index as i64)
                .push_bind(concurrency.end_point_index as i64);
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a state's concurrencies in insertion order.
pub async fn load_concurrencies(pool: &SqlitePool, state_id: &str) -> Result<Vec<Concurrency>> {
    let rows = sqlx::query_as::<_, ConcurrencyRow>(
        r#"
        SELECT route1, route2, first_segment_id, last_segment_id, route2_segment_id,
               start_point_index, end_point_index
        FROM concurrencies
        WHERE state_id = ?1
        ORDER BY id
        "#,
    )
    .bind(state_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

#[derive(sqlx::FromRow)]
struct ConcurrencyRow {
    route1: String,
    route2: String,
    first_segment_id: i64,
    last_segment_id: i64,
    route2_segment_id: i64,
    start_point_index: i64,
    end_point_index: i64,
}

impl TryFrom<ConcurrencyRow> for Concurrency {
    type Error = anyhow::Error;

    fn try_from(row: ConcurrencyRow) -> Result<Self> {
        Ok(Concurrency {
            route1: row.route1.parse().map_err(|e: String| anyhow!(e))?,
            route2: row.route2.parse().map_err(|e: String| anyhow!(e))?,
            first_segment_id: row.first_segment_id,
            last_segment_id: row.last_segment_id,
            route2_segment_id: row.route2_segment_id,
            start_point_index: usize::try_from(row.start_point_index)?,
            end_point_index: usize::try_from(row.end_point_index)?,
        })
    }
}
