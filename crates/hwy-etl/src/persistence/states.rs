//! State rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use hwy_core::StateProfile;
use sqlx::{Sqlite, SqlitePool};

/// A seeded state as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub identifier: String,
    pub title: String,
    pub initials: String,
    pub state_code: i64,
    pub seeded_at: Option<DateTime<Utc>>,
}

/// Upsert a state row within an existing transaction, stamping the run time.
pub async fn upsert_state_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    profile: &StateProfile,
    seeded_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO states (identifier, title, initials, state_code, seeded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(identifier) DO UPDATE SET
            title = ?2, initials = ?3, state_code = ?4, seeded_at = ?5
        "#,
    )
    .bind(&profile.identifier)
    .bind(&profile.title)
    .bind(&profile.initials)
    .bind(profile.state_code)
    .bind(seeded_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Load one state by identifier.
pub async fn load_state(pool: &SqlitePool, identifier: &str) -> Result<Option<StateRecord>> {
    let row = sqlx::query_as::<_, StateRow>(
        "SELECT identifier, title, initials, state_code, seeded_at FROM states WHERE identifier = ?1",
    )
    .bind(identifier)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(StateRecord::from))
}

/// All seeded states, ordered by identifier.
pub async fn list_states(pool: &SqlitePool) -> Result<Vec<StateRecord>> {
    let rows = sqlx::query_as::<_, StateRow>(
        "SELECT identifier, title, initials, state_code, seeded_at FROM states ORDER BY identifier",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StateRecord::from).collect())
}

#[derive(sqlx::FromRow)]
struct StateRow {
    identifier: String,
    title: String,
    initials: String,
    state_code: i64,
    seeded_at: Option<String>,
}

impl From<StateRow> for StateRecord {
    fn from(row: StateRow) -> Self {
        let seeded_at = row
            .seeded_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        StateRecord {
            identifier: row.identifier,
            title: row.title,
            initials: row.initials,
            state_code: row.state_code,
            seeded_at,
        }
    }
}
