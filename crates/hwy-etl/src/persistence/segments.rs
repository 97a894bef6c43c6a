//! Segment and point persistence.
//!
//! [`SegmentWriter`] owns one transaction per state: the state's previous
//! rows are removed, every assembled segment is inserted with its points and
//! lookup indices are created before commit. Dropping the writer without
//! calling [`SegmentWriter::finish`] rolls everything back.

use anyhow::{anyhow, Result};
use chrono::Utc;
use hwy_core::{
    segment_length, Direction, LatLon, RouteGeometry, RouteRef, RouteSignType, SegmentDraft,
    SegmentGeometry, StateProfile,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::states::upsert_state_tx;

/// Point rows per bulk INSERT; five binds each keeps well under SQLite's
/// host-parameter limit.
pub const POINT_CHUNK_ROWS: usize = 500;

/// Outcome of one state's write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub segments: usize,
    pub points: usize,
    /// Base offset assigned to the first segment.
    pub first_base: i64,
    /// Offset the next segment would receive.
    pub next_base: i64,
}

/// Transactional writer for one state's segments.
pub struct SegmentWriter {
    tx: Transaction<'static, Sqlite>,
    state_id: String,
    next_base: i64,
    summary: WriteSummary,
}

impl SegmentWriter {
    /// Open the state's transaction, upsert its row and remove what an
    /// earlier run stored for it.
    pub async fn begin(pool: &SqlitePool, profile: &StateProfile) -> Result<Self> {
        let mut tx = pool.begin().await?;
        upsert_state_tx(&mut tx, profile, Utc::now()).await?;

        // Clear the previous run, dependents first
        sqlx::query("DELETE FROM concurrencies WHERE state_id = ?1")
            .bind(&profile.identifier)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM points WHERE segment_id IN (SELECT id FROM segments WHERE state_id = ?1)",
        )
        .bind(&profile.identifier)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM segments WHERE state_id = ?1")
            .bind(&profile.identifier)
            .execute(&mut *tx)
            .await?;

        // Bases continue after every point stored so far, any state
        let next_base: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id) + 1, 0) FROM points")
            .fetch_one(&mut *tx)
            .await?;

        Ok(Self {
            tx,
            state_id: profile.identifier.clone(),
            next_base,
            summary: WriteSummary {
                first_base: next_base,
                next_base,
                ..WriteSummary::default()
            },
        })
    }

    /// Insert one segment and its points. Returns the new segment id.
    pub async fn write_segment(&mut self, draft: &SegmentDraft) -> Result<i64> {
        let points = draft.points();
        let base = self.next_base;
        let length_m = segment_length(&points);

        let result = sqlx::query(
            r#"
            INSERT INTO segments (state_id, route_number, sign_type, segment_index, direction, point_count, length_m, base)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&self.state_id)
        .bind(&draft.route_number)
        .bind(draft.sign_type.code())
        .bind(i64::from(draft.segment_index))
        .bind(draft.direction.to_string())
        .bind(points.len() as i64)
        .bind(length_m)
        .bind(base)
        .execute(&mut *self.tx)
        .await?;
        let segment_id = result.last_insert_rowid();

        // Bulk insert points in chunks
        for (chunk_no, chunk) in points.chunks(POINT_CHUNK_ROWS).enumerate() {
            let offset = chunk_no * POINT_CHUNK_ROWS;
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO points (id, segment_id, point_index, lat, lon) ",
            );
            builder.push_values(chunk.iter().enumerate(), |mut row, (i, point)| {
                let index = (offset + i) as i64;
                row.push_bind(base + index)
                    .push_bind(segment_id)
                    .push_bind(index)
                    .push_bind(point.lat)
                    .push_bind(point.lon);
            });
            builder.build().execute(&mut *self.tx).await?;
        }

        debug!(
            state = %self.state_id,
            route = %draft.route(),
            direction = %draft.direction,
            index = draft.segment_index,
            points = points.len(),
            base,
            "Wrote segment"
        );

        self.next_base += points.len() as i64;
        self.summary.segments += 1;
        self.summary.points += points.len();
        self.summary.next_base = self.next_base;
        Ok(segment_id)
    }

    /// Build lookup indices and commit.
    pub async fn finish(mut self) -> Result<WriteSummary> {
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_segments_state ON segments(state_id)",
            "CREATE INDEX IF NOT EXISTS idx_segments_route_direction ON segments(route_number, direction)",
            "CREATE INDEX IF NOT EXISTS idx_points_segment ON points(segment_id)",
        ] {
            sqlx::query(statement).execute(&mut *self.tx).await?;
        }
        self.tx.commit().await?;
        Ok(self.summary)
    }
}

/// Replace a state's segments with `drafts`, in order, in one transaction.
pub async fn write_state_segments(
    pool: &SqlitePool,
    profile: &StateProfile,
    drafts: &[SegmentDraft],
) -> Result<WriteSummary> {
    let mut writer = SegmentWriter::begin(pool, profile).await?;
    for draft in drafts {
        writer.write_segment(draft).await?;
    }
    writer.finish().await
}

/// A stored segment without its points.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub id: i64,
    pub state_id: String,
    pub route_number: String,
    pub sign_type: RouteSignType,
    pub segment_index: u32,
    pub direction: Direction,
    pub point_count: usize,
    pub length_m: f64,
    pub base: i64,
}

impl SegmentRecord {
    pub fn route(&self) -> RouteRef {
        RouteRef::new(self.sign_type, self.route_number.clone())
    }
}

/// Segments of a state, optionally narrowed by route-number prefix and
/// direction, ordered by id.
pub async fn list_segments(
    pool: &SqlitePool,
    state_id: &str,
    route_prefix: Option<&str>,
    direction: Option<Direction>,
) -> Result<Vec<SegmentRecord>> {
    let pattern = route_prefix.map(|prefix| format!("{prefix}%"));
    let rows = sqlx::query_as::<_, SegmentRow>(
        r#"
        SELECT id, state_id, route_number, sign_type, segment_index, direction, point_count, length_m, base
        FROM segments
        WHERE state_id = ?1
          AND (?2 IS NULL OR route_number LIKE ?2)
          AND (?3 IS NULL OR direction = ?3)
        ORDER BY id
        "#,
    )
    .bind(state_id)
    .bind(pattern)
    .bind(direction.map(|d| d.to_string()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

/// Points of one segment in travel order.
pub async fn load_points(pool: &SqlitePool, segment_id: i64) -> Result<Vec<LatLon>> {
    let rows: Vec<(f64, f64)> = sqlx::query_as(
        "SELECT lat, lon FROM points WHERE segment_id = ?1 ORDER BY point_index",
    )
    .bind(segment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(lat, lon)| LatLon::new(lat, lon)).collect())
}

/// Every stored segment of `route` in a state, with points, ordered by
/// ascending segment id.
pub async fn load_route_geometry(
    pool: &SqlitePool,
    state_id: &str,
    route: &RouteRef,
) -> Result<RouteGeometry> {
    let rows: Vec<(i64, String, f64, f64)> = sqlx::query_as(
        r#"
        SELECT s.id, s.direction, p.lat, p.lon
        FROM segments s
        JOIN points p ON p.segment_id = s.id
        WHERE s.state_id = ?1 AND s.route_number = ?2 AND s.sign_type = ?3
        ORDER BY s.id, p.point_index
        "#,
    )
    .bind(state_id)
    .bind(&route.number)
    .bind(route.sign_type.code())
    .fetch_all(pool)
    .await?;

    let mut segments: Vec<SegmentGeometry> = Vec::new();
    for (id, direction, lat, lon) in rows {
        let point = LatLon::new(lat, lon);
        match segments.last_mut() {
            Some(segment) if segment.id == id => segment.points.push(point),
            _ => segments.push(SegmentGeometry {
                id,
                direction: parse_direction(&direction)?,
                points: vec![point],
            }),
        }
    }

    Ok(RouteGeometry {
        route: route.clone(),
        segments,
    })
}

fn parse_direction(raw: &str) -> Result<Direction> {
    let mut chars = raw.chars();
    match (chars.next().and_then(Direction::from_char), chars.next()) {
        (Some(direction), None) => Ok(direction),
        _ => Err(anyhow!("invalid stored direction '{raw}'")),
    }
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
    id: i64,
    state_id: String,
    route_number: String,
    sign_type: i64,
    segment_index: i64,
    direction: String,
    point_count: i64,
    length_m: f64,
    base: i64,
}

impl TryFrom<SegmentRow> for SegmentRecord {
    type Error = anyhow::Error;

    fn try_from(row: SegmentRow) -> Result<Self> {
        let sign_type = RouteSignType::from_code(row.sign_type)
            .ok_or_else(|| anyhow!("invalid stored sign type {}", row.sign_type))?;

        Ok(SegmentRecord {
            id: row.id,
            state_id: row.state_id,
            route_number: row.route_number,
            sign_type,
            segment_index: u32::try_from(row.segment_index)?,
            direction: parse_direction(&row.direction)?,
            point_count: usize::try_from(row.point_count)?,
            length_m: row.length_m,
            base: row.base,
        })
    }
}
