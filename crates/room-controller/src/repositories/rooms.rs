//! Rooms repository (Postgres).
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Webhook URLs are stored but never logged

use super::RoomRepository;
use crate::errors::RcError;
use crate::models::{NewRoomRecord, RoomRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

const ROOM_COLUMNS: &str = "id, room_id, sid, title, is_running, created_at, ended_at, \
     joined_participants, is_breakout_room, parent_room_id, webhook_url";

/// `RoomRepository` backed by a Postgres pool.
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError> {
        let row: Option<RoomRow> = sqlx::query_as(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = $1"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RoomRecord::from))
    }

    #[instrument(skip_all, fields(room_id = %record.room_id, sid = %record.sid))]
    async fn upsert_running(&self, record: &NewRoomRecord) -> Result<RoomRecord, RcError> {
        let row: RoomRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO rooms (
                room_id, sid, title, is_running, created_at, ended_at,
                joined_participants, is_breakout_room, parent_room_id, webhook_url
            )
            VALUES ($1, $2, $3, TRUE, NOW(), NULL, 0, $4, $5, $6)
            ON CONFLICT (room_id) DO UPDATE SET
                sid = EXCLUDED.sid,
                title = EXCLUDED.title,
                is_running = TRUE,
                created_at = NOW(),
                ended_at = NULL,
                joined_participants = 0,
                is_breakout_room = EXCLUDED.is_breakout_room,
                parent_room_id = EXCLUDED.parent_room_id,
                webhook_url = EXCLUDED.webhook_url
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(&record.room_id)
        .bind(&record.sid)
        .bind(&record.title)
        .bind(record.is_breakout_room)
        .bind(&record.parent_room_id)
        .bind(&record.webhook_url)
        .fetch_one(&self.pool)
        .await?;

        debug!(target: "rc.repo", room_id = %record.room_id, id = row.id, "Room record upserted");
        Ok(row.into())
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn mark_ended(&self, room_id: &str) -> Result<bool, RcError> {
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET is_running = FALSE, ended_at = NOW()
            WHERE room_id = $1 AND is_running
            "#,
        )
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all)]
    async fn list_running(&self) -> Result<Vec<RoomRecord>, RcError> {
        let rows: Vec<RoomRow> = sqlx::query_as(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE is_running ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RoomRecord::from).collect())
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn increment_participants(&self, room_id: &str) -> Result<(), RcError> {
        sqlx::query(
            "UPDATE rooms SET joined_participants = joined_participants + 1 WHERE room_id = $1",
        )
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn decrement_participants(&self, room_id: &str) -> Result<(), RcError> {
        sqlx::query(
            r#"
            UPDATE rooms
            SET joined_participants = GREATEST(joined_participants - 1, 0)
            WHERE room_id = $1
            "#,
        )
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %room_id, count))]
    async fn set_participant_count(&self, room_id: &str, count: i64) -> Result<(), RcError> {
        sqlx::query("UPDATE rooms SET joined_participants = $2 WHERE room_id = $1")
            .bind(room_id)
            .bind(count.max(0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: i64,
    room_id: String,
    sid: String,
    title: String,
    is_running: bool,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    joined_participants: i64,
    is_breakout_room: bool,
    parent_room_id: Option<String>,
    webhook_url: Option<String>,
}

impl From<RoomRow> for RoomRecord {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            sid: row.sid,
            title: row.title,
            is_running: row.is_running,
            created_at: row.created_at,
            ended_at: row.ended_at,
            joined_participants: row.joined_participants,
            is_breakout_room: row.is_breakout_room,
            parent_room_id: row.parent_room_id,
            webhook_url: row.webhook_url,
        }
    }
}
