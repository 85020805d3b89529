use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::Identity,
    rooms::{Room, RoomContent, RoomRecord, RoomStatus, RoomSummary},
};

use super::{SessionStore, StoreError, StoreResult};

type RoomRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
    Option<i64>,
    String,
);

const SELECT_ROOM: &str =
    "SELECT id,kind,host,status,title,created_at,time_limit,end_time,content FROM rooms";

/// Rooms in SQLite, one row per room with its contributions as a JSON column.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { db_pool };
        store.migrate().await?;
        info!(url, "sqlite store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL,
                host TEXT NOT NULL,
                status TEXT NOT NULL,
                title TEXT,
                created_at INTEGER NOT NULL,
                time_limit INTEGER,
                end_time INTEGER,
                content TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS rooms_by_host ON rooms (host, created_at)")
            .execute(&self.db_pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS rooms_by_status ON rooms (status)")
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(id: &str, ms: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|err| corrupt(id, err))
}

fn corrupt(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        id: id.to_owned(),
        reason: reason.to_string(),
    }
}

fn decode((id, kind, host, status, title, created_at, time_limit, end_time, content): RoomRow) -> StoreResult<RoomRecord> {
    let content: RoomContent = serde_json::from_str(&content)?;
    let room = Room {
        id: Uuid::parse_str(&id).map_err(|err| corrupt(&id, err))?,
        kind: kind.parse().map_err(|err| corrupt(&id, err))?,
        host: host.parse::<Identity>().map_err(|err| corrupt(&id, err))?,
        status: status.parse().map_err(|err| corrupt(&id, err))?,
        title,
        created_at: from_millis(&id, created_at)?,
        time_limit: time_limit
            .map(u32::try_from)
            .transpose()
            .map_err(|err| corrupt(&id, err))?,
        end_time: end_time.map(|ms| from_millis(&id, ms)).transpose()?,
    };
    if room.kind != content.kind() {
        return Err(corrupt(&id, format!("{} row holds {} content", room.kind, content.kind())));
    }
    Ok(RoomRecord { room, content })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, record: &RoomRecord) -> StoreResult<()> {
        let room = &record.room;
        sqlx::query(
            "INSERT INTO rooms (id,kind,host,status,title,created_at,time_limit,end_time,content) VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(room.id.to_string())
        .bind(room.kind.as_str())
        .bind(room.host.to_string())
        .bind(room.status.as_str())
        .bind(&room.title)
        .bind(to_millis(room.created_at))
        .bind(room.time_limit.map(i64::from))
        .bind(room.end_time.map(to_millis))
        .bind(serde_json::to_string(&record.content)?)
        .execute(&self.db_pool)
        .await
        .map_err(|err| {
            if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                StoreError::Exists(room.id)
            } else {
                StoreError::Database(err)
            }
        })?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<RoomRecord>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("{SELECT_ROOM} WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(decode).transpose()
    }

    async fn save(&self, record: &RoomRecord) -> StoreResult<()> {
        let room = &record.room;
        let result = sqlx::query("UPDATE rooms SET status=?,title=?,end_time=?,content=? WHERE id=?")
            .bind(room.status.as_str())
            .bind(&room.title)
            .bind(room.end_time.map(to_millis))
            .bind(serde_json::to_string(&record.content)?)
            .bind(room.id.to_string())
            .execute(&self.db_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(room.id));
        }
        Ok(())
    }

    async fn list_by_host(&self, host: &Identity) -> StoreResult<Vec<RoomSummary>> {
        let rows: Vec<RoomRow> =
            sqlx::query_as(&format!("{SELECT_ROOM} WHERE host=? ORDER BY created_at DESC, id DESC"))
                .bind(host.to_string())
                .fetch_all(&self.db_pool)
                .await?;
        rows.into_iter()
            .map(|row| decode(row).map(|record| RoomSummary::from(&record.room)))
            .collect()
    }

    async fn list_active(&self) -> StoreResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM rooms WHERE status=?")
            .bind(RoomStatus::Active.as_str())
            .fetch_all(&self.db_pool)
            .await?;
        rows.into_iter()
            .map(|(id,)| Uuid::parse_str(&id).map_err(|err| corrupt(&id, err)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::rooms::{Lifecycle, Mutation, RoomDraft, mutation};

    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    #[tokio::test]
    async fn record_survives_a_round_trip() {
        let store = store().await;
        let host = Identity::User("host".into());
        let mut record = RoomDraft::WordCloud { title: Some("Retro".into()), time_limit: Some(60) }
            .into_record(host.clone(), at(0))
            .unwrap();
        store.insert(&record).await.unwrap();

        record.room.apply(&host, Lifecycle::Start, at(1)).unwrap();
        mutation::apply(&mut record, &Identity::Guest("g".into()), Mutation::SubmitWord { text: "Cat".into() }, at(2)).unwrap();
        store.save(&record).await.unwrap();

        assert_eq!(store.load(record.room.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.list_active().await.unwrap(), vec![record.room.id]);
        assert_eq!(store.list_by_host(&host).await.unwrap()[0].title.as_deref(), Some("Retro"));
    }

    #[tokio::test]
    async fn missing_and_duplicate_rows() {
        let store = store().await;
        let record = RoomDraft::Qna { title: None, time_limit: None }
            .into_record(Identity::Guest("g".into()), at(0))
            .unwrap();

        assert!(matches!(store.save(&record).await, Err(StoreError::Missing(_))));
        store.insert(&record).await.unwrap();
        assert!(matches!(store.insert(&record).await, Err(StoreError::Exists(_))));
        assert!(store.load(Uuid::now_v7()).await.unwrap().is_none());
    }
}
