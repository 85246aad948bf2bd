use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::StoreConfig;
use scheduler_domain::{
    validate_paging, EventStore, FailureEvent, PagedResult, PersistedTask, SuccessEvent, TaskStore,
};
use scheduler_errors::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};

const TASK_COLUMNS: &str =
    "id, name, type_name, data, properties, success_count, failure_count, creation_time";

/// SQLite 任务存储
///
/// 同时实现 [`TaskStore`] 与 [`EventStore`]：任务记录保存在 `scheduled_task`，
/// 执行历史分别保存在 `scheduled_task_success` 与 `scheduled_task_failure`。
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 按配置连接数据库并初始化表结构，数据库文件不存在时自动创建
    pub async fn connect(config: &StoreConfig) -> SchedulerResult<Self> {
        debug!("Connecting SQLite task store at: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;

        debug!("Successfully connected SQLite task store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表结构与索引
    pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
        debug!("Running SQLite task store migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_task (
                id TEXT PRIMARY KEY NOT NULL CHECK (length(id) <= 36),
                name TEXT NOT NULL,
                type_name TEXT NOT NULL,
                data TEXT NOT NULL,
                properties TEXT,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                creation_time DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_task_success (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                creation_time DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_task_failure (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                message TEXT NOT NULL,
                trace TEXT NOT NULL,
                creation_time DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_scheduled_task_name ON scheduled_task(name)",
            "CREATE INDEX IF NOT EXISTS idx_scheduled_task_creation_time ON scheduled_task(creation_time)",
            "CREATE INDEX IF NOT EXISTS idx_scheduled_task_success_task_id ON scheduled_task_success(task_id)",
            "CREATE INDEX IF NOT EXISTS idx_scheduled_task_failure_task_id ON scheduled_task_failure(task_id)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("SQLite task store migrations completed");
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<PersistedTask> {
        Ok(PersistedTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            type_name: row.try_get("type_name")?,
            data: row.try_get("data")?,
            properties: row.try_get("properties")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
            creation_time: row.try_get::<DateTime<Utc>, _>("creation_time")?,
        })
    }

    /// 某个任务的执行历史条数（成功，失败）
    pub async fn history_count(&self, id: &str) -> SchedulerResult<(i64, i64)> {
        let successes: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_task_success WHERE task_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let failures: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_task_failure WHERE task_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok((successes, failures))
    }

    pub async fn get(&self, id: &str) -> SchedulerResult<Option<PersistedTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM scheduled_task WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }
}

fn offset(page: u32, limit: u32) -> i64 {
    (page as i64 - 1) * limit as i64
}

/// 区分大小写的名称前缀条件，需要绑定两次关键字
///
/// LIKE 对 ASCII 不区分大小写，这里按字符逐个比较。
const NAME_PREFIX: &str = "substr(name, 1, length(?)) = ?";

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task.id = %task.id))]
    async fn save_task(&self, task: &PersistedTask) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scheduled_task
                (id, name, type_name, data, properties, success_count, failure_count, creation_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.type_name)
        .bind(&task.data)
        .bind(&task.properties)
        .bind(task.success_count)
        .bind(task.failure_count)
        .bind(task.creation_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn take_tasks(&self, page: u32, limit: u32) -> SchedulerResult<Vec<PersistedTask>> {
        validate_paging(page, limit)?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_task ORDER BY creation_time, rowid LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset(page, limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn remove_task(&self, id: &str) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM scheduled_task_success WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM scheduled_task_failure WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM scheduled_task WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, task), fields(task.id = %task.id))]
    async fn update_task(&self, task: &PersistedTask) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_task
            SET name = ?, type_name = ?, data = ?, properties = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(&task.type_name)
        .bind(&task.data)
        .bind(&task.properties)
        .bind(&task.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn paged_query(
        &self,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> SchedulerResult<PagedResult<PersistedTask>> {
        validate_paging(page, limit)?;

        let (count, rows) = match keyword {
            Some(keyword) => {
                let count_sql = format!("SELECT COUNT(*) FROM scheduled_task WHERE {NAME_PREFIX}");
                let count: i64 = sqlx::query_scalar(&count_sql)
                    .bind(keyword)
                    .bind(keyword)
                    .fetch_one(&self.pool)
                    .await?;
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_task WHERE {NAME_PREFIX} \
                     ORDER BY creation_time, rowid LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query(&sql)
                    .bind(keyword)
                    .bind(keyword)
                    .bind(limit as i64)
                    .bind(offset(page, limit))
                    .fetch_all(&self.pool)
                    .await?;
                (count, rows)
            }
            None => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_task")
                    .fetch_one(&self.pool)
                    .await?;
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_task ORDER BY creation_time, rowid LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query(&sql)
                    .bind(limit as i64)
                    .bind(offset(page, limit))
                    .fetch_all(&self.pool)
                    .await?;
                (count, rows)
            }
        };

        let items = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(PagedResult::new(count as u64, page, limit, items))
    }
}

#[async_trait]
impl EventStore for SqliteTaskStore {
    #[instrument(skip(self, event), fields(task.id = %event.id))]
    async fn save_success(&self, event: &SuccessEvent) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO scheduled_task_success (task_id, type_name, duration_ms, creation_time) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.type_name)
        .bind(event.duration_ms as i64)
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE scheduled_task SET success_count = success_count + 1 WHERE id = ?")
            .bind(&event.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, event), fields(task.id = %event.id))]
    async fn save_failure(&self, event: &FailureEvent) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO scheduled_task_failure \
             (task_id, type_name, duration_ms, message, trace, creation_time) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.type_name)
        .bind(event.duration_ms as i64)
        .bind(&event.message)
        .bind(&event.trace)
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE scheduled_task SET failure_count = failure_count + 1 WHERE id = ?")
            .bind(&event.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
