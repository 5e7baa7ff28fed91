//! SQLite implementation of the engine's store boundary.

use crate::db::DbPool;
use crate::error::ProviderError;
use crate::models::{NewTaskList, TaskList};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, Transaction};
use tasks_core::duration::TaskDuration;
use tasks_core::models::{Instance, InstanceId, InstanceValues, ListId, Task, TaskId};
use tasks_core::store::InstanceStore;
use tasks_core::CoreError;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskRow {
    pub id: i64,
    pub list_id: i64,
    pub sync_id: Option<String>,
    pub title: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub tz: Option<String>,
    pub rrule: Option<String>,
    pub original_instance_sync_id: Option<String>,
    pub original_instance_id: Option<i64>,
    pub original_instance_time: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let duration = row.duration.as_deref().map(str::parse::<TaskDuration>).transpose()?;
        Ok(Task {
            id: TaskId(row.id),
            list_id: ListId(row.list_id),
            sync_id: row.sync_id,
            title: row.title,
            start: row.start_at,
            due: row.due_at,
            duration,
            timezone: row.tz,
            rrule: row.rrule,
            original_instance_sync_id: row.original_instance_sync_id,
            original_instance_id: row.original_instance_id.map(TaskId),
            original_instance_time: row.original_instance_time,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct InstanceRow {
    pub id: i64,
    pub task_id: i64,
    pub instance_start: Option<DateTime<Utc>>,
    pub instance_due: Option<DateTime<Utc>>,
    pub instance_duration: Option<i64>,
    pub tz: Option<String>,
    pub exception_task_id: Option<i64>,
}

impl From<InstanceRow> for Instance {
    fn from(row: InstanceRow) -> Self {
        Instance {
            id: InstanceId(row.id),
            task_id: TaskId(row.task_id),
            instance_start: row.instance_start,
            instance_due: row.instance_due,
            instance_duration: row.instance_duration,
            timezone: row.tz,
            exception_task_id: row.exception_task_id.map(TaskId),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskListRow {
    pub id: i64,
    pub name: String,
    pub visible: bool,
    pub sync_enabled: bool,
}

impl From<TaskListRow> for TaskList {
    fn from(row: TaskListRow) -> Self {
        TaskList {
            id: ListId(row.id),
            name: row.name,
            visible: row.visible,
            sync_enabled: row.sync_enabled,
        }
    }
}

pub(crate) fn tasks_from_rows(rows: Vec<TaskRow>) -> Result<Vec<Task>, CoreError> {
    rows.into_iter().map(Task::try_from).collect()
}

/// One open write transaction, exposed to the engine as an [`InstanceStore`]
/// and to the provider for task and list rows.
///
/// Dropping it without [`SqliteStore::commit`] rolls everything back.
pub struct SqliteStore {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteStore {
    pub async fn begin(pool: &DbPool) -> Result<Self, ProviderError> {
        Ok(Self { tx: pool.begin().await? })
    }

    pub async fn commit(self) -> Result<(), ProviderError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn insert_list(&mut self, data: &NewTaskList) -> Result<TaskList, ProviderError> {
        let row: TaskListRow = sqlx::query_as(
            "INSERT INTO task_lists (name, visible, sync_enabled) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&data.name)
        .bind(data.visible)
        .bind(data.sync_enabled)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    pub async fn find_list(&mut self, id: ListId) -> Result<Option<TaskList>, ProviderError> {
        let row: Option<TaskListRow> = sqlx::query_as("SELECT * FROM task_lists WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Inserts a task row and returns it as stored, with its new id.
    pub async fn insert_task_row(&mut self, task: &Task) -> Result<Task, ProviderError> {
        let row: TaskRow = sqlx::query_as(
            r#"INSERT INTO tasks (
                list_id, sync_id, title, start_at, due_at, duration, tz, rrule,
                original_instance_sync_id, original_instance_id, original_instance_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *"#,
        )
        .bind(task.list_id.0)
        .bind(&task.sync_id)
        .bind(&task.title)
        .bind(task.start)
        .bind(task.due)
        .bind(task.duration.map(|d| d.to_string()))
        .bind(&task.timezone)
        .bind(&task.rrule)
        .bind(&task.original_instance_sync_id)
        .bind(task.original_instance_id.map(|id| id.0))
        .bind(task.original_instance_time)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(Task::try_from(row)?)
    }

    /// Overwrites every column of an existing task row.
    pub async fn update_task_row(&mut self, task: &Task) -> Result<Task, ProviderError> {
        let row: TaskRow = sqlx::query_as(
            r#"UPDATE tasks SET
                list_id = $1, sync_id = $2, title = $3, start_at = $4, due_at = $5,
                duration = $6, tz = $7, rrule = $8, original_instance_sync_id = $9,
                original_instance_id = $10, original_instance_time = $11
            WHERE id = $12
            RETURNING *"#,
        )
        .bind(task.list_id.0)
        .bind(&task.sync_id)
        .bind(&task.title)
        .bind(task.start)
        .bind(task.due)
        .bind(task.duration.map(|d| d.to_string()))
        .bind(&task.timezone)
        .bind(&task.rrule)
        .bind(&task.original_instance_sync_id)
        .bind(task.original_instance_id.map(|id| id.0))
        .bind(task.original_instance_time)
        .bind(task.id.0)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("task {}", task.id)))?;
        Ok(Task::try_from(row)?)
    }

    pub async fn delete_task_row(&mut self, id: TaskId) -> Result<(), ProviderError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProviderError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn instances_for_task(&mut self, task_id: TaskId) -> Result<Vec<Instance>, CoreError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            "SELECT * FROM instances WHERE task_id = $1 ORDER BY COALESCE(instance_start, instance_due), id",
        )
        .bind(task_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(CoreError::store)?;
        Ok(rows.into_iter().map(Instance::from).collect())
    }

    async fn find_instance(&mut self, id: InstanceId) -> Result<Option<Instance>, CoreError> {
        let row: Option<InstanceRow> = sqlx::query_as("SELECT * FROM instances WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;
        Ok(row.map(Instance::from))
    }

    async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;
        row.map(Task::try_from).transpose()
    }

    async fn find_task_by_sync_id(&mut self, sync_id: &str) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE sync_id = $1 ORDER BY id LIMIT 1")
            .bind(sync_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;
        row.map(Task::try_from).transpose()
    }

    async fn find_overridden_instance(&mut self, exception_task_id: TaskId) -> Result<Option<Instance>, CoreError> {
        let row: Option<InstanceRow> = sqlx::query_as("SELECT * FROM instances WHERE exception_task_id = $1")
            .bind(exception_task_id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;
        Ok(row.map(Instance::from))
    }

    async fn insert_instance(&mut self, task_id: TaskId, values: &InstanceValues) -> Result<InstanceId, CoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO instances (task_id, instance_start, instance_due, instance_duration, tz)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id"#,
        )
        .bind(task_id.0)
        .bind(values.start)
        .bind(values.due)
        .bind(values.duration_ms)
        .bind(&values.timezone)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(CoreError::store)?;
        Ok(InstanceId(id))
    }

    async fn update_instance(&mut self, id: InstanceId, values: &InstanceValues) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE instances
            SET instance_start = $1, instance_due = $2, instance_duration = $3, tz = $4
            WHERE id = $5"#,
        )
        .bind(values.start)
        .bind(values.due)
        .bind(values.duration_ms)
        .bind(&values.timezone)
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(CoreError::store)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("instance {}", id)));
        }
        Ok(())
    }

    async fn delete_instance(&mut self, id: InstanceId) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("instance {}", id)));
        }
        Ok(())
    }

    async fn set_exception(&mut self, id: InstanceId, exception_task_id: Option<TaskId>) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE instances SET exception_task_id = $1 WHERE id = $2")
            .bind(exception_task_id.map(|t| t.0))
            .bind(id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(CoreError::store)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("instance {}", id)));
        }
        Ok(())
    }
}
