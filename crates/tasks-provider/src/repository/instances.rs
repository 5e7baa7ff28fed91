use crate::error::ProviderError;
use crate::repository::{InstanceRepository, TaskProvider};
use crate::store::{tasks_from_rows, InstanceRow, SqliteStore, TaskRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasks_core::models::{Instance, ListId, TaskId};
use tasks_core::reconcile::OperationPlan;
use tasks_core::store::{apply_plan, InstanceStore};
use tracing::{debug, info};

#[async_trait]
impl InstanceRepository for TaskProvider {
    async fn instances_for_task(&self, task_id: TaskId) -> Result<Vec<Instance>, ProviderError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            "SELECT * FROM instances WHERE task_id = $1 ORDER BY COALESCE(instance_start, instance_due), id",
        )
        .bind(task_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Instance::from).collect())
    }

    async fn visible_instances_for_task(&self, task_id: TaskId) -> Result<Vec<Instance>, ProviderError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            r#"SELECT * FROM instances
            WHERE task_id = $1 AND exception_task_id IS NULL
            ORDER BY COALESCE(instance_start, instance_due), id"#,
        )
        .bind(task_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Instance::from).collect())
    }

    async fn visible_instances_in_list(&self, list_id: ListId) -> Result<Vec<Instance>, ProviderError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            r#"SELECT i.* FROM instances i
            INNER JOIN tasks t ON t.id = i.task_id
            WHERE t.list_id = $1 AND i.exception_task_id IS NULL
            ORDER BY COALESCE(i.instance_start, i.instance_due), i.id"#,
        )
        .bind(list_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Instance::from).collect())
    }

    async fn count_instances(&self) -> Result<i64, ProviderError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    async fn refresh_instances_at(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<OperationPlan, ProviderError> {
        let mut store = SqliteStore::begin(self.pool()).await?;

        let task = store
            .find_task(task_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("task {}", task_id)))?;

        let horizon = self.engine().horizon_at(now);
        let plan = self.engine().on_task_updated(&mut store, &task, &task, &horizon).await?;
        apply_plan(&mut store, &plan).await?;
        store.commit().await?;

        debug!(%task_id, operations = plan.len(), until = %horizon.until, "refresh_instances: committed");
        Ok(plan)
    }

    async fn refresh_all_instances_at(&self, now: DateTime<Utc>) -> Result<usize, ProviderError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT * FROM tasks
            WHERE rrule IS NOT NULL
            AND original_instance_id IS NULL
            AND original_instance_sync_id IS NULL
            ORDER BY id"#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut writes = 0;
        for task in tasks_from_rows(rows)? {
            writes += self.refresh_instances_at(task.id, now).await?.len();
        }

        info!(writes, "refresh_all_instances: done");
        Ok(writes)
    }
}
