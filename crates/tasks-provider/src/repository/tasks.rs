use crate::error::ProviderError;
use crate::models::{NewTask, UpdateTask};
use crate::repository::TaskProvider;
use crate::store::{tasks_from_rows, SqliteStore, TaskRow};
use async_trait::async_trait;
use tasks_core::models::{ListId, Task, TaskId};
use tasks_core::store::{apply_plan, InstanceStore};
use tracing::{debug, info};

#[async_trait]
impl super::TaskRepository for TaskProvider {
    async fn insert_task(&self, data: NewTask) -> Result<Task, ProviderError> {
        let list_id = data
            .list_id
            .ok_or_else(|| ProviderError::InvalidInput("list_id is required".to_string()))?;

        // Reject malformed rows before touching the database
        self.engine().validate(&data.to_task(list_id))?;

        let mut store = SqliteStore::begin(self.pool()).await?;
        Self::ensure_list_in_transaction(&mut store, list_id).await?;

        let task = store.insert_task_row(&data.to_task(list_id)).await?;
        let plan = self.engine().on_task_inserted(&mut store, &task, &self.horizon()).await?;
        apply_plan(&mut store, &plan).await?;
        store.commit().await?;

        info!(task_id = %task.id, %list_id, instances = plan.inserts(), "insert_task: committed");
        Ok(task)
    }

    async fn update_task(&self, id: TaskId, data: UpdateTask) -> Result<Task, ProviderError> {
        let mut store = SqliteStore::begin(self.pool()).await?;

        let old = store
            .find_task(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("task {}", id)))?;
        let merged = data.apply_to(&old);
        self.engine().validate(&merged)?;
        if merged.list_id != old.list_id {
            Self::ensure_list_in_transaction(&mut store, merged.list_id).await?;
        }

        let new = store.update_task_row(&merged).await?;
        let plan = self.engine().on_task_updated(&mut store, &old, &new, &self.horizon()).await?;
        apply_plan(&mut store, &plan).await?;
        store.commit().await?;

        info!(task_id = %id, operations = plan.len(), "update_task: committed");
        Ok(new)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), ProviderError> {
        let mut store = SqliteStore::begin(self.pool()).await?;

        let task = store
            .find_task(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("task {}", id)))?;

        // Exceptions overriding this task's instances go with it
        let linked: Vec<TaskId> = store
            .instances_for_task(id)
            .await?
            .iter()
            .filter_map(|instance| instance.exception_task_id)
            .collect();

        let plan = self.engine().on_task_deleted(&mut store, &task).await?;
        apply_plan(&mut store, &plan).await?;

        for exception_id in &linked {
            if let Some(exception) = store.find_task(*exception_id).await? {
                let plan = self.engine().on_task_deleted(&mut store, &exception).await?;
                apply_plan(&mut store, &plan).await?;
                store.delete_task_row(exception.id).await?;
                debug!(task_id = %id, exception = %exception.id, "delete_task: cascaded to exception");
            }
        }

        store.delete_task_row(id).await?;
        store.commit().await?;

        info!(task_id = %id, instances = plan.deletes(), exceptions = linked.len(), "delete_task: committed");
        Ok(())
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, ProviderError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Task::try_from).transpose()?)
    }

    async fn tasks_in_list(&self, list_id: ListId) -> Result<Vec<Task>, ProviderError> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE list_id = $1 ORDER BY id")
            .bind(list_id.0)
            .fetch_all(self.pool())
            .await?;
        Ok(tasks_from_rows(rows)?)
    }

    async fn count_tasks(&self) -> Result<i64, ProviderError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}

impl TaskProvider {
    async fn ensure_list_in_transaction(store: &mut SqliteStore, list_id: ListId) -> Result<(), ProviderError> {
        match store.find_list(list_id).await? {
            Some(_) => Ok(()),
            None => Err(ProviderError::InvalidInput(format!("task list {} does not exist", list_id))),
        }
    }
}
