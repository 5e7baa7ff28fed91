use crate::error::ProviderError;
use crate::models::{NewTaskList, TaskList};
use crate::repository::TaskProvider;
use crate::store::{SqliteStore, TaskListRow};
use async_trait::async_trait;
use tasks_core::models::ListId;

#[async_trait]
impl super::ListRepository for TaskProvider {
    async fn create_list(&self, data: NewTaskList) -> Result<TaskList, ProviderError> {
        if data.name.trim().is_empty() {
            return Err(ProviderError::InvalidInput("task list name cannot be empty".to_string()));
        }

        let mut store = SqliteStore::begin(self.pool()).await?;
        let list = store.insert_list(&data).await?;
        store.commit().await?;
        Ok(list)
    }

    async fn find_list(&self, id: ListId) -> Result<Option<TaskList>, ProviderError> {
        let row: Option<TaskListRow> = sqlx::query_as("SELECT * FROM task_lists WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_lists(&self) -> Result<Vec<TaskList>, ProviderError> {
        let rows: Vec<TaskListRow> = sqlx::query_as("SELECT * FROM task_lists ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
