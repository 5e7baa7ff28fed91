use crate::error::ProviderError;
use crate::models::{NewTask, UpdateTask};
use crate::repository::TaskRepository;
use async_trait::async_trait;
use tasks_core::models::{ListId, Task, TaskId};

/// A [`TaskRepository`] decorator confined to one task list.
///
/// Inserts are pinned to the list; reads, updates and deletes of tasks outside
/// it behave as if those tasks did not exist. Scopes compose by wrapping one
/// another.
#[derive(Debug)]
pub struct ListScoped<'a, R: ?Sized> {
    inner: &'a R,
    list_id: ListId,
}

impl<'a, R: TaskRepository + ?Sized> ListScoped<'a, R> {
    pub fn new(inner: &'a R, list_id: ListId) -> Self {
        Self { inner, list_id }
    }

    pub fn list_id(&self) -> ListId {
        self.list_id
    }

    fn check_list(&self, requested: Option<ListId>) -> Result<(), ProviderError> {
        match requested {
            Some(other) if other != self.list_id => Err(ProviderError::InvalidInput(format!(
                "list {} is outside the scope of list {}",
                other, self.list_id
            ))),
            _ => Ok(()),
        }
    }

    async fn owned(&self, id: TaskId) -> Result<Task, ProviderError> {
        self.inner
            .find_task(id)
            .await?
            .filter(|task| task.list_id == self.list_id)
            .ok_or_else(|| ProviderError::NotFound(format!("task {} in list {}", id, self.list_id)))
    }
}

#[async_trait]
impl<'a, R: TaskRepository + ?Sized> TaskRepository for ListScoped<'a, R> {
    async fn insert_task(&self, mut data: NewTask) -> Result<Task, ProviderError> {
        self.check_list(data.list_id)?;
        data.list_id = Some(self.list_id);
        self.inner.insert_task(data).await
    }

    async fn update_task(&self, id: TaskId, data: UpdateTask) -> Result<Task, ProviderError> {
        self.check_list(data.list_id)?;
        self.owned(id).await?;
        self.inner.update_task(id, data).await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), ProviderError> {
        self.owned(id).await?;
        self.inner.delete_task(id).await
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, ProviderError> {
        Ok(self.inner.find_task(id).await?.filter(|task| task.list_id == self.list_id))
    }

    async fn tasks_in_list(&self, list_id: ListId) -> Result<Vec<Task>, ProviderError> {
        if list_id != self.list_id {
            return Ok(Vec::new());
        }
        self.inner.tasks_in_list(list_id).await
    }

    async fn count_tasks(&self) -> Result<i64, ProviderError> {
        Ok(self.inner.tasks_in_list(self.list_id).await?.len() as i64)
    }
}
