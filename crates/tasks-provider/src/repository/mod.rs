use crate::db::DbPool;
use crate::error::ProviderError;
use crate::models::{NewTask, NewTaskList, TaskList, UpdateTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasks_core::engine::MaterializationEngine;
use tasks_core::models::{Instance, ListId, Task, TaskId};
use tasks_core::occurrence::Horizon;
use tasks_core::reconcile::OperationPlan;

// Re-export domain modules
pub mod instances;
pub mod lists;
pub mod scoped;
pub mod tasks;

pub use scoped::ListScoped;

/// Domain-specific trait for task operations
///
/// Every write runs through the materialization engine inside the same
/// transaction as the task row; a rejected write leaves no trace.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&self, data: NewTask) -> Result<Task, ProviderError>;
    async fn update_task(&self, id: TaskId, data: UpdateTask) -> Result<Task, ProviderError>;
    async fn delete_task(&self, id: TaskId) -> Result<(), ProviderError>;
    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, ProviderError>;
    async fn tasks_in_list(&self, list_id: ListId) -> Result<Vec<Task>, ProviderError>;
    async fn count_tasks(&self) -> Result<i64, ProviderError>;
}

/// Domain-specific trait for task list operations
#[async_trait]
pub trait ListRepository: Send + Sync {
    async fn create_list(&self, data: NewTaskList) -> Result<TaskList, ProviderError>;
    async fn find_list(&self, id: ListId) -> Result<Option<TaskList>, ProviderError>;
    async fn find_lists(&self) -> Result<Vec<TaskList>, ProviderError>;
}

/// Domain-specific trait for reading and refreshing materialized instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn instances_for_task(&self, task_id: TaskId) -> Result<Vec<Instance>, ProviderError>;
    /// Instances not overridden by an exception, in occurrence order.
    async fn visible_instances_for_task(&self, task_id: TaskId) -> Result<Vec<Instance>, ProviderError>;
    /// Visible instances of every task in a list, in occurrence order.
    async fn visible_instances_in_list(&self, list_id: ListId) -> Result<Vec<Instance>, ProviderError>;
    async fn count_instances(&self) -> Result<i64, ProviderError>;
    /// Re-derives a task's instances against the horizon as of `now`.
    async fn refresh_instances_at(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<OperationPlan, ProviderError>;
    /// Refreshes every recurring task; returns the number of writes applied.
    async fn refresh_all_instances_at(&self, now: DateTime<Utc>) -> Result<usize, ProviderError>;

    async fn refresh_instances(&self, task_id: TaskId) -> Result<OperationPlan, ProviderError> {
        self.refresh_instances_at(task_id, Utc::now()).await
    }
}

/// SQLite-backed task provider
pub struct TaskProvider {
    pool: DbPool,
    engine: MaterializationEngine,
}

impl TaskProvider {
    pub fn new(pool: DbPool, engine: MaterializationEngine) -> Self {
        Self { pool, engine }
    }

    /// A writer that pins every task it touches to `list_id`.
    pub fn in_list(&self, list_id: ListId) -> ListScoped<'_, Self> {
        ListScoped::new(self, list_id)
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn engine(&self) -> &MaterializationEngine {
        &self.engine
    }

    pub(crate) fn horizon(&self) -> Horizon {
        self.engine.horizon_at(Utc::now())
    }
}
