//! The store boundary: what the engine needs from whatever persists tasks
//! and instances.

use crate::error::CoreError;
use crate::models::{Instance, InstanceId, InstanceValues, Task, TaskId};
use crate::reconcile::{Operation, OperationPlan};
use async_trait::async_trait;
use tracing::debug;

/// Read/write access to task and instance rows within one open transaction.
///
/// Implementations are handed to the engine explicitly for the duration of a
/// single task mutation; everything done through them commits or rolls back
/// together with the task write.
#[async_trait]
pub trait InstanceStore: Send {
    async fn instances_for_task(&mut self, task_id: TaskId) -> Result<Vec<Instance>, CoreError>;
    async fn find_instance(&mut self, id: InstanceId) -> Result<Option<Instance>, CoreError>;
    async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, CoreError>;
    async fn find_task_by_sync_id(&mut self, sync_id: &str) -> Result<Option<Task>, CoreError>;
    /// The instance currently overridden by `exception_task_id`, if any.
    async fn find_overridden_instance(&mut self, exception_task_id: TaskId) -> Result<Option<Instance>, CoreError>;
    async fn insert_instance(&mut self, task_id: TaskId, values: &InstanceValues) -> Result<InstanceId, CoreError>;
    async fn update_instance(&mut self, id: InstanceId, values: &InstanceValues) -> Result<(), CoreError>;
    async fn delete_instance(&mut self, id: InstanceId) -> Result<(), CoreError>;
    async fn set_exception(&mut self, id: InstanceId, exception_task_id: Option<TaskId>) -> Result<(), CoreError>;
}

/// Applies a plan in order. Returns the ids of inserted instances.
pub async fn apply_plan<S>(store: &mut S, plan: &OperationPlan) -> Result<Vec<InstanceId>, CoreError>
where
    S: InstanceStore + ?Sized,
{
    let mut inserted = Vec::with_capacity(plan.inserts());
    for operation in plan {
        match operation {
            Operation::Insert { task_id, values } => inserted.push(store.insert_instance(*task_id, values).await?),
            Operation::Update { instance_id, values } => store.update_instance(*instance_id, values).await?,
            Operation::Delete { instance_id } => store.delete_instance(*instance_id).await?,
            Operation::LinkException { instance_id, exception_task_id } => {
                store.set_exception(*instance_id, Some(*exception_task_id)).await?
            }
            Operation::UnlinkException { instance_id } => store.set_exception(*instance_id, None).await?,
        }
    }
    debug!(operations = plan.len(), inserted = inserted.len(), "apply_plan: applied");
    Ok(inserted)
}

#[cfg(test)]
pub(crate) mod memory {
    //! A plain in-memory store for engine unit tests.

    use super::*;

    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub tasks: Vec<Task>,
        pub instances: Vec<Instance>,
        pub writes: usize,
        next_instance: i64,
    }

    impl MemoryStore {
        pub fn with_tasks(tasks: Vec<Task>) -> Self {
            Self { tasks, ..Default::default() }
        }

        pub fn instances_of(&self, task_id: TaskId) -> Vec<&Instance> {
            self.instances.iter().filter(|i| i.task_id == task_id).collect()
        }

        fn row(&mut self, id: InstanceId) -> Result<&mut Instance, CoreError> {
            self.instances
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| CoreError::NotFound(format!("instance {}", id)))
        }
    }

    #[async_trait]
    impl InstanceStore for MemoryStore {
        async fn instances_for_task(&mut self, task_id: TaskId) -> Result<Vec<Instance>, CoreError> {
            Ok(self.instances_of(task_id).into_iter().cloned().collect())
        }

        async fn find_instance(&mut self, id: InstanceId) -> Result<Option<Instance>, CoreError> {
            Ok(self.instances.iter().find(|i| i.id == id).cloned())
        }

        async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, CoreError> {
            Ok(self.tasks.iter().find(|t| t.id == id).cloned())
        }

        async fn find_task_by_sync_id(&mut self, sync_id: &str) -> Result<Option<Task>, CoreError> {
            Ok(self.tasks.iter().find(|t| t.sync_id.as_deref() == Some(sync_id)).cloned())
        }

        async fn find_overridden_instance(&mut self, exception_task_id: TaskId) -> Result<Option<Instance>, CoreError> {
            Ok(self.instances.iter().find(|i| i.exception_task_id == Some(exception_task_id)).cloned())
        }

        async fn insert_instance(&mut self, task_id: TaskId, values: &InstanceValues) -> Result<InstanceId, CoreError> {
            self.writes += 1;
            self.next_instance += 1;
            let id = InstanceId(self.next_instance);
            self.instances.push(Instance {
                id,
                task_id,
                instance_start: values.start,
                instance_due: values.due,
                instance_duration: values.duration_ms,
                timezone: values.timezone.clone(),
                exception_task_id: None,
            });
            Ok(id)
        }

        async fn update_instance(&mut self, id: InstanceId, values: &InstanceValues) -> Result<(), CoreError> {
            self.writes += 1;
            let row = self.row(id)?;
            row.instance_start = values.start;
            row.instance_due = values.due;
            row.instance_duration = values.duration_ms;
            row.timezone = values.timezone.clone();
            Ok(())
        }

        async fn delete_instance(&mut self, id: InstanceId) -> Result<(), CoreError> {
            self.writes += 1;
            self.instances.retain(|i| i.id != id);
            Ok(())
        }

        async fn set_exception(&mut self, id: InstanceId, exception_task_id: Option<TaskId>) -> Result<(), CoreError> {
            self.writes += 1;
            self.row(id)?.exception_task_id = exception_task_id;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_apply_plan_in_order() {
        tokio_test::block_on(async {
            let mut store = MemoryStore::default();
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let values = InstanceValues { start: Some(start), due: None, duration_ms: None, timezone: None };

            let mut plan = OperationPlan::new();
            plan.push(Operation::Insert { task_id: TaskId(1), values: values.clone() });
            let inserted = apply_plan(&mut store, &plan).await.unwrap();
            assert_eq!(inserted.len(), 1);

            let mut plan = OperationPlan::new();
            plan.push(Operation::LinkException { instance_id: inserted[0], exception_task_id: TaskId(2) });
            apply_plan(&mut store, &plan).await.unwrap();
            let linked = store.find_overridden_instance(TaskId(2)).await.unwrap().unwrap();
            assert_eq!(linked.id, inserted[0]);

            let mut plan = OperationPlan::new();
            plan.push(Operation::UnlinkException { instance_id: inserted[0] });
            plan.push(Operation::Delete { instance_id: inserted[0] });
            apply_plan(&mut store, &plan).await.unwrap();
            assert!(store.instances.is_empty());
        });
    }

    #[test]
    fn test_apply_plan_stops_on_first_error() {
        tokio_test::block_on(async {
            let mut store = MemoryStore::default();
            let mut plan = OperationPlan::new();
            plan.push(Operation::UnlinkException { instance_id: InstanceId(42) });
            plan.push(Operation::Delete { instance_id: InstanceId(42) });

            let result = apply_plan(&mut store, &plan).await;
            assert!(matches!(result, Err(CoreError::NotFound(_))));
            assert_eq!(store.writes, 1);
        });
    }
}
