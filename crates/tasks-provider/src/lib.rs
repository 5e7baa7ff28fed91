//! # Tasks Provider
//!
//! A SQLite-backed task store that keeps every task's instances materialized
//! through [`tasks_core`]. Each task insert, update and delete writes the task
//! row, runs the matching engine hook and applies the resulting plan in one
//! transaction.
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`repository`]: Task, list and instance repositories over [`repository::TaskProvider`]
//! - [`store`]: The engine's store boundary over an open SQLite transaction
//! - [`config`]: Layered configuration (TOML file + environment)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tasks_core::engine::MaterializationEngine;
//! use tasks_provider::{
//!     config::ProviderConfig, db,
//!     models::{NewTask, NewTaskList},
//!     repository::{InstanceRepository, ListRepository, TaskProvider, TaskRepository},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProviderConfig::new()?;
//!     let pool = db::establish_connection(&config.database_path).await?;
//!     let provider = TaskProvider::new(pool, MaterializationEngine::new(config.materialization));
//!
//!     let list = provider.create_list(NewTaskList::named("Personal")).await?;
//!     let task = provider
//!         .insert_task(NewTask {
//!             list_id: Some(list.id),
//!             title: Some("Water the plants".to_string()),
//!             start: Some(chrono::Utc::now()),
//!             rrule: Some("FREQ=WEEKLY;COUNT=4".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     println!("{} instances", provider.instances_for_task(task.id).await?.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod store;

pub use error::ProviderError;
