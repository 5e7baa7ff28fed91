//! # Tasks Core Library
//!
//! The task-instance materialization engine: derives the concrete instances of
//! a (possibly recurring) task and keeps them consistent as the task changes.
//!
//! ## Features
//!
//! - **Time Resolution**: Normalizes start, due, duration and timezone into one
//!   canonical shape, with all arithmetic in absolute-instant space
//! - **Recurrence Expansion**: Lazy, horizon-bounded occurrence sequences over
//!   RFC 5545 rules, DST-aware for named zones
//! - **Instance Reconciliation**: Minimal insert/update/delete plans against the
//!   instances already stored
//! - **Exception Linking**: One-off overrides resolved by sync id or task id and
//!   flagged on the instance they replace
//!
//! ## Core Modules
//!
//! - [`time`]: Time resolution and timezone validation
//! - [`occurrence`]: Occurrence generation and the rule expansion capability
//! - [`reconcile`]: Operation plans and the instance reconciler
//! - [`exception`]: Exception resolution and release
//! - [`store`]: The store boundary the engine reads and writes through
//! - [`engine`]: Mutation hooks tying the pipeline together
//! - [`error`]: Error taxonomy
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tasks_core::{
//!     engine::MaterializationEngine, config::EngineConfig, models::Task,
//!     store::{apply_plan, InstanceStore},
//! };
//!
//! async fn after_insert<S: InstanceStore>(store: &mut S, task: &Task) -> Result<(), tasks_core::CoreError> {
//!     let engine = MaterializationEngine::new(EngineConfig::default());
//!     let horizon = engine.horizon_at(chrono::Utc::now());
//!
//!     // Plan inside the caller's transaction, then apply through the same handle
//!     let plan = engine.on_task_inserted(store, task, &horizon).await?;
//!     apply_plan(store, &plan).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod exception;
pub mod models;
pub mod occurrence;
pub mod reconcile;
pub mod store;
pub mod time;

pub use error::CoreError;
