//! The settlement warehouse: schema, pipelines, configuration and
//! orchestration.
//!
//! Staging pipelines copy the loyalty database, the order-system documents
//! and the delivery API into `stg`; dimensional pipelines shape them into
//! `dds`; mart pipelines aggregate the restaurant settlement report and the
//! courier ledger into `cdm`.

#![warn(clippy::pedantic)]

pub mod catalog;
pub mod config;
pub mod connectors;
pub mod orchestrator;
pub mod pipelines;
pub mod schema;

pub use config::SettleConfig;
pub use orchestrator::{Orchestrator, PipelineStatus, RoundReport, StoredCheckpoint};
