//! YAML configuration: types, parsing and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use types::{
    Backend, BonusSystemConfig, DeliverySystemConfig, OrderSystemConfig, PipelineOverride,
    SettleConfig, SourcesConfig, WarehouseConfig,
};
