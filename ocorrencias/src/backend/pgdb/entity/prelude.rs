//! 预导入模块
//! Prelude module

pub use super::admin_errors::Entity as AdminErrors;
pub use super::carrier_code_mappings::Entity as CarrierCodeMappings;
pub use super::execution_records::Entity as ExecutionRecords;
pub use super::jobs::Entity as Jobs;
pub use super::locks::Entity as Locks;
pub use super::occurrences::Entity as Occurrences;
pub use super::repeatables::Entity as Repeatables;
pub use super::schedules::Entity as Schedules;
pub use super::shipments::Entity as Shipments;
