pub mod config_commit;
pub mod heal;
pub mod lock_inventory;
pub mod service_control;
pub mod status;

pub use config_commit::{ConfigCommitProtocol, FailedPhase, NodeSummary, SetConfigResult};
pub use heal::{HealOrchestrator, HealOutcome, HealRequest, HealTask, ListObjectsHealRequest};
pub use lock_inventory::LockInventoryService;
pub use service_control::{ServiceControl, spawn_service_broadcast};
pub use status::{
    ConnStats, NetworkStats, ServerInfo, ServerProperties, ServerVersion, ServiceStatus,
    StatusAggregator,
};
