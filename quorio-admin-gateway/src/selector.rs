//! Maps an admin request onto exactly one operation.
//!
//! The operation is selected by the query key naming the resource
//! (`service`, `server-info`, `lock`, `heal`, `config`), the HTTP method and
//! the `x-quorio-operation` header.

use axum::http::Method;
use quorio_core::{QuorioError, Result};
use std::collections::HashMap;

pub use quorio_core::OPERATION_HEADER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOperation {
    ServiceStatus,
    ServiceRestart,
    SetCredentials,
    ServerInfo,
    ListLocks,
    ClearLocks,
    ListObjectsHeal,
    ListBucketsHeal,
    HealBucket,
    HealObject,
    HealFormat,
    GetConfig,
    SetConfig,
}

impl AdminOperation {
    pub fn parse(
        method: &Method,
        query: &HashMap<String, String>,
        operation: Option<&str>,
    ) -> Result<Self> {
        let resource = ["service", "server-info", "lock", "heal", "config"]
            .into_iter()
            .find(|key| query.contains_key(*key))
            .ok_or_else(|| QuorioError::NotImplemented("unknown admin resource".to_string()))?;

        let selected = match (resource, method.as_str(), operation.unwrap_or_default()) {
            ("service", "GET", "status") => Some(AdminOperation::ServiceStatus),
            ("service", "POST", "restart") => Some(AdminOperation::ServiceRestart),
            ("service", "POST", "creds") => Some(AdminOperation::SetCredentials),
            ("server-info", "GET", _) => Some(AdminOperation::ServerInfo),
            ("lock", "GET", "list") => Some(AdminOperation::ListLocks),
            ("lock", "POST", "clear") => Some(AdminOperation::ClearLocks),
            ("heal", "GET", _) if query.contains_key("bucket") => {
                Some(AdminOperation::ListObjectsHeal)
            }
            ("heal", "GET", _) => Some(AdminOperation::ListBucketsHeal),
            ("heal", "POST", "bucket") => Some(AdminOperation::HealBucket),
            ("heal", "POST", "object") => Some(AdminOperation::HealObject),
            ("heal", "POST", "format") => Some(AdminOperation::HealFormat),
            ("config", "GET", "get") => Some(AdminOperation::GetConfig),
            ("config", "PUT", "set") => Some(AdminOperation::SetConfig),
            _ => None,
        };

        selected.ok_or_else(|| {
            QuorioError::MethodNotAllowed(format!(
                "{} {} with operation {:?}",
                method,
                resource,
                operation.unwrap_or_default()
            ))
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminOperation::ServiceStatus => "service-status",
            AdminOperation::ServiceRestart => "service-restart",
            AdminOperation::SetCredentials => "set-credentials",
            AdminOperation::ServerInfo => "server-info",
            AdminOperation::ListLocks => "list-locks",
            AdminOperation::ClearLocks => "clear-locks",
            AdminOperation::ListObjectsHeal => "list-objects-heal",
            AdminOperation::ListBucketsHeal => "list-buckets-heal",
            AdminOperation::HealBucket => "heal-bucket",
            AdminOperation::HealObject => "heal-object",
            AdminOperation::HealFormat => "heal-format",
            AdminOperation::GetConfig => "get-config",
            AdminOperation::SetConfig => "set-config",
        }
    }
}
