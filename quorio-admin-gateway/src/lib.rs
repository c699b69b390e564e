//! Quorio admin gateway - HTTP surfaces of the control plane
//!
//! - the signed admin endpoint table (`/quorio/admin/v1`)
//! - the internal peer RPC surface served to other nodes

pub mod auth;
pub mod error;
pub mod router;
pub mod rpc;
pub mod selector;
pub mod xml;

#[cfg(test)]
mod testing;

pub use error::{ApiError, RpcError};
pub use router::{ADMIN_PATH, AdminState, admin_router};
pub use rpc::peer_router;
pub use selector::{AdminOperation, OPERATION_HEADER};
