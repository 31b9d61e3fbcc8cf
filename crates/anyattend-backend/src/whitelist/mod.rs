//! Per-owner whitelist, incoming connection requests, and ACL sync.

pub mod acl_sync;
pub mod entries;
pub mod requests;

pub use acl_sync::{AclSync, AclSyncReport};
pub use entries::WhitelistService;
pub use requests::{
    ConnectionRequestService, Decision, DecisionReceipt, RequestFilter, SubmitOutcome,
};
