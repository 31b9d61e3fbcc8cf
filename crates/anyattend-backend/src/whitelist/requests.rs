//! Incoming connection requests.
//!
//! A requester asks an owner for access; the owner approves or declines
//! while the request is still open. Approval whitelists the requester and
//! triggers an ACL sync.

use std::sync::Arc;

use anyattend_core::BackendConfig;
use anyattend_core::db::unix_timestamp;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::acl_sync::{AclSync, AclSyncReport};
use super::entries::{MAX_LABEL_LEN, optional_text};
use crate::auth::AdminPrincipal;
use crate::error::{Result, ServiceError};
use crate::events::{EventLog, OwnerNotification};
use crate::identity::normalize;
use crate::storage::{
    BackendDatabase, ConnectionRequest, NewConnectionRequest, RequestStatus, WhitelistEntry,
};
use crate::telemetry::{ProtocolCounter, record};

pub const MAX_NOTE_LEN: usize = 240;
/// Largest page `list` will return.
pub const MAX_REQUEST_PAGE: i64 = 200;

/// Result of submitting a request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The requester already holds an active whitelist entry.
    AlreadyWhitelisted,
    /// A new pending request was stored.
    Created { request: ConnectionRequest },
    /// An open request from the same requester already exists.
    Existing { request: ConnectionRequest },
}

/// What the owner decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

impl Decision {
    const fn outcome(self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Decline => RequestStatus::Declined,
        }
    }
}

/// Result of a decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionReceipt {
    pub request: ConnectionRequest,
    /// The entry created or reactivated by an approval.
    pub whitelist_entry: Option<WhitelistEntry>,
    /// Absent on decline, or when recording the sync failed.
    pub acl_sync: Option<AclSyncReport>,
}

/// Which stored statuses `list` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    Status(RequestStatus),
    All,
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self::Status(RequestStatus::Pending)
    }
}

/// Fail with the distinct error for a request that can no longer be decided.
fn check_request_open(request: &ConnectionRequest, now: i64) -> Result<()> {
    if request.status != RequestStatus::Pending.as_str() {
        return Err(ServiceError::Conflict(format!(
            "Request already {}",
            request.status
        )));
    }
    if now >= request.expires_at {
        return Err(ServiceError::Expired("Request expired".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ConnectionRequestService {
    db: BackendDatabase,
    events: EventLog,
    acl: AclSync,
    config: Arc<BackendConfig>,
}

impl ConnectionRequestService {
    pub const fn new(
        db: BackendDatabase,
        events: EventLog,
        acl: AclSync,
        config: Arc<BackendConfig>,
    ) -> Self {
        Self {
            db,
            events,
            acl,
            config,
        }
    }

    /// Ask `owner_raw_id` to let `requester_raw_id` connect.
    ///
    /// Unauthenticated. Fails with `NotFound` if the owner ID has never been
    /// registered.
    #[instrument(skip(self, requester_label, note))]
    pub async fn submit(
        &self,
        owner_raw_id: &str,
        requester_raw_id: &str,
        requester_label: Option<&str>,
        note: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let requester_label = optional_text("requester_label", requester_label, MAX_LABEL_LEN)?;
        let note = optional_text("note", note, MAX_NOTE_LEN)?;
        let owner_id = normalize(owner_raw_id)?;
        let requester = normalize(requester_raw_id)?;

        let owner = self
            .db
            .get_identity_by_canonical(&owner_id.canonical)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Owner {}", owner_id.canonical)))?;

        if self
            .db
            .find_active_whitelist_entry(&owner.id, &requester.canonical)
            .await?
            .is_some()
        {
            return Ok(SubmitOutcome::AlreadyWhitelisted);
        }

        let now = unix_timestamp();
        if let Some(request) = self
            .db
            .find_open_connection_request(&owner.id, &requester.canonical, now)
            .await?
        {
            return Ok(SubmitOutcome::Existing { request });
        }

        let request = self
            .db
            .create_connection_request(
                &NewConnectionRequest {
                    id: &uuid::Uuid::new_v4().to_string(),
                    owner_identity_id: &owner.id,
                    requester_canonical_id: &requester.canonical,
                    requester_display_id: &requester.display,
                    requester_label,
                    note,
                    expires_at: now + self.config.connection_request_ttl_secs(),
                },
                now,
            )
            .await?;

        self.events
            .notify_owner(OwnerNotification {
                owner_identity_id: owner.id.clone(),
                device_id: None,
                event_type: "incoming_request".to_string(),
                title: "Incoming AnyDesk Request".to_string(),
                body: format!("{} requested access", requester.display),
            })
            .await;

        record(ProtocolCounter::ConnectionRequests, 1, "submitted");
        info!(request_id = %request.id, owner = %owner.id, "Connection request submitted");
        Ok(SubmitOutcome::Created { request })
    }

    /// The principal's requests, newest first, at most `MAX_REQUEST_PAGE`.
    pub async fn list(
        &self,
        principal: &AdminPrincipal,
        filter: RequestFilter,
    ) -> Result<Vec<ConnectionRequest>> {
        let status = match filter {
            RequestFilter::Status(status) => Some(status),
            RequestFilter::All => None,
        };
        Ok(self
            .db
            .list_connection_requests(&principal.identity_id, status, MAX_REQUEST_PAGE)
            .await?)
    }

    /// Approve or decline one of the principal's requests.
    ///
    /// Fails with `NotFound` for an unknown or foreign request, `Conflict`
    /// once it has been decided, and `Expired` (recording the expiry) once
    /// its window has passed. Of several concurrent decisions exactly one
    /// succeeds.
    #[instrument(skip(self, principal, note), fields(owner = %principal.identity_id))]
    pub async fn decide(
        &self,
        principal: &AdminPrincipal,
        request_id: &str,
        decision: Decision,
        note: Option<&str>,
    ) -> Result<DecisionReceipt> {
        let note = optional_text("decision_note", note, MAX_NOTE_LEN)?;
        let owned = |r: &ConnectionRequest| r.owner_identity_id == principal.identity_id;

        let request = self
            .db
            .get_connection_request(request_id)
            .await?
            .filter(owned)
            .ok_or_else(|| ServiceError::NotFound(format!("Request {request_id}")))?;

        let now = unix_timestamp();
        if request.status == RequestStatus::Pending.as_str() && now >= request.expires_at {
            self.db
                .expire_connection_request(request_id, &principal.identity_id, now)
                .await?;
        }
        check_request_open(&request, now)?;

        let Some((request, whitelist_entry)) = self
            .db
            .decide_connection_request(
                request_id,
                &principal.identity_id,
                decision.outcome(),
                note,
                &uuid::Uuid::new_v4().to_string(),
                now,
            )
            .await?
        else {
            // Lost a race with another decision.
            let current = self
                .db
                .get_connection_request(request_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Request {request_id}")))?;
            check_request_open(&current, now)?;
            return Err(ServiceError::Conflict("Request already decided".to_string()));
        };

        let acl_sync = if decision == Decision::Approve {
            match self
                .acl
                .emit(&principal.identity_id, &principal.identity_id)
                .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(request_id, error = %e, "ACL sync after approval failed");
                    None
                }
            }
        } else {
            None
        };

        record(ProtocolCounter::ConnectionRequests, 1, decision.outcome().as_str());
        info!(request_id, status = %request.status, "Connection request decided");
        Ok(DecisionReceipt {
            request,
            whitelist_entry,
            acl_sync,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_helpers::{admin_grant, paired_device, test_backend};

    fn created(outcome: SubmitOutcome) -> ConnectionRequest {
        let SubmitOutcome::Created { request } = outcome else {
            panic!("expected a new request, got {outcome:?}");
        };
        request
    }

    async fn backdate(backend: &crate::Backend, request_id: &str) {
        sqlx::query("UPDATE connection_requests SET expires_at = ? WHERE id = ?")
            .bind(unix_timestamp() - 1)
            .bind(request_id)
            .execute(backend.db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_requires_registered_owner() {
        let backend = test_backend().await;

        let err = backend
            .requests
            .submit("806716144", "123456789", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = backend
            .requests
            .submit("806716144", "12", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = backend
            .requests
            .submit("806716144", "123456789", None, Some(&"n".repeat(MAX_NOTE_LEN + 1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn resubmitting_returns_the_open_request() {
        let backend = test_backend().await;
        let (_, owner) = admin_grant(&backend, "806716144").await;

        let request = created(
            backend
                .requests
                .submit("806 716 144", "123-456-789", Some("Support"), Some("Printer issue"))
                .await
                .unwrap(),
        );
        assert_eq!(request.status, "pending");
        assert_eq!(request.owner_identity_id, owner.identity_id);
        assert_eq!(request.requester_display_id, "123 456 789");
        assert_eq!(
            request.expires_at - request.requested_at,
            backend.config.connection_request_ttl_secs()
        );

        let again = backend
            .requests
            .submit("806716144", "123456789", None, None)
            .await
            .unwrap();
        let SubmitOutcome::Existing { request: existing } = again else {
            panic!("expected the open request");
        };
        assert_eq!(existing.id, request.id);

        backdate(&backend, &request.id).await;
        let fresh = created(
            backend
                .requests
                .submit("806716144", "123456789", None, None)
                .await
                .unwrap(),
        );
        assert_ne!(fresh.id, request.id);
    }

    #[tokio::test]
    async fn approval_whitelists_and_syncs_once() {
        let backend = test_backend().await;
        let (_, owner) = admin_grant(&backend, "806716144").await;
        let (device, _) = paired_device(&backend, &owner).await;
        let request = created(
            backend
                .requests
                .submit("806716144", "123456789", Some("Support"), None)
                .await
                .unwrap(),
        );

        let receipt = backend
            .requests
            .decide(&owner, &request.id, Decision::Approve, Some("ok"))
            .await
            .unwrap();
        assert_eq!(receipt.request.status, "approved");
        assert_eq!(receipt.request.decision_note.as_deref(), Some("ok"));
        assert!(receipt.request.decided_at.is_some());
        let entry = receipt.whitelist_entry.unwrap();
        assert_eq!(entry.requester_canonical_id, "123456789");
        assert_eq!(entry.label.as_deref(), Some("Support"));
        assert_eq!(receipt.acl_sync.unwrap().entries_synced, 1);

        let events = backend.directory.events(&owner, &device.id, 5).await.unwrap();
        assert_eq!(events[0].event_type, "acl_sync_requested");

        let err = backend
            .requests
            .decide(&owner, &request.id, Decision::Decline, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.public_message(), "Request already approved");

        let outcome = backend
            .requests
            .submit("806716144", "123456789", None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::AlreadyWhitelisted));
    }

    #[tokio::test]
    async fn decline_leaves_whitelist_untouched() {
        let backend = test_backend().await;
        let (_, owner) = admin_grant(&backend, "806716144").await;
        let request = created(
            backend
                .requests
                .submit("806716144", "123456789", None, None)
                .await
                .unwrap(),
        );

        let receipt = backend
            .requests
            .decide(&owner, &request.id, Decision::Decline, None)
            .await
            .unwrap();
        assert_eq!(receipt.request.status, "declined");
        assert!(receipt.whitelist_entry.is_none());
        assert!(receipt.acl_sync.is_none());
        assert!(backend.whitelist.list(&owner).await.unwrap().is_empty());
        assert!(
            backend
                .db
                .list_acl_sync_events(&owner.identity_id, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn expired_request_is_recorded_and_rejected() {
        let backend = test_backend().await;
        let (_, owner) = admin_grant(&backend, "806716144").await;
        let request = created(
            backend
                .requests
                .submit("806716144", "123456789", None, None)
                .await
                .unwrap(),
        );
        backdate(&backend, &request.id).await;

        let err = backend
            .requests
            .decide(&owner, &request.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);

        let stored = backend
            .db
            .get_connection_request(&request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "expired");
        assert_eq!(stored.decided_by_identity_id.as_deref(), Some(owner.identity_id.as_str()));
        assert!(backend.whitelist.list(&owner).await.unwrap().is_empty());

        let err = backend
            .requests
            .decide(&owner, &request.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn requests_are_owner_scoped() {
        let backend = test_backend().await;
        let (_, alice) = admin_grant(&backend, "806716144").await;
        let (_, bob) = admin_grant(&backend, "111222333").await;
        let request = created(
            backend
                .requests
                .submit("806716144", "123456789", None, None)
                .await
                .unwrap(),
        );

        assert!(backend.requests.list(&bob, RequestFilter::All).await.unwrap().is_empty());
        let err = backend
            .requests
            .decide(&bob, &request.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = backend
            .requests
            .decide(&alice, "no-such-request", Decision::Approve, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let pending = backend
            .requests
            .list(&alice, RequestFilter::default())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        backend
            .requests
            .decide(&alice, &request.id, Decision::Decline, None)
            .await
            .unwrap();
        assert!(
            backend
                .requests
                .list(&alice, RequestFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
        let declined = backend
            .requests
            .list(&alice, RequestFilter::Status(RequestStatus::Declined))
            .await
            .unwrap();
        assert_eq!(declined.len(), 1);
        assert_eq!(backend.requests.list(&alice, RequestFilter::All).await.unwrap().len(), 1);
    }
}
