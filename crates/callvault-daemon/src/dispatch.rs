//! Typed request surface and dispatch.
//!
//! Requests arrive as a flat JSON envelope: the acting `user_id` and
//! `organization_id` plus a `type`-tagged operation. Dispatch resolves the
//! typed actor through the membership store first; a user with no
//! membership in the named organization is rejected before any operation
//! logic runs. Service errors map onto the wire error codes here, and
//! store failures collapse to `internal` without leaking detail.

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use callvault_core::verify::VerificationReport;

use crate::service::{
    CreateHoldParams, EvidenceService, HoldSummary, ReleasedHold, ServiceError,
};

/// A complete inbound request: actor identity plus operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// The acting user.
    pub user_id: Uuid,
    /// The organization the request is scoped to.
    pub organization_id: Uuid,
    /// The operation to perform.
    #[serde(flatten)]
    pub request: EvidenceRequest,
}

/// Operations the subsystem exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvidenceRequest {
    /// Verify a bundle (preferred) or a manifest.
    Verify {
        /// Bundle to verify; wins when both ids are present.
        #[serde(default)]
        bundle_id: Option<Uuid>,
        /// Manifest to verify when no bundle id is given.
        #[serde(default)]
        manifest_id: Option<Uuid>,
    },
    /// List the organization's legal holds, newest first.
    ListLegalHolds,
    /// Create a legal hold and flag the covered calls.
    CreateLegalHold {
        /// Hold parameters.
        #[serde(flatten)]
        params: CreateHoldParams,
    },
    /// Release a legal hold with a mandatory reason.
    ReleaseLegalHold {
        /// The hold to release.
        hold_id: Uuid,
        /// Why the hold is being lifted. Required, non-blank.
        release_reason: String,
    },
}

/// Wire error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or failed-validation request.
    InvalidRequest,
    /// The actor may not act in this organization or on this resource.
    Forbidden,
    /// The referenced record does not exist in the organization.
    NotFound,
    /// The hold was already released.
    AlreadyReleased,
    /// Unexpected server-side failure.
    Internal,
}

/// Responses, one variant per request plus the error shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvidenceResponse {
    /// Result of a verify request. Present even when verification found
    /// problems; `report.ok` is the verdict.
    Verification {
        /// The structured report.
        report: VerificationReport,
    },
    /// The organization's holds.
    LegalHolds {
        /// Newest first, with live coverage counts.
        holds: Vec<HoldSummary>,
    },
    /// A hold was created.
    LegalHoldCreated {
        /// The new hold with its coverage count.
        hold: HoldSummary,
    },
    /// A hold was released.
    LegalHoldReleased {
        /// The released hold and the calls whose custody reverted.
        hold: ReleasedHold,
    },
    /// The request failed.
    Error {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl EvidenceResponse {
    fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Resolves the actor and runs one request to completion.
#[must_use]
pub fn dispatch(service: &EvidenceService, envelope: RequestEnvelope) -> EvidenceResponse {
    let actor = match service.resolve_actor(envelope.user_id, envelope.organization_id) {
        Ok(Some(actor)) => actor,
        Ok(None) => {
            return EvidenceResponse::error(
                ErrorCode::Forbidden,
                "user is not a member of the organization",
            );
        }
        Err(err) => return internal(&err),
    };

    let result = match envelope.request {
        EvidenceRequest::Verify {
            bundle_id,
            manifest_id,
        } => service
            .verify(&actor, bundle_id, manifest_id)
            .map(|report| EvidenceResponse::Verification { report }),
        EvidenceRequest::ListLegalHolds => service
            .list_holds(&actor)
            .map(|holds| EvidenceResponse::LegalHolds { holds }),
        EvidenceRequest::CreateLegalHold { params } => service
            .create_hold(&actor, params)
            .map(|hold| EvidenceResponse::LegalHoldCreated { hold }),
        EvidenceRequest::ReleaseLegalHold {
            hold_id,
            release_reason,
        } => service
            .release_hold(&actor, hold_id, &release_reason)
            .map(|hold| EvidenceResponse::LegalHoldReleased { hold }),
    };

    result.unwrap_or_else(|err| match err {
        ServiceError::InvalidRequest(message) => {
            EvidenceResponse::error(ErrorCode::InvalidRequest, message)
        }
        ServiceError::Forbidden(message) => EvidenceResponse::error(ErrorCode::Forbidden, message),
        ServiceError::NotFound(message) => EvidenceResponse::error(ErrorCode::NotFound, message),
        ServiceError::AlreadyReleased => EvidenceResponse::error(
            ErrorCode::AlreadyReleased,
            "legal hold already released",
        ),
        err @ ServiceError::Store(_) => internal(&err),
    })
}

fn internal(err: &ServiceError) -> EvidenceResponse {
    error!("request failed: {err}");
    EvidenceResponse::error(ErrorCode::Internal, "internal error")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use callvault_core::actor::Role;
    use serde_json::json;

    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::store::{CallRecord, EvidenceStore};

    fn service_with_admin() -> (EvidenceService, Uuid, Uuid) {
        let store = EvidenceStore::open_in_memory().unwrap();
        let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert_member(user, org, Role::Admin).unwrap();
        let service = EvidenceService::new(store, Arc::new(RecordingAuditSink::default()));
        (service, user, org)
    }

    fn envelope(user: Uuid, org: Uuid, request: EvidenceRequest) -> RequestEnvelope {
        RequestEnvelope {
            user_id: user,
            organization_id: org,
            request,
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let raw = json!({
            "user_id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "type": "release_legal_hold",
            "hold_id": Uuid::new_v4(),
            "release_reason": "matter closed",
        });
        let parsed: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            parsed.request,
            EvidenceRequest::ReleaseLegalHold { .. }
        ));
    }

    #[test]
    fn test_verify_request_ids_are_optional() {
        let raw = json!({
            "user_id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "type": "verify",
        });
        let parsed: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            parsed.request,
            EvidenceRequest::Verify {
                bundle_id: None,
                manifest_id: None
            }
        ));
    }

    #[test]
    fn test_error_response_wire_shape() {
        let response = EvidenceResponse::error(ErrorCode::AlreadyReleased, "nope");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["code"], json!("already_released"));
    }

    #[test]
    fn test_non_member_is_rejected_before_dispatch() {
        let (service, _, org) = service_with_admin();
        let response = dispatch(
            &service,
            envelope(Uuid::new_v4(), org, EvidenceRequest::ListLegalHolds),
        );
        assert!(matches!(
            response,
            EvidenceResponse::Error {
                code: ErrorCode::Forbidden,
                ..
            }
        ));
    }

    #[test]
    fn test_full_hold_lifecycle_through_dispatch() {
        let (service, user, org) = service_with_admin();
        let call = CallRecord::new(org);
        service.store().insert_call(&call).unwrap();

        let created = dispatch(
            &service,
            envelope(
                user,
                org,
                EvidenceRequest::CreateLegalHold {
                    params: CreateHoldParams {
                        hold_name: "matter 42".into(),
                        matter_reference: None,
                        description: None,
                        applies_to_all: false,
                        call_ids: vec![call.id],
                        effective_until: None,
                    },
                },
            ),
        );
        let EvidenceResponse::LegalHoldCreated { hold } = created else {
            panic!("expected creation");
        };
        assert_eq!(hold.affected_call_count, 1);

        let listed = dispatch(&service, envelope(user, org, EvidenceRequest::ListLegalHolds));
        let EvidenceResponse::LegalHolds { holds } = listed else {
            panic!("expected listing");
        };
        assert_eq!(holds.len(), 1);

        let released = dispatch(
            &service,
            envelope(
                user,
                org,
                EvidenceRequest::ReleaseLegalHold {
                    hold_id: hold.hold.id,
                    release_reason: "matter closed".into(),
                },
            ),
        );
        assert!(matches!(
            released,
            EvidenceResponse::LegalHoldReleased { .. }
        ));

        let again = dispatch(
            &service,
            envelope(
                user,
                org,
                EvidenceRequest::ReleaseLegalHold {
                    hold_id: hold.hold.id,
                    release_reason: "again".into(),
                },
            ),
        );
        assert!(matches!(
            again,
            EvidenceResponse::Error {
                code: ErrorCode::AlreadyReleased,
                ..
            }
        ));
    }

    #[test]
    fn test_verify_without_ids_maps_to_invalid_request() {
        let (service, user, org) = service_with_admin();
        let response = dispatch(
            &service,
            envelope(
                user,
                org,
                EvidenceRequest::Verify {
                    bundle_id: None,
                    manifest_id: None,
                },
            ),
        );
        assert!(matches!(
            response,
            EvidenceResponse::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }
}
