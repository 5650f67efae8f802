//! Elevation confirmation requests and their responses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::PermissionSet;

/// A request for a human (or script) to approve an elevated command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Assigned by the coordinator when empty.
    pub id: String,
    pub command: String,
    pub permissions: PermissionSet,
    pub risk_description: String,
    pub session_id: String,
    /// Request that triggered the elevation, for audit correlation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    pub timeout: Duration,
}

/// Terminal state of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfirmationOutcome {
    Approved,
    Denied,
    Timeout,
    Error,
}

impl ConfirmationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Approved => "approved",
            ConfirmationOutcome::Denied => "denied",
            ConfirmationOutcome::Timeout => "timeout",
            ConfirmationOutcome::Error => "error",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ConfirmationOutcome::Approved)
    }
}

/// The single response recorded for a [`ConfirmationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub request_id: String,
    pub outcome: ConfirmationOutcome,
    pub latency: Duration,
    /// Provider detail for `Error` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ConfirmationResponse {
    /// Build the response for `request`. The id is copied from the request,
    /// which is the only way a response gets one.
    pub fn for_request(
        request: &ConfirmationRequest,
        outcome: ConfirmationOutcome,
        latency: Duration,
    ) -> Self {
        Self {
            request_id: request.id.clone(),
            outcome,
            latency,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Permission;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            id: "req-1".to_string(),
            command: "Stop-Service -Name Spooler".to_string(),
            permissions: [Permission::Admin].into_iter().collect(),
            risk_description: "stops a service".to_string(),
            session_id: "s1".to_string(),
            correlation_id: String::new(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn response_copies_request_id() {
        let req = request();
        let resp = ConfirmationResponse::for_request(
            &req,
            ConfirmationOutcome::Denied,
            Duration::from_millis(12),
        );
        assert_eq!(resp.request_id, req.id);
        assert!(!resp.outcome.is_approved());
    }

    #[test]
    fn outcome_serializes_uppercase() {
        let json = serde_json::to_string(&ConfirmationOutcome::Timeout).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
    }
}
