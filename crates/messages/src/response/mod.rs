//! Reply payloads.

use crate::Reply;
use fleet_types::{Credentials, ServiceError, ServiceHandle};
use serde::{Deserialize, Serialize};

/// Reply carrying credentials on success (provision and bind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl CredentialsResponse {
    pub fn ok(credentials: Credentials) -> Self {
        Self {
            success: true,
            credentials: Some(credentials),
            error: None,
        }
    }

    pub fn failed(error: ServiceError) -> Self {
        Self {
            success: false,
            credentials: None,
            error: Some(error),
        }
    }
}

impl Reply for CredentialsResponse {
    fn success(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&ServiceError> {
        self.error.as_ref()
    }
}

pub type ProvisionResponse = CredentialsResponse;
pub type BindResponse = CredentialsResponse;

/// Reply with no payload beyond success/error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl SimpleResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: ServiceError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

impl Reply for SimpleResponse {
    fn success(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&ServiceError> {
        self.error.as_ref()
    }
}

/// Answer to a [`HandlesQuery`](crate::HandlesQuery).
///
/// Both shapes are bare JSON arrays on the wire. An empty array decodes as
/// `All`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandlesResponse {
    /// Every known record, for [`HandlesQuery::All`](crate::HandlesQuery::All).
    All(Vec<ServiceHandle>),
    /// Credentials of an instance's bindings.
    Bindings(Vec<Credentials>),
}

impl HandlesResponse {
    pub fn len(&self) -> usize {
        match self {
            HandlesResponse::All(handles) => handles.len(),
            HandlesResponse::Bindings(credentials) => credentials.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reply for HandlesResponse {
    fn success(&self) -> bool {
        true
    }

    fn error(&self) -> Option<&ServiceError> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_failed_reply_carries_error() {
        let raw = br#"{"success":false,"error":{"code":31100,"status":500,"description":"Could not save instance: x"}}"#;
        let reply: CredentialsResponse = codec::decode(raw).unwrap();
        assert!(!reply.success());
        assert!(reply.credentials.is_none());
        assert_eq!(reply.error().map(|e| e.code), Some(31100));
    }

    #[test]
    fn test_handles_response_shapes() {
        let bindings: HandlesResponse =
            codec::decode(br#"[{"name":"i1","node_id":"node-1","user":"u1"}]"#).unwrap();
        assert!(matches!(&bindings, HandlesResponse::Bindings(c) if c[0].get_str("user") == Some("u1")));

        let all: HandlesResponse = codec::decode(
            br#"[{"service_id":"i1","configuration":{},"credentials":{"name":"i1"}}]"#,
        )
        .unwrap();
        assert!(matches!(all, HandlesResponse::All(ref h) if h.len() == 1));
    }
}
