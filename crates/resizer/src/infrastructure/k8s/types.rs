use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ClusterError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("{kind} not found: {name}")]
    NotFound { kind: String, name: String },
    /// Optimistic concurrency failure (HTTP 409), the caller may re-read and retry
    #[display("Write conflict on {kind} {name}")]
    Conflict { kind: String, name: String },
    #[display("Kubernetes API request failed: {message}")]
    Api { message: String },
    #[display("Malformed {kind} object: {message}")]
    InvalidObject { kind: String, message: String },
}

impl Error for ClusterError {}

impl ClusterError {
    /// Classify a kube client error by HTTP status.
    pub(crate) fn from_kube(err: &kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(response) if response.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => Self::Api {
                message: format!("{kind} {name}: {other}"),
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use kube::error::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn classifies_kube_errors_by_status_code() {
        assert_eq!(
            ClusterError::from_kube(&api_error(404), "Pod", "default/web-0"),
            ClusterError::NotFound {
                kind: "Pod".to_string(),
                name: "default/web-0".to_string()
            }
        );
        assert!(ClusterError::from_kube(&api_error(409), "Deployment", "default/web").is_conflict());
        assert!(matches!(
            ClusterError::from_kube(&api_error(500), "Pod", "default/web-0"),
            ClusterError::Api { .. }
        ));
    }

    #[test]
    fn display_formatting() {
        let conflict = ClusterError::Conflict {
            kind: "ReplicaSet".to_string(),
            name: "default/web-7d9f".to_string(),
        };
        assert_eq!(conflict.to_string(), "Write conflict on ReplicaSet default/web-7d9f");
    }
}
