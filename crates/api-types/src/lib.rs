//! Shared API type definitions
//!
//! This crate contains the wire model exchanged between the upstream action
//! dispatcher and the resize executor: the action request carrying one
//! commodity change, and the tri-state outcome reported back.

use serde::Deserialize;
use serde::Serialize;

/// Commodity dimensions known to the capacity model.
///
/// Only [`CommodityType::Vcpu`] and [`CommodityType::Vmem`] can be resized;
/// the rest are accepted on the wire so that they can be rejected explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommodityType {
    Vcpu,
    Vmem,
    CpuProvisioned,
    MemProvisioned,
    Transaction,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for CommodityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Requested change of one commodity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommodityChange {
    /// Which commodity is resized
    pub commodity_type: CommodityType,
    /// New capacity. VCPU is a rate in cores, VMEM is in KiB.
    pub capacity: f64,
    /// Whether the change targets the reservation instead of the capacity
    #[serde(default)]
    pub reservation: bool,
}

/// Resize action recommended by the decision platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Target container identifier, `<pod-uid>-<container-index>`
    pub target_container_id: String,
    /// Identifier (uid) of the pod hosting the target container
    pub hosting_pod_id: String,
    /// Human readable name of the hosting pod, only used in messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting_pod_display_name: Option<String>,
    /// The commodity change; a request without one is rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commodity: Option<CommodityChange>,
}

/// Tri-state result of executing an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOutcomeKind {
    Succeeded,
    /// The caller may resubmit the action later
    RetryableFailure,
    PermanentFailure,
}

/// Response returned to the action dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub outcome: ActionOutcomeKind,
    /// Failure reason, or a short description of what was done
    pub message: String,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.outcome == ActionOutcomeKind::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_action_request_from_dispatcher_json() {
        let json = r#"{
            "targetContainerId": "6f1c2a40-1f7e-4c51-9a55-0d1f7e0a9b21-1",
            "hostingPodId": "6f1c2a40-1f7e-4c51-9a55-0d1f7e0a9b21",
            "commodity": {
                "commodityType": "VCPU",
                "capacity": 2.5
            }
        }"#;

        let request: ActionRequest =
            serde_json::from_str(json).expect("should deserialize action request");

        assert_eq!(
            request.hosting_pod_id,
            "6f1c2a40-1f7e-4c51-9a55-0d1f7e0a9b21"
        );
        assert_eq!(request.hosting_pod_display_name, None);
        let commodity = request.commodity.expect("commodity should be present");
        assert_eq!(commodity.commodity_type, CommodityType::Vcpu);
        assert_eq!(commodity.capacity, 2.5);
        assert!(!commodity.reservation, "reservation should default to false");
    }

    #[test]
    fn unknown_commodity_type_is_kept_as_unknown() {
        let json = r#"{"commodityType": "STORAGE_AMOUNT", "capacity": 10.0}"#;
        let change: CommodityChange =
            serde_json::from_str(json).expect("should deserialize unknown commodity");
        assert_eq!(change.commodity_type, CommodityType::Unknown);
    }

    #[test]
    fn request_without_commodity_deserializes_to_none() {
        let json = r#"{"targetContainerId": "abc-0", "hostingPodId": "abc"}"#;
        let request: ActionRequest = serde_json::from_str(json).expect("should deserialize");
        assert!(request.commodity.is_none());
    }

    #[test]
    fn response_outcome_uses_screaming_snake_case() {
        let response = ActionResponse {
            outcome: ActionOutcomeKind::RetryableFailure,
            message: "lock busy".to_string(),
        };
        let json = serde_json::to_string(&response).expect("should serialize");
        assert_eq!(
            json,
            r#"{"outcome":"RETRYABLE_FAILURE","message":"lock busy"}"#
        );
        assert!(!response.is_success());
    }
}
