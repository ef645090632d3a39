//! Conversion of a commodity change into a concrete container resource quantity

use api_types::CommodityChange;
use api_types::CommodityType;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::traits::NodeMeasurement;
use super::types::ActionError;

/// The capacity model expresses memory in KiB.
const MEMORY_UNIT_BYTES: f64 = 1024.0;

/// Absolute target capacity of one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum CapacityTarget {
    /// CPU as a frequency-equivalent quantity, with the node frequency it was derived from
    Cpu { khz: f64, node_khz: u64 },
    Memory { bytes: u64 },
}

impl CapacityTarget {
    /// Container resource name this target applies to.
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Cpu { .. } => "cpu",
            Self::Memory { .. } => "memory",
        }
    }

    /// Render as a Kubernetes quantity. CPU becomes millicores of the hosting node.
    pub fn to_quantity(&self) -> Quantity {
        match self {
            Self::Cpu { khz, node_khz } => {
                let millicores = (khz * 1000.0 / *node_khz as f64).round().max(1.0) as u64;
                Quantity(format!("{millicores}m"))
            }
            Self::Memory { bytes } => Quantity(bytes.to_string()),
        }
    }
}

/// What to change on which container; derived once per action.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeSpec {
    pub container_index: usize,
    pub target: CapacityTarget,
}

/// Convert `change` into an absolute capacity for a container on `node_name`.
///
/// # Errors
///
/// - [`ActionError::NonPositiveCapacity`] for any amount <= 0, checked first
/// - [`ActionError::ValidationError`] for an infinite amount or one too large for a quantity
/// - [`ActionError::UnsupportedCommodity`] for reservation changes and commodities other than VCPU/VMEM
/// - [`ActionError::DependencyError`] if the node CPU frequency cannot be obtained
pub async fn build_capacity(
    change: &CommodityChange,
    node_name: Option<&str>,
    nodes: &dyn NodeMeasurement,
) -> Result<CapacityTarget, Report<ActionError>> {
    let amount = change.capacity;
    if amount.is_nan() || amount <= 0.0 {
        return Err(Report::new(ActionError::NonPositiveCapacity { amount }));
    }
    // memory bytes and cpu millicores both scale the amount by about a thousand
    if !amount.is_finite() || amount * MEMORY_UNIT_BYTES >= u64::MAX as f64 {
        return Err(Report::new(ActionError::ValidationError {
            message: format!("capacity {amount} is out of range"),
        }));
    }
    if change.reservation {
        return Err(Report::new(ActionError::UnsupportedCommodity {
            message: "resizing the reservation is not supported".to_string(),
        }));
    }

    match change.commodity_type {
        CommodityType::Vcpu => {
            let node_name = node_name.ok_or_else(|| {
                Report::new(ActionError::DependencyError {
                    message: "hosting pod is not bound to a node".to_string(),
                })
            })?;
            let node_khz = nodes.cpu_frequency_khz(node_name).await.change_context(
                ActionError::DependencyError {
                    message: format!("failed to get CPU frequency of node {node_name}"),
                },
            )?;
            if node_khz == 0 {
                return Err(Report::new(ActionError::DependencyError {
                    message: format!("node {node_name} reported zero CPU frequency"),
                }));
            }
            Ok(CapacityTarget::Cpu {
                khz: amount * node_khz as f64,
                node_khz,
            })
        }
        CommodityType::Vmem => Ok(CapacityTarget::Memory {
            bytes: (amount * MEMORY_UNIT_BYTES).round() as u64,
        }),
        CommodityType::CpuProvisioned
        | CommodityType::MemProvisioned
        | CommodityType::Transaction
        | CommodityType::Unknown => Err(Report::new(ActionError::UnsupportedCommodity {
            message: format!("commodity type {} cannot be resized", change.commodity_type),
        })),
    }
}

/// Numeric value of a quantity in base units (cores, bytes).
///
/// Covers the decimal and binary suffixes Kubernetes emits; returns `None`
/// for anything else.
pub fn quantity_value(quantity: &Quantity) -> Option<f64> {
    let text = quantity.0.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * multiplier)
}
