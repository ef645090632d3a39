pub mod cluster;
pub mod pod_info;
pub mod types;

pub use cluster::KubeCluster;
pub use pod_info::controller_of;
pub use pod_info::is_controlled_by;
pub use pod_info::parse_container_id;
pub use pod_info::pod_full_name;
pub use pod_info::pod_parent;
pub use pod_info::PodParentInfo;
pub use types::ClusterError;
