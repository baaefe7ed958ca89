pub mod k8s;
pub mod version;
