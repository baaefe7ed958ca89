pub mod envoy;
pub mod exec;
pub mod kubeconfig;
pub mod logs;
pub mod pods;
pub mod proxy;
pub mod versions;
