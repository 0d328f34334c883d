//! Infrastructure layer implementations.

pub mod blockchain;
pub mod observability;

pub use blockchain::{RpcClientConfig, build_adapter, build_adapters};
pub use observability::{LogFormat, PrometheusHandle, init_metrics_handle, init_tracing};
