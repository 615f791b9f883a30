//! VirtualGW daemon
//!
//! Runs the failover loop for one role and exposes it to local tooling.
//!
//! # Components
//!
//! - **Config**: YAML configuration, validation and reload publishing
//! - **RpcServer**: JSON lines control socket (`get_status`, `command`)
//! - **LifecycleSupervisor**: signal handling and role lock release
//! - **MetricsServer**: optional Prometheus endpoint
//! - **Daemon**: wires everything together

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod supervisor;

pub use config::{Config, ConfigError, ConfigStore};
pub use http_server::MetricsServer;
pub use metrics::MetricsRegistry;
pub use rpc::{Reply, Request, RpcServer};
pub use server::{Daemon, StartupError};
pub use supervisor::LifecycleSupervisor;
