//! TinyPay payment gateway
//!
//! An HTTP gateway that turns a commit-reveal one-time-password payment into a
//! signed transaction on one of several ledgers, and reports how that
//! transaction settled.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │  HTTP handlers, routing, auth, rate limits   │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Payment orchestration, per-signer ordering  │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │ Commitments, currency registry, status rules │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  Move, EVM and Solana adapters, telemetry    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every ledger sits behind [`domain::ChainAdapter`]; the orchestrator in
//! [`app::PaymentService`] only ever sees that trait, so tests swap in
//! [`test_utils::MockChainAdapter`] without touching a network.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tinypay_gateway::api::create_router;
//! use tinypay_gateway::app::{AppState, PaymentService};
//! use tinypay_gateway::config::AppConfig;
//! use tinypay_gateway::infra::{RpcClientConfig, build_adapters};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let adapters = build_adapters(&config.networks, &RpcClientConfig::default())?;
//!     let service = PaymentService::new(Arc::new(config.registry()), adapters, config.confirmation)?;
//!
//!     let router = create_router(Arc::new(AppState::new(Arc::new(service))));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9090").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
