//! Application layer containing the payment orchestrator and shared state.

pub mod service;
pub mod state;

pub use service::PaymentService;
pub use state::AppState;
