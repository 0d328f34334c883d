//! Application state management.
//!
//! This module provides the shared application state that is
//! accessible to all request handlers via Axum's State extractor.

use std::sync::Arc;

use secrecy::SecretString;

use crate::infra::PrometheusHandle;

use super::service::PaymentService;

/// Shared application state for the Axum web server.
///
/// All contained types are wrapped in `Arc` and implement `Send + Sync`,
/// making `AppState` safe to share across async tasks.
#[derive(Clone)]
pub struct AppState {
    /// The payment orchestrator.
    pub service: Arc<PaymentService>,

    /// Required in `x-api-key` on POST routes when set.
    pub api_key: Option<Arc<SecretString>>,

    /// Renders `GET /metrics`; absent when no recorder could be installed.
    pub metrics: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<PaymentService>) -> Self {
        Self {
            service,
            api_key: None,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(Arc::new(api_key));
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: Arc<PrometheusHandle>) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfirmationSettings;
    use crate::test_utils::sample_registry;

    fn service() -> Arc<PaymentService> {
        Arc::new(
            PaymentService::new(
                Arc::new(sample_registry()),
                Vec::new(),
                ConfirmationSettings::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_app_state_is_clone() {
        let state = AppState::new(service()).with_api_key(SecretString::from("k".to_string()));
        let cloned = state.clone();

        // Both should point to the same service
        assert!(Arc::ptr_eq(&state.service, &cloned.service));
        assert!(cloned.api_key.is_some());
        assert!(cloned.metrics.is_none());
    }
}
