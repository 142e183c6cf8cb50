//! Application state

use std::sync::Arc;

use teamsub_billing::{BillingConfig, Notifier, ProviderGateway, SubscriptionService, TeamStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionService>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TeamStore>,
        gateway: Arc<dyn ProviderGateway>,
        notifier: Arc<dyn Notifier>,
        config: BillingConfig,
    ) -> Self {
        Self {
            subscriptions: Arc::new(SubscriptionService::new(store, gateway, config)),
            notifier,
        }
    }

    pub fn billing_config(&self) -> &BillingConfig {
        self.subscriptions.config()
    }

    pub fn store(&self) -> &Arc<dyn TeamStore> {
        self.subscriptions.store()
    }
}
