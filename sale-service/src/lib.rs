pub mod api;
pub mod availability;
pub mod cache;
pub mod config;
pub mod holds;
pub mod models;
pub mod orders;
pub mod payments;
pub mod schema;
pub mod store;

use shared::Clock;
use std::sync::Arc;
use std::time::Duration;

use crate::availability::Availability;
use crate::cache::AvailabilityCache;
use crate::holds::HoldManager;
use crate::orders::OrderWorkflow;
use crate::payments::PaymentSettlement;
use crate::store::Store;

/// The four sale components wired to one store, cache and clock.
pub struct SaleEngine<S> {
    pub availability: Arc<Availability<S>>,
    pub holds: HoldManager<S>,
    pub orders: OrderWorkflow<S>,
    pub payments: PaymentSettlement<S>,
}

impl<S: Store> SaleEngine<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        availability_ttl: Duration,
    ) -> Self {
        let availability = Arc::new(Availability::new(
            Arc::clone(&store),
            cache,
            Arc::clone(&clock),
            availability_ttl,
        ));

        Self {
            holds: HoldManager::new(Arc::clone(&store), Arc::clone(&availability), Arc::clone(&clock)),
            orders: OrderWorkflow::new(Arc::clone(&store), Arc::clone(&availability), Arc::clone(&clock)),
            payments: PaymentSettlement::new(store, Arc::clone(&availability), clock),
            availability,
        }
    }
}
