use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use metrics_exporter_prometheus::PrometheusHandle;
use persistence::Persistence;
use relay::RelayContext;

use crate::{auth::Authenticator, config::Settings};

pub struct AppState {
    pub relay: RelayContext,
    pub auth: Authenticator,
    pub connections: ConnectionCounter,
    pub metrics: Option<PrometheusHandle>,
    pub settings: Settings,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        persistence: Arc<dyn Persistence>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            relay: RelayContext::new(persistence, settings.relay_limits()),
            auth: Authenticator::from_settings(&settings),
            connections: ConnectionCounter::default(),
            metrics,
            settings,
            started_at: Instant::now(),
        }
    }

    pub fn over_capacity(&self) -> bool {
        self.connections.active() > self.settings.max_connections
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter {
    active: Arc<AtomicUsize>,
}

impl ConnectionCounter {
    pub fn acquire(&self) -> ConnectionSlot {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionSlot {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_release_on_drop() {
        let counter = ConnectionCounter::default();
        let first = counter.acquire();
        let second = counter.acquire();
        assert_eq!(counter.active(), 2);

        drop(first);
        assert_eq!(counter.active(), 1);
        drop(second);
        assert_eq!(counter.active(), 0);
    }
}
