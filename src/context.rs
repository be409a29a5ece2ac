//! Application context
//!
//! Owns the long-lived components and their background tasks. Built once at
//! startup and torn down explicitly.

use crate::config::Settings;
use crate::connection::ConnectionManager;
use crate::health::{HealthMonitor, HealthMonitorHandle};
use crate::registry::SystemRegistry;
use crate::service::AnimatronicService;
use crate::transport::RemoteTransport;
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    pub registry: Arc<SystemRegistry>,
    pub manager: Arc<ConnectionManager>,
    pub service: Arc<AnimatronicService>,
    health: Option<HealthMonitorHandle>,
}

impl AppContext {
    /// Wire every component, resolving credentials from the environment
    pub fn init(settings: Settings, transport: Arc<dyn RemoteTransport>) -> Self {
        let registry = Arc::new(SystemRegistry::from_env(settings.systems.clone()));
        Self::with_registry(settings, registry, transport)
    }

    /// Wire every component around an existing registry
    pub fn with_registry(
        settings: Settings,
        registry: Arc<SystemRegistry>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            registry.clone(),
            transport,
            settings.connection,
        ));
        let service = Arc::new(AnimatronicService::new(manager.clone(), settings.service));
        let health = HealthMonitor::new(manager.clone(), settings.health_check_interval).start();

        info!("Application context ready ({} systems)", registry.len());

        Self {
            registry,
            manager,
            service,
            health: Some(health),
        }
    }

    /// Stop health checks, then close every session and clear history
    pub async fn shutdown(mut self) {
        if let Some(health) = self.health.take() {
            health.stop().await;
        }
        self.service.cleanup().await;
        info!("Application context shut down");
    }
}
