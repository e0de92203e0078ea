use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use feedpost_infra::driver::{CyclePorts, CycleReport, Driver};
use feedpost_infra::ledger::{HttpLedger, InMemoryLedger};
use feedpost_infra::metric::{HttpMetricStore, InMemoryMetricStore};
use feedpost_infra::notify::{InMemoryNotifier, TracingNotifier};
use feedpost_infra::store::{
    InMemoryAuditStore, InMemoryBoundaryStore, InMemoryRecipeStore, InMemoryRunStore,
    InMemorySheetStore, PostgresStores,
};
use feedpost_infra::EngineConfig;

/// In-memory collaborators, kept concrete so dev tooling and tests can seed them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPorts {
    pub runs: Arc<InMemoryRunStore>,
    pub recipes: Arc<InMemoryRecipeStore>,
    pub audit: Arc<InMemoryAuditStore>,
    pub boundaries: Arc<InMemoryBoundaryStore>,
    pub sheets: Arc<InMemorySheetStore>,
    pub metrics: Arc<InMemoryMetricStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub notifier: Arc<InMemoryNotifier>,
}

impl InMemoryPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_ports(&self) -> CyclePorts {
        CyclePorts {
            runs: self.runs.clone(),
            recipes: self.recipes.clone(),
            audit: self.audit.clone(),
            boundaries: self.boundaries.clone(),
            sheets: self.sheets.clone(),
            metrics: self.metrics.clone(),
            ledger: self.ledger.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

pub struct AppServices {
    pub config: EngineConfig,
    pub driver: Arc<Driver>,
    /// Present only for in-memory wiring.
    pub in_memory: Option<InMemoryPorts>,
    last_report: RwLock<Option<(DateTime<Utc>, CycleReport)>>,
}

impl AppServices {
    pub fn new(config: EngineConfig, driver: Arc<Driver>, in_memory: Option<InMemoryPorts>) -> Self {
        Self {
            config,
            driver,
            in_memory,
            last_report: RwLock::new(None),
        }
    }

    pub fn record_report(&self, now: DateTime<Utc>, report: &CycleReport) {
        if let Ok(mut last) = self.last_report.write() {
            *last = Some((now, report.clone()));
        }
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        let last = self.last_report.read().ok()?;
        last.as_ref().map(|(_, report)| report.clone())
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_report.read().ok()?;
        last.as_ref().map(|(at, _)| *at)
    }
}

/// Wire services from configuration: in-memory by default, Postgres + HTTP
/// adapters when `USE_PERSISTENT_STORES` is set.
pub async fn build_services(config: EngineConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        return build_persistent_services(config).await;
    }
    Ok(build_in_memory_services(config))
}

pub fn build_in_memory_services(config: EngineConfig) -> AppServices {
    let ports = InMemoryPorts::new();
    let driver = Arc::new(Driver::new(ports.cycle_ports(), &config));
    tracing::info!("in-memory stores wired");
    AppServices::new(config, driver, Some(ports))
}

async fn build_persistent_services(config: EngineConfig) -> anyhow::Result<AppServices> {
    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"))?;
    let metric_url = config
        .metric_base_url
        .clone()
        .ok_or_else(|| anyhow!("FEEDPOST_METRIC_URL must be set when USE_PERSISTENT_STORES=true"))?;
    let ledger_url = config
        .ledger_base_url
        .clone()
        .ok_or_else(|| anyhow!("FEEDPOST_LEDGER_URL must be set when USE_PERSISTENT_STORES=true"))?;

    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let stores = Arc::new(PostgresStores::new(pool));
    stores
        .ensure_schema()
        .await
        .context("failed to create engine tables")?;

    let ports = CyclePorts {
        runs: stores.clone(),
        recipes: stores.clone(),
        audit: stores.clone(),
        boundaries: stores.clone(),
        sheets: stores,
        metrics: Arc::new(HttpMetricStore::new(metric_url)),
        ledger: Arc::new(HttpLedger::new(ledger_url)),
        notifier: Arc::new(TracingNotifier),
    };
    let driver = Arc::new(Driver::new(ports, &config));
    tracing::info!("persistent stores wired");
    Ok(AppServices::new(config, driver, None))
}
