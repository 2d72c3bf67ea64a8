use std::sync::Arc;

use health::{HealthHandle, HealthRegistry};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::warehouse::PostgresWarehouse;

pub struct AppContext {
    pub warehouse: Arc<PostgresWarehouse>,
    pub liveness: HealthRegistry,
    pub staging_liveness: HealthHandle,
    pub reconciler_liveness: HealthHandle,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, sqlx::Error> {
        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;

        let warehouse = Arc::new(PostgresWarehouse::new(
            pool,
            &config.staging_table,
            &config.canonical_table,
        ));
        warehouse.ensure_schema().await?;

        let liveness = HealthRegistry::new("liveness");
        let staging_liveness = liveness
            .register("staging".to_string(), time::Duration::seconds(60))
            .await;
        // The reconciler only wakes on batch commits and its fallback tick,
        // so its deadline has to comfortably exceed the tick interval
        let reconciler_liveness = liveness
            .register(
                "reconciler".to_string(),
                time::Duration::seconds(config.reconcile_interval_secs as i64 * 2 + 60),
            )
            .await;

        Ok(Self {
            warehouse,
            liveness,
            staging_liveness,
            reconciler_liveness,
        })
    }
}
