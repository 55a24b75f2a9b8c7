//! Read surface for the aggregation table
//!
//! Consumed by the presentation layer that charts the aggregated data.
//! Readers only see data whose flush has completed; there is no stronger
//! read-your-writes contract across shards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::thermostream::error::PipelineError;
use crate::thermostream::transport::TableStore;

/// Timestamps in epoch milliseconds mapped to the temperature observed at
/// that instant.
pub type TemperatureSeries = BTreeMap<u64, f64>;

pub struct TemperatureQuery {
    store: Arc<dyn TableStore>,
    table_name: String,
}

impl TemperatureQuery {
    pub fn new(store: Arc<dyn TableStore>, table_name: impl Into<String>) -> Self {
        TemperatureQuery {
            store,
            table_name: table_name.into(),
        }
    }

    /// All temperatures recorded for one sensor, grouped by run.
    pub async fn temperatures_for_sensor(
        &self,
        sensor: &str,
    ) -> Result<HashMap<String, TemperatureSeries>, PipelineError> {
        let rows = self.store.scan(&self.table_name).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.sensor == sensor)
            .map(|row| (row.run_id, row.temperatures))
            .collect())
    }

    /// All temperatures for all sensors: sensor id mapped to run id mapped
    /// to the run's temperature series.
    pub async fn all_sensor_temperatures(
        &self,
    ) -> Result<HashMap<String, HashMap<String, TemperatureSeries>>, PipelineError> {
        let rows = self.store.scan(&self.table_name).await?;
        let mut all: HashMap<String, HashMap<String, TemperatureSeries>> = HashMap::new();
        for row in rows {
            all.entry(row.sensor)
                .or_default()
                .insert(row.run_id, row.temperatures);
        }
        Ok(all)
    }
}
