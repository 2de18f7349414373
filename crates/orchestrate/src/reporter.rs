//! Deployment reporting: live progress plus the final manifest.

use std::path::Path;

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::book::{AddressBook, DeploymentRecord, RecordStatus};
use crate::error::Result;
use crate::plan::InstanceId;

/// Observer of per-unit deployment progress.
pub trait DeployObserver {
    fn on_unit_started(&mut self, network: &str, unit: &InstanceId);
    fn on_unit_confirmed(&mut self, record: &DeploymentRecord);
    fn on_unit_failed(&mut self, network: &str, unit: &InstanceId, error: &str);
}

/// Observer that reports progress through the log.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl DeployObserver for ConsoleReporter {
    fn on_unit_started(&mut self, network: &str, unit: &InstanceId) {
        tracing::info!(network, unit = %unit, "Deploying unit");
    }

    fn on_unit_confirmed(&mut self, record: &DeploymentRecord) {
        tracing::info!(
            network = %record.network,
            unit = %record.instance,
            address = ?record.address,
            tx = ?record.tx_hash,
            "Unit confirmed"
        );
    }

    fn on_unit_failed(&mut self, network: &str, unit: &InstanceId, error: &str) {
        tracing::error!(network, unit = %unit, error, "Unit failed");
    }
}

/// One row of the deployment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub instance: InstanceId,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of the latest known state of every instance on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub network: String,
    pub generated_at: DateTime<Utc>,
    pub units: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from the address book, keeping the latest record per
    /// instance in first-seen order.
    pub fn from_book(book: &mut AddressBook, network: &str) -> Result<Self> {
        let mut order: Vec<InstanceId> = Vec::new();
        let mut latest = std::collections::BTreeMap::new();
        for record in book.records(network)? {
            if !latest.contains_key(&record.instance) {
                order.push(record.instance.clone());
            }
            latest.insert(record.instance.clone(), record);
        }

        let units = order
            .into_iter()
            .filter_map(|instance| latest.remove(&instance))
            .map(|record| ManifestEntry {
                instance: record.instance,
                status: record.status,
                address: record.address,
                tx_hash: record.tx_hash,
                error: record.error,
            })
            .collect();

        Ok(Self {
            network: network.to_string(),
            generated_at: Utc::now(),
            units,
        })
    }

    /// Render the manifest as a table for terminal display.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Instance", "Status", "Address", "Transaction"]);
        for entry in &self.units {
            table.add_row(vec![
                Cell::new(entry.instance.as_str()),
                Cell::new(entry.status),
                Cell::new(
                    entry
                        .address
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::new(
                    entry
                        .tx_hash
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }
        table.to_string()
    }

    /// Write the manifest as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), network = %self.network, "Manifest written");
        Ok(())
    }
}
