//! Append-only address book: the durable record of deployment outcomes.

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrateError, Result};
use crate::plan::InstanceId;

/// Lifecycle state of one deployment record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    /// Transaction submitted, confirmation not yet observed.
    Pending,
    /// Confirmed at the configured depth; the address is final.
    Confirmed,
    /// Deployment failed terminally.
    Failed,
}

/// One append-only entry in the address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub instance: InstanceId,
    pub network: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentRecord {
    pub fn pending(instance: InstanceId, network: &str, tx_hash: B256) -> Self {
        Self {
            instance,
            network: network.to_string(),
            status: RecordStatus::Pending,
            address: None,
            tx_hash: Some(tx_hash),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn confirmed(instance: InstanceId, network: &str, address: Address, tx_hash: B256) -> Self {
        Self {
            instance,
            network: network.to_string(),
            status: RecordStatus::Confirmed,
            address: Some(address),
            tx_hash: Some(tx_hash),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(instance: InstanceId, network: &str, error: String) -> Self {
        Self {
            instance,
            network: network.to_string(),
            status: RecordStatus::Failed,
            address: None,
            tx_hash: None,
            timestamp: Utc::now(),
            error: Some(error),
        }
    }
}

/// Durable, append-only store of deployment records, one JSONL file per
/// network under the book directory.
///
/// Appends take an exclusive file lock and write the record as a single line
/// followed by a flush and fsync, so a record is either fully present or
/// reduced to a torn trailing line that the next read skips.
#[derive(Debug)]
pub struct AddressBook {
    dir: PathBuf,
    /// Networks whose file has been read and parsed cleanly this session.
    validated: HashSet<String>,
    /// Networks whose file showed interior corruption. Further appends to
    /// these are refused until the operator repairs the file.
    poisoned: HashSet<String>,
}

impl AddressBook {
    /// Open the book at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            validated: HashSet::new(),
            poisoned: HashSet::new(),
        })
    }

    fn network_file(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.jsonl"))
    }

    /// Append a record durably.
    pub fn append(&mut self, record: &DeploymentRecord) -> Result<()> {
        if self.poisoned.contains(&record.network) || !self.validated.contains(&record.network) {
            // Parse the existing file before extending it, so corruption is
            // reported instead of buried under fresh records.
            self.records(&record.network)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let file_path = self.network_file(&record.network);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        file.lock_exclusive()?;
        let result = file
            .write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all());
        fs2::FileExt::unlock(&file)?;
        result?;

        tracing::debug!(
            network = %record.network,
            instance = %record.instance,
            status = %record.status,
            "Address book record appended"
        );
        Ok(())
    }

    /// All records for a network, oldest first.
    ///
    /// An unparsable final line without a trailing newline is treated as a
    /// torn write from an interrupted append and skipped with a warning. An
    /// unparsable line anywhere else is corruption and poisons further
    /// appends to that network.
    pub fn records(&mut self, network: &str) -> Result<Vec<DeploymentRecord>> {
        let file_path = self.network_file(network);
        if !file_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&file_path)?;
        let ends_with_newline = content.ends_with('\n');

        let lines: Vec<&str> = content.lines().collect();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeploymentRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let is_torn_tail = index == lines.len() - 1 && !ends_with_newline;
                    if is_torn_tail {
                        tracing::warn!(
                            network,
                            line = index + 1,
                            "Skipping torn trailing line from an interrupted append"
                        );
                        continue;
                    }
                    self.poisoned.insert(network.to_string());
                    return Err(OrchestrateError::AddressBookCorruption {
                        network: network.to_string(),
                        line: index + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.validated.insert(network.to_string());
        Ok(records)
    }

    /// Most recent record for one instance on a network, if any.
    pub fn get(
        &mut self,
        network: &str,
        instance: &InstanceId,
    ) -> Result<Option<DeploymentRecord>> {
        Ok(self.latest(network)?.remove(instance))
    }

    /// Lazy sequence of confirmed records for a network, oldest first.
    ///
    /// Reads the file line by line instead of buffering it, so manifests can
    /// be generated over large books. Each call starts a fresh pass.
    pub fn list_confirmed(&self, network: &str) -> Result<ConfirmedRecords> {
        let file_path = self.network_file(network);
        let reader = if file_path.exists() {
            Some(BufReader::new(std::fs::File::open(&file_path)?))
        } else {
            None
        };
        Ok(ConfirmedRecords {
            reader,
            network: network.to_string(),
            line: 0,
        })
    }

    /// Latest record per instance for a network.
    pub fn latest(&mut self, network: &str) -> Result<BTreeMap<InstanceId, DeploymentRecord>> {
        let mut latest = BTreeMap::new();
        for record in self.records(network)? {
            latest.insert(record.instance.clone(), record);
        }
        Ok(latest)
    }

    /// Addresses of instances whose latest record is confirmed.
    pub fn confirmed_addresses(&mut self, network: &str) -> Result<BTreeMap<InstanceId, Address>> {
        let mut confirmed = BTreeMap::new();
        for (instance, record) in self.latest(network)? {
            if record.status == RecordStatus::Confirmed {
                if let Some(address) = record.address {
                    confirmed.insert(instance, address);
                }
            }
        }
        Ok(confirmed)
    }
}

/// Iterator over the confirmed records of one network file.
///
/// A confirmed record is final for its instance, so records are yielded as
/// encountered without needing the whole file in memory.
#[derive(Debug)]
pub struct ConfirmedRecords {
    reader: Option<BufReader<std::fs::File>>,
    network: String,
    line: usize,
}

impl Iterator for ConfirmedRecords {
    type Item = Result<DeploymentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            let mut buf = String::new();
            match reader.read_line(&mut buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e.into()));
                }
            }
            self.line += 1;
            let complete = buf.ends_with('\n');
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<DeploymentRecord>(trimmed) {
                Ok(record) if record.status == RecordStatus::Confirmed => {
                    return Some(Ok(record));
                }
                Ok(_) => continue,
                Err(_) if !complete => {
                    tracing::warn!(
                        network = %self.network,
                        line = self.line,
                        "Skipping torn trailing line from an interrupted append"
                    );
                    self.reader = None;
                    return None;
                }
                Err(e) => {
                    self.reader = None;
                    return Some(Err(OrchestrateError::AddressBookCorruption {
                        network: self.network.clone(),
                        line: self.line,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}
