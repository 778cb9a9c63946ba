use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::Clock;
use crate::ledger::{Ledger, QuotaPolicy};
use crate::limits::*;
use crate::reaper::{self, Housekeeping};

/// One ledger per organization. Tenant = database name from the pgwire
/// connection; each gets its own WAL file and housekeeping task.
pub struct TenantManager {
    ledgers: DashMap<String, Arc<Ledger>>,
    data_dir: PathBuf,
    housekeeping: Housekeeping,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        housekeeping: Housekeeping,
        policy: QuotaPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledgers: DashMap::new(),
            data_dir,
            housekeeping,
            policy,
            clock,
        }
    }

    /// Get or lazily open the ledger for a tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Ledger>> {
        if let Some(ledger) = self.ledgers.get(tenant) {
            return Ok(ledger.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.ledgers.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Only [A-Za-z0-9_-] reaches the file system.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // The entry lock makes a racing second open of the same tenant wait
        // for the first instead of replaying the WAL twice.
        let ledger = match self.ledgers.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let ledger = Arc::new(Ledger::open(
                    wal_path,
                    self.policy.clone(),
                    self.clock.clone(),
                )?);
                e.insert(ledger.clone());
                ledger
            }
        };

        tokio::spawn(reaper::run_housekeeper(ledger.clone(), self.housekeeping));
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.ledgers.len() as f64);
        tracing::info!("opened tenant {tenant}");
        Ok(ledger)
    }

    pub fn tenant_count(&self) -> usize {
        self.ledgers.len()
    }
}
