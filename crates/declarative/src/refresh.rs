//! Drift detection and crash reconciliation
//!
//! Recorded state is never trusted as-is: before planning, every record is
//! re-read from the provider and every pending entry left by an interrupted
//! run is looked up by address. Reads run in parallel; the state writes that
//! follow happen one at a time on the calling thread.

use crate::error::{Error, Result};
use crate::state::{StateRecord, StateStore};
use crate::types::Address;
use cloudkit::{CloudApi, LogCallback, RemoteObject, RetryConfig, with_retry};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What refresh found for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "drift", rename_all = "snake_case")]
pub enum Drift {
    /// The object no longer exists; its record was removed
    Deleted { remote_id: String },
    /// Input attributes were changed outside this tool
    Changed { attributes: Vec<String> },
    /// An interrupted create did reach the provider; the object is now recorded
    Adopted { remote_id: String },
    /// An interrupted create never reached the provider
    Abandoned,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::Deleted { remote_id } => write!(f, "{remote_id} was deleted outside stratum"),
            Drift::Changed { attributes } => {
                write!(f, "changed outside stratum: {}", attributes.join(", "))
            }
            Drift::Adopted { remote_id } => {
                write!(f, "adopted {remote_id} created by an interrupted run")
            }
            Drift::Abandoned => write!(f, "interrupted create never reached the provider"),
        }
    }
}

/// Everything refresh changed in state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub entries: Vec<(Address, Drift)>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, address: &Address) -> Option<&Drift> {
        self.entries
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, d)| d)
    }
}

enum Probe {
    Record { address: Address, remote_id: String },
    Pending { address: Address },
}

impl Probe {
    fn address(&self) -> &Address {
        match self {
            Probe::Record { address, .. } | Probe::Pending { address } => address,
        }
    }

    fn run(&self, api: &dyn CloudApi, retry: &RetryConfig) -> Result<Option<RemoteObject>> {
        let address = self.address();
        let label = format!("refresh {address}");
        let callback = LogCallback { label: &label };
        with_retry(retry, Some(&callback), || match self {
            Probe::Record { remote_id, .. } => api.read(address.kind, remote_id),
            Probe::Pending { .. } => api.lookup(address.kind, &address.to_string()),
        })
        .map_err(|source| Error::Provider {
            address: address.to_string(),
            source,
        })
    }
}

/// Reconcile state with what the provider reports
pub fn refresh(
    store: &mut StateStore,
    api: &dyn CloudApi,
    retry: &RetryConfig,
    jobs: usize,
) -> Result<DriftReport> {
    let state = store.state();
    let mut probes: Vec<Probe> = state
        .resources
        .values()
        .map(|r| Probe::Record {
            address: r.address.clone(),
            remote_id: r.remote_id.clone(),
        })
        .collect();
    probes.extend(state.pending.keys().map(|a| Probe::Pending { address: a.clone() }));

    if probes.is_empty() {
        return Ok(DriftReport::default());
    }
    log::info!("Refreshing {} resources", probes.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;
    let observed: Vec<Result<Option<RemoteObject>>> =
        pool.install(|| probes.par_iter().map(|p| p.run(api, retry)).collect());

    let mut report = DriftReport::default();
    for (probe, result) in probes.into_iter().zip(observed) {
        let remote = result?;
        match probe {
            Probe::Record { address, remote_id } => {
                let Some(object) = remote else {
                    log::warn!("{address}: {remote_id} no longer exists");
                    store.remove(&address)?;
                    report.entries.push((address, Drift::Deleted { remote_id }));
                    continue;
                };
                let Some(old) = store.get(&address).cloned() else {
                    continue;
                };
                let mut fresh = StateRecord::from_remote(address.clone(), &object, old.dependencies.clone());
                fresh.applied_at = old.applied_at;

                let changed = changed_inputs(&old, &fresh);
                if !changed.is_empty() {
                    log::warn!("{address}: changed outside stratum: {}", changed.join(", "));
                    report.entries.push((
                        address.clone(),
                        Drift::Changed {
                            attributes: changed,
                        },
                    ));
                }
                if fresh != old {
                    store.record(fresh)?;
                }
            }
            Probe::Pending { address } => {
                let dependencies = store
                    .state()
                    .pending
                    .get(&address)
                    .map(|p| p.dependencies.clone())
                    .unwrap_or_default();
                match remote {
                    Some(object) => {
                        log::info!("{address}: adopting {} from an interrupted run", object.id);
                        let remote_id = object.id.clone();
                        store.record(StateRecord::from_remote(address.clone(), &object, dependencies))?;
                        report.entries.push((address, Drift::Adopted { remote_id }));
                    }
                    None => {
                        log::info!("{address}: interrupted create left nothing behind");
                        store.clear_pending(&address)?;
                        report.entries.push((address, Drift::Abandoned));
                    }
                }
            }
        }
    }

    Ok(report)
}

fn changed_inputs(old: &StateRecord, fresh: &StateRecord) -> Vec<String> {
    fn present<'a>(record: &'a StateRecord, name: &str) -> Option<&'a serde_json::Value> {
        record.attributes.get(name).filter(|v| !v.is_null())
    }

    let names: BTreeSet<&String> = old.attributes.keys().chain(fresh.attributes.keys()).collect();
    names
        .into_iter()
        .filter(|name| present(old, name.as_str()) != present(fresh, name.as_str()))
        .cloned()
        .collect()
}
