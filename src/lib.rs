//! # Identirust
//!
//! Contact identity reconciliation. Partial contact fragments (an email, a
//! phone number, or both) are resolved into clusters that each represent one
//! real customer: one primary contact, the oldest, plus secondaries linked
//! directly to it.
//!
//! Each `identify` call is a transaction over the contact store. Planning
//! happens against a shared snapshot; the commit re-validates what the plan
//! read and restarts from scratch when a concurrent call got there first.

pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod persistence;
pub mod reconciler;
pub mod store;
#[doc(hidden)]
pub mod test_support;

// Re-export main types for convenience
pub use cluster::{Cluster, MergePlan};
pub use config::{IdentirustConfig, ReconcileTuning};
pub use error::ReconcileError;
pub use model::{
    creation_order, Contact, ContactId, Fragment, IdentityView, LinkPrecedence, NewContact,
};
pub use persistence::{PersistentOpenOptions, PersistentStore};
pub use store::{ChangeSet, CommitOutcome, ContactFilter, ContactStore, Store, StoreOp};

use parking_lot::RwLock;
use reconciler::Plan;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Main API for identity reconciliation
pub struct Identirust {
    store: RwLock<Box<dyn ContactStore>>,
    tuning: ReconcileTuning,
}

impl Identirust {
    /// Create an instance backed by an in-memory store
    pub fn new() -> Self {
        Self::with_store(Store::new())
    }

    /// Create an instance with a custom store implementation.
    pub fn with_store<S>(store: S) -> Self
    where
        S: ContactStore + 'static,
    {
        Self::with_store_and_tuning(store, ReconcileTuning::default())
    }

    pub fn with_store_and_tuning<S>(store: S, tuning: ReconcileTuning) -> Self
    where
        S: ContactStore + 'static,
    {
        Self {
            store: RwLock::new(Box::new(store)),
            tuning,
        }
    }

    /// Open the store described by `config`: RocksDB when a data directory
    /// is configured, memory otherwise.
    pub fn open(config: &IdentirustConfig) -> anyhow::Result<Self> {
        let tuning = config.reconcile.to_tuning();
        match &config.storage.data_dir {
            Some(path) => {
                let options = PersistentOpenOptions {
                    repair: config.storage.repair,
                };
                let store = PersistentStore::open_with_options(path, options)?;
                info!(path = %path.display(), contacts = store.len(), "using persistent contact store");
                Ok(Self::with_store_and_tuning(store, tuning))
            }
            None => {
                info!("using in-memory contact store");
                Ok(Self::with_store_and_tuning(Store::new(), tuning))
            }
        }
    }

    /// Reconcile an (email, phone number) pair and return the consolidated
    /// identity it belongs to. Empty strings count as absent.
    pub fn identify(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<IdentityView, ReconcileError> {
        let fragment = Fragment::new(
            email.map(str::to_string),
            phone_number.map(str::to_string),
        )?;
        self.identify_fragment(&fragment)
    }

    /// Reconcile a validated fragment.
    ///
    /// Every attempt restarts from the identifier lookup. The final attempt
    /// holds the write lock for the whole plan unless the tuning disables the
    /// pessimistic fallback, in which case exhaustion yields
    /// `ReconcileError::Conflict`.
    #[instrument(skip(self, fragment), fields(fragment = %fragment), level = "debug")]
    pub fn identify_fragment(&self, fragment: &Fragment) -> Result<IdentityView, ReconcileError> {
        let max_attempts = self.tuning.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.tuning.is_pessimistic(attempt) {
                let mut store = self.store.write();
                let plan = reconciler::plan(&**store, fragment)?;
                return commit_plan(&mut **store, plan);
            }

            let plan = {
                let store = self.store.read();
                reconciler::plan(&**store, fragment)?
            };
            if plan.is_read_only() {
                debug!(attempt, "fragment already represented");
                return Ok(plan.view()?);
            }

            let mut store = self.store.write();
            if !plan.is_current(&**store)? {
                warn!(attempt, max_attempts, "contacts changed while planning; retrying");
                continue;
            }
            return commit_plan(&mut **store, plan);
        }
        Err(ReconcileError::Conflict {
            attempts: max_attempts,
        })
    }

    /// Consolidated view of the cluster containing `id`, without writing.
    pub fn cluster_of(&self, id: ContactId) -> Result<Option<IdentityView>, ReconcileError> {
        let store = self.store.read();
        let Some(contact) = store.get(id)? else {
            return Ok(None);
        };
        let loaded = store.find(&ContactFilter::Clusters(vec![contact.primary_id()]))?;
        Ok(Cluster::resolve(loaded).map(|plan| plan.cluster.view()))
    }

    /// Every stored contact in creation order.
    pub fn contacts(&self) -> Result<Vec<Contact>, ReconcileError> {
        Ok(self.store.read().find(&ContactFilter::All)?)
    }

    pub fn contact_count(&self) -> usize {
        self.store.read().len()
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.store.read().flush()
    }

    pub fn checkpoint(&self, path: &Path) -> anyhow::Result<()> {
        self.store.read().checkpoint(path)
    }
}

impl Default for Identirust {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_plan(store: &mut dyn ContactStore, plan: Plan) -> Result<IdentityView, ReconcileError> {
    if plan.is_read_only() {
        return Ok(plan.view()?);
    }
    let outcome = store.commit(plan.changes().clone())?;

    if plan.is_new_identity() {
        if let Some(created) = outcome.created.first() {
            info!(primary = %created.id, "created primary contact");
        }
    } else if let Some(primary) = plan.primary_id() {
        if !plan.demoted().is_empty() {
            info!(%primary, demoted = ?plan.demoted(), "merged clusters");
        }
        if plan.creates_secondary() {
            debug!(%primary, "attached secondary contact");
        }
    }

    Ok(plan.finish(outcome)?)
}
