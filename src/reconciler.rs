//! # Reconciler Module
//!
//! Decision logic for a single identity fragment. `plan` reads a store
//! snapshot and decides, without writing anything, which cluster the fragment
//! belongs to, which primaries must be demoted, and whether a new contact is
//! needed. The plan records what it read so the caller can confirm nothing
//! changed before committing.

use crate::cluster::Cluster;
use crate::model::{Contact, ContactId, Fragment, IdentityView, NewContact};
use crate::store::{ChangeSet, CommitOutcome, ContactFilter, ContactStore, StoreOp};
use anyhow::{anyhow, Result};
use tracing::debug;

/// Everything a plan observed in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSet {
    /// Contacts matching the fragment's email or phone
    pub matched: Vec<Contact>,
    /// Primaries implicated by `matched`
    pub primary_ids: Vec<ContactId>,
    /// Every contact of the implicated clusters
    pub loaded: Vec<Contact>,
}

impl ReadSet {
    fn matched_filter(fragment: &Fragment) -> ContactFilter {
        ContactFilter::identifiers(fragment.email(), fragment.phone_number())
    }

    /// Re-read the same predicates and compare with what the plan saw.
    pub fn is_current(&self, store: &dyn ContactStore, fragment: &Fragment) -> Result<bool> {
        if store.find(&Self::matched_filter(fragment))? != self.matched {
            return Ok(false);
        }
        if self.primary_ids.is_empty() {
            return Ok(true);
        }
        Ok(store.find(&ContactFilter::Clusters(self.primary_ids.clone()))? == self.loaded)
    }
}

/// What a reconciliation will do to the store
#[derive(Debug, Clone)]
pub struct Plan {
    fragment: Fragment,
    read_set: ReadSet,
    changes: ChangeSet,
    /// The resolved cluster, absent when the fragment starts a new identity
    cluster: Option<Cluster>,
    demoted: Vec<ContactId>,
    creates_secondary: bool,
}

impl Plan {
    pub fn read_set(&self) -> &ReadSet {
        &self.read_set
    }

    /// Whether the store still shows what this plan read.
    pub fn is_current(&self, store: &dyn ContactStore) -> Result<bool> {
        self.read_set.is_current(store, &self.fragment)
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// True when the fragment is already fully represented.
    pub fn is_read_only(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_new_identity(&self) -> bool {
        self.cluster.is_none()
    }

    /// Primaries this plan turns into secondaries.
    pub fn demoted(&self) -> &[ContactId] {
        &self.demoted
    }

    pub fn creates_secondary(&self) -> bool {
        self.creates_secondary
    }

    pub fn primary_id(&self) -> Option<ContactId> {
        self.cluster.as_ref().map(Cluster::primary_id)
    }

    /// Consolidated view for a plan that needed no writes.
    pub fn view(&self) -> Result<IdentityView> {
        self.cluster
            .as_ref()
            .map(Cluster::view)
            .ok_or_else(|| anyhow!("new identity has no view before commit"))
    }

    /// Fold the committed writes into the planned cluster and build the view.
    pub fn finish(self, outcome: CommitOutcome) -> Result<IdentityView> {
        let mut cluster = match self.cluster {
            Some(cluster) => cluster,
            None => {
                let primary = outcome
                    .created
                    .iter()
                    .find(|contact| contact.is_primary())
                    .cloned()
                    .ok_or_else(|| anyhow!("commit did not create the new primary"))?;
                Cluster::singleton(primary)
            }
        };
        cluster.refresh(&outcome.updated);
        cluster.refresh(&outcome.created);
        Ok(cluster.view())
    }
}

/// Decide how `fragment` reconciles against the current store contents.
pub fn plan(store: &dyn ContactStore, fragment: &Fragment) -> Result<Plan> {
    let matched = store.find(&ReadSet::matched_filter(fragment))?;

    if matched.is_empty() {
        debug!(%fragment, "no existing contact; starting a new identity");
        let mut changes = ChangeSet::new();
        changes.push(StoreOp::Create(NewContact::primary(fragment)));
        return Ok(Plan {
            fragment: fragment.clone(),
            read_set: ReadSet {
                matched,
                primary_ids: Vec::new(),
                loaded: Vec::new(),
            },
            changes,
            cluster: None,
            demoted: Vec::new(),
            creates_secondary: false,
        });
    }

    let mut primary_ids: Vec<ContactId> = matched.iter().map(Contact::primary_id).collect();
    primary_ids.sort();
    primary_ids.dedup();

    let loaded = store.find(&ContactFilter::Clusters(primary_ids.clone()))?;
    let merge = Cluster::resolve(loaded.clone())
        .ok_or_else(|| anyhow!("clusters {:?} vanished while loading", primary_ids))?;

    let primary = merge.primary;
    let mut changes = ChangeSet::new();
    if !merge.demote.is_empty() {
        debug!(%primary, demoted = ?merge.demote, "fragment bridges clusters");
        changes.push(StoreOp::Demote {
            ids: merge.demote.clone(),
            primary,
        });
        changes.push(StoreOp::Repoint {
            from: merge.demote.clone(),
            primary,
        });
    }
    if merge.promote {
        debug!(%primary, "oldest cluster member is not primary; promoting");
        changes.push(StoreOp::Promote { id: primary });
    }

    let creates_secondary = merge.cluster.has_novel_information(fragment);
    if creates_secondary {
        changes.push(StoreOp::Create(NewContact::secondary(fragment, primary)));
    }

    Ok(Plan {
        fragment: fragment.clone(),
        read_set: ReadSet {
            matched,
            primary_ids,
            loaded,
        },
        changes,
        cluster: Some(merge.cluster),
        demoted: merge.demote,
        creates_secondary,
    })
}
