use anyhow::{anyhow, Result};
use hashbrown::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};

use crate::model::{Contact, ContactId, Fragment, LinkPrecedence};
use crate::store::{ChangeSet, CommitOutcome, ContactFilter, ContactStore, Store};

/// Build a fragment from optional string slices.
pub fn fragment(email: Option<&str>, phone_number: Option<&str>) -> Fragment {
    Fragment::new(email.map(str::to_string), phone_number.map(str::to_string))
        .expect("fragment needs an identifier")
}

/// A contact with explicit id, link and creation time.
pub fn contact(
    id: u64,
    email: Option<&str>,
    phone_number: Option<&str>,
    linked_id: Option<u64>,
    created_at: OffsetDateTime,
) -> Contact {
    Contact {
        id: ContactId(id),
        email: email.map(str::to_string),
        phone_number: phone_number.map(str::to_string),
        link_precedence: if linked_id.is_some() {
            LinkPrecedence::Secondary
        } else {
            LinkPrecedence::Primary
        },
        linked_id: linked_id.map(ContactId),
        created_at,
        updated_at: created_at,
    }
}

/// An in-memory store pre-populated with `contacts`.
pub fn seeded_store(contacts: Vec<Contact>) -> Store {
    let mut store = Store::new();
    for contact in contacts {
        store
            .insert_contact(contact)
            .expect("seed contact must be well formed");
    }
    store
}

/// Check the single-primary-per-cluster invariants over a whole store.
///
/// Returns the number of clusters.
pub fn check_cluster_invariants(store: &dyn ContactStore) -> Result<usize> {
    let contacts = store.find(&ContactFilter::All)?;
    let by_id: HashMap<ContactId, &Contact> =
        contacts.iter().map(|contact| (contact.id, contact)).collect();

    let mut clusters = 0;
    for contact in &contacts {
        if !contact.is_well_formed() {
            return Err(anyhow!("{} is malformed", contact.id));
        }
        let Some(linked) = contact.linked_id else {
            clusters += 1;
            continue;
        };
        let primary = by_id
            .get(&linked)
            .ok_or_else(|| anyhow!("{} links to missing {}", contact.id, linked))?;
        if !primary.is_primary() {
            return Err(anyhow!("{} links to secondary {}", contact.id, linked));
        }
        if crate::model::creation_order(primary, contact) != std::cmp::Ordering::Less {
            return Err(anyhow!("{} is older than its primary {}", contact.id, linked));
        }
    }

    // No identifier may be shared across clusters.
    let mut owner_of_email: HashMap<&str, ContactId> = HashMap::new();
    let mut owner_of_phone: HashMap<&str, ContactId> = HashMap::new();
    for contact in &contacts {
        let owner = contact.primary_id();
        if let Some(email) = contact.email.as_deref() {
            let existing = *owner_of_email.entry(email).or_insert(owner);
            if existing != owner {
                return Err(anyhow!("email {email} spans {existing} and {owner}"));
            }
        }
        if let Some(phone) = contact.phone_number.as_deref() {
            let existing = *owner_of_phone.entry(phone).or_insert(owner);
            if existing != owner {
                return Err(anyhow!("phone {phone} spans {existing} and {owner}"));
            }
        }
    }

    Ok(clusters)
}

/// A store whose identifier lookups never return the same rows twice.
///
/// Every `Identifiers` lookup bumps `updated_at` on the matched contacts, as a
/// writer touching them between every read would. Optimistic validation
/// therefore never succeeds against it.
pub struct ChurningStore {
    inner: Store,
    reads: AtomicI64,
}

impl ChurningStore {
    pub fn new(inner: Store) -> Self {
        Self {
            inner,
            reads: AtomicI64::new(0),
        }
    }
}

impl ContactStore for ChurningStore {
    fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let mut contacts = self.inner.find(filter)?;
        if matches!(filter, ContactFilter::Identifiers { .. }) {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            for contact in &mut contacts {
                contact.updated_at += Duration::nanoseconds(read);
            }
        }
        Ok(contacts)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        self.inner.get(id)
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<CommitOutcome> {
        self.inner.commit(changes)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
