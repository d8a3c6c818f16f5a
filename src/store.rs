//! # Store Module
//!
//! Storage primitives for contacts: predicate lookups ordered by creation,
//! and atomic change sets made of create / demote / repoint / promote
//! operations. `Store` is the in-memory implementation and also serves as
//! the read mirror of `PersistentStore`.

use crate::model::{creation_order, Contact, ContactId, LinkPrecedence, NewContact};
use anyhow::{anyhow, Result};
use hashbrown::{HashMap, HashSet};
use std::path::Path;
use time::OffsetDateTime;

/// Predicate for contact lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactFilter {
    /// Contacts whose email equals `email` OR whose phone equals `phone_number`
    Identifiers {
        email: Option<String>,
        phone_number: Option<String>,
    },
    /// Contacts whose id is in the set OR whose linked id is in the set
    Clusters(Vec<ContactId>),
    /// Every stored contact
    All,
}

impl ContactFilter {
    pub fn identifiers(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self::Identifiers {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// One mutation inside a change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Turn the given primaries into secondaries of `primary`
    Demote {
        ids: Vec<ContactId>,
        primary: ContactId,
    },
    /// Point every secondary linked to one of `from` at `primary` instead
    Repoint {
        from: Vec<ContactId>,
        primary: ContactId,
    },
    /// Turn a secondary back into a primary
    Promote { id: ContactId },
    /// Insert a new contact
    Create(NewContact),
}

/// Ordered list of operations applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    ops: Vec<StoreOp>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

impl From<Vec<StoreOp>> for ChangeSet {
    fn from(ops: Vec<StoreOp>) -> Self {
        Self { ops }
    }
}

/// Contacts written by a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub created: Vec<Contact>,
    pub updated: Vec<Contact>,
}

/// Abstraction over contact storage backends.
pub trait ContactStore: Send + Sync {
    /// All contacts matching `filter`, ordered by creation time then id.
    fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>>;

    fn get(&self, id: ContactId) -> Result<Option<Contact>>;

    /// Apply `changes` atomically. On error nothing is written.
    fn commit(&mut self, changes: ChangeSet) -> Result<CommitOutcome>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact> {
        let outcome = self.commit(ChangeSet::from(vec![StoreOp::Create(contact)]))?;
        outcome
            .created
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("commit did not report the created contact"))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn checkpoint(&self, _path: &Path) -> Result<()> {
        Err(anyhow!("checkpoint not supported by this store"))
    }
}

/// A change set resolved against a store snapshot, ready to publish.
#[derive(Debug, Clone)]
pub(crate) struct StagedCommit {
    pub(crate) written: Vec<Contact>,
    pub(crate) created: Vec<ContactId>,
    pub(crate) next_contact_id: u64,
    pub(crate) last_timestamp: Option<OffsetDateTime>,
}

impl StagedCommit {
    pub(crate) fn outcome(&self) -> CommitOutcome {
        let created: HashSet<ContactId> = self.created.iter().copied().collect();
        let (created, updated): (Vec<Contact>, Vec<Contact>) = self
            .written
            .iter()
            .cloned()
            .partition(|contact| created.contains(&contact.id));
        CommitOutcome { created, updated }
    }
}

/// In-memory contact storage with identifier and link indexes
#[derive(Debug, Clone)]
pub struct Store {
    /// All contacts indexed by ID
    contacts: HashMap<ContactId, Contact>,
    by_email: HashMap<String, Vec<ContactId>>,
    by_phone: HashMap<String, Vec<ContactId>>,
    /// primary id -> secondaries pointing at it
    by_linked: HashMap<ContactId, Vec<ContactId>>,
    /// Next available contact ID
    next_contact_id: u64,
    /// Latest creation/update stamp handed out
    last_timestamp: Option<OffsetDateTime>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            contacts: HashMap::new(),
            by_email: HashMap::new(),
            by_phone: HashMap::new(),
            by_linked: HashMap::new(),
            next_contact_id: 1,
            last_timestamp: None,
        }
    }

    pub fn next_contact_id(&self) -> u64 {
        self.next_contact_id
    }

    pub fn set_next_contact_id(&mut self, next: u64) {
        self.next_contact_id = next.max(1);
    }

    /// Insert a fully formed contact, e.g. when restoring from disk.
    ///
    /// The id sequence and clock floor are advanced past the contact.
    pub fn insert_contact(&mut self, contact: Contact) -> Result<()> {
        if !contact.is_well_formed() {
            return Err(anyhow!(
                "contact {} has precedence {} but linked id {:?}",
                contact.id,
                contact.link_precedence,
                contact.linked_id
            ));
        }
        self.next_contact_id = self.next_contact_id.max(contact.id.0 + 1);
        let newest = contact.created_at.max(contact.updated_at);
        self.last_timestamp = Some(self.last_timestamp.map_or(newest, |last| last.max(newest)));
        self.put_contact(contact);
        Ok(())
    }

    /// A timestamp never earlier than any previously issued one.
    pub(crate) fn next_timestamp(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Resolve a change set against the current state without mutating it.
    pub(crate) fn stage(&self, changes: &ChangeSet) -> Result<StagedCommit> {
        let now = self.next_timestamp();
        let mut overlay: HashMap<ContactId, Contact> = HashMap::new();
        let mut order: Vec<ContactId> = Vec::new();
        let mut created = Vec::new();
        let mut next_contact_id = self.next_contact_id;

        let current = |overlay: &HashMap<ContactId, Contact>, id: ContactId| {
            overlay
                .get(&id)
                .cloned()
                .or_else(|| self.contacts.get(&id).cloned())
        };

        for op in changes.ops() {
            match op {
                StoreOp::Demote { ids, primary } => {
                    for id in ids {
                        if id == primary {
                            return Err(anyhow!("cannot demote {} under itself", id));
                        }
                        let mut contact = current(&overlay, *id)
                            .ok_or_else(|| anyhow!("demote target {} not found", id))?;
                        contact.link_precedence = LinkPrecedence::Secondary;
                        contact.linked_id = Some(*primary);
                        contact.updated_at = now;
                        if overlay.insert(*id, contact).is_none() {
                            order.push(*id);
                        }
                    }
                }
                StoreOp::Repoint { from, primary } => {
                    let from: HashSet<ContactId> = from.iter().copied().collect();
                    let mut candidates: Vec<ContactId> = from
                        .iter()
                        .filter_map(|id| self.by_linked.get(id))
                        .flatten()
                        .copied()
                        .collect();
                    candidates.extend(
                        overlay
                            .values()
                            .filter(|contact| contact.linked_id.is_some_and(|l| from.contains(&l)))
                            .map(|contact| contact.id),
                    );
                    candidates.sort();
                    candidates.dedup();
                    for id in candidates {
                        if id == *primary {
                            continue;
                        }
                        let Some(mut contact) = current(&overlay, id) else {
                            continue;
                        };
                        if !contact.linked_id.is_some_and(|l| from.contains(&l)) {
                            continue;
                        }
                        contact.linked_id = Some(*primary);
                        contact.updated_at = now;
                        if overlay.insert(id, contact).is_none() {
                            order.push(id);
                        }
                    }
                }
                StoreOp::Promote { id } => {
                    let mut contact = current(&overlay, *id)
                        .ok_or_else(|| anyhow!("promote target {} not found", id))?;
                    contact.link_precedence = LinkPrecedence::Primary;
                    contact.linked_id = None;
                    contact.updated_at = now;
                    if overlay.insert(*id, contact).is_none() {
                        order.push(*id);
                    }
                }
                StoreOp::Create(new_contact) => {
                    let id = ContactId(next_contact_id);
                    next_contact_id = next_contact_id
                        .checked_add(1)
                        .ok_or_else(|| anyhow!("contact id sequence exhausted"))?;
                    overlay.insert(id, new_contact.clone().into_contact(id, now));
                    order.push(id);
                    created.push(id);
                }
            }
        }

        let written: Vec<Contact> = order
            .iter()
            .filter_map(|id| overlay.get(id).cloned())
            .collect();

        for contact in &written {
            if !contact.is_well_formed() {
                return Err(anyhow!("change set leaves {} malformed", contact.id));
            }
            if let Some(linked) = contact.linked_id {
                let target = current(&overlay, linked)
                    .ok_or_else(|| anyhow!("{} links to unknown contact {}", contact.id, linked))?;
                if !target.is_primary() {
                    return Err(anyhow!(
                        "{} links to {} which is not a primary",
                        contact.id,
                        linked
                    ));
                }
            }
        }

        let last_timestamp = if written.is_empty() {
            self.last_timestamp
        } else {
            Some(now)
        };

        Ok(StagedCommit {
            written,
            created,
            next_contact_id,
            last_timestamp,
        })
    }

    /// Publish a staged commit. Never fails.
    pub(crate) fn publish(&mut self, staged: StagedCommit) {
        for contact in staged.written {
            self.put_contact(contact);
        }
        self.next_contact_id = staged.next_contact_id;
        self.last_timestamp = staged.last_timestamp;
    }

    fn put_contact(&mut self, contact: Contact) {
        if let Some(previous) = self.contacts.remove(&contact.id) {
            if let Some(linked) = previous.linked_id {
                if let Some(members) = self.by_linked.get_mut(&linked) {
                    members.retain(|id| *id != previous.id);
                    if members.is_empty() {
                        self.by_linked.remove(&linked);
                    }
                }
            }
        } else {
            if let Some(email) = &contact.email {
                self.by_email.entry(email.clone()).or_default().push(contact.id);
            }
            if let Some(phone) = &contact.phone_number {
                self.by_phone.entry(phone.clone()).or_default().push(contact.id);
            }
        }
        if let Some(linked) = contact.linked_id {
            self.by_linked.entry(linked).or_default().push(contact.id);
        }
        self.contacts.insert(contact.id, contact);
    }

    fn collect(&self, ids: impl IntoIterator<Item = ContactId>) -> Vec<Contact> {
        let mut seen = HashSet::new();
        let mut contacts: Vec<Contact> = ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.contacts.get(&id).cloned())
            .collect();
        contacts.sort_by(creation_order);
        contacts
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactStore for Store {
    fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let contacts = match filter {
            ContactFilter::Identifiers {
                email,
                phone_number,
            } => {
                let by_email = email
                    .as_ref()
                    .and_then(|email| self.by_email.get(email))
                    .into_iter()
                    .flatten();
                let by_phone = phone_number
                    .as_ref()
                    .and_then(|phone| self.by_phone.get(phone))
                    .into_iter()
                    .flatten();
                self.collect(by_email.chain(by_phone).copied())
            }
            ContactFilter::Clusters(primaries) => {
                let members = primaries
                    .iter()
                    .filter_map(|id| self.by_linked.get(id))
                    .flatten()
                    .copied();
                self.collect(primaries.iter().copied().chain(members))
            }
            ContactFilter::All => self.collect(self.contacts.keys().copied()),
        };
        Ok(contacts)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.contacts.get(&id).cloned())
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<CommitOutcome> {
        if changes.is_empty() {
            return Ok(CommitOutcome::default());
        }
        let staged = self.stage(&changes)?;
        let outcome = staged.outcome();
        self.publish(staged);
        Ok(outcome)
    }

    fn len(&self) -> usize {
        self.contacts.len()
    }
}
