//! # Cluster Module
//!
//! In-memory view of one resolved identity: an owning primary plus its
//! secondaries in creation order. Clusters are at most two levels deep, so a
//! merge flattens every absorbed contact directly onto the surviving primary.

use crate::model::{creation_order, Contact, ContactId, Fragment, IdentityView, LinkPrecedence};
use hashbrown::HashSet;

/// One primary contact and the secondaries linked to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    primary: Contact,
    /// Secondaries ordered by `creation_order`
    members: Vec<Contact>,
}

/// Outcome of resolving one or more loaded clusters into a single cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Oldest contact of the loaded set; the sole surviving primary
    pub primary: ContactId,
    /// Primaries that must become secondaries of `primary`
    pub demote: Vec<ContactId>,
    /// Set when the oldest contact is currently a secondary
    pub promote: bool,
    /// The merged cluster as it will look once the plan is applied
    pub cluster: Cluster,
}

impl MergePlan {
    /// True when the store needs no link changes.
    pub fn is_noop(&self) -> bool {
        self.demote.is_empty() && !self.promote
    }
}

impl Cluster {
    pub fn singleton(primary: Contact) -> Self {
        Self {
            primary,
            members: Vec::new(),
        }
    }

    /// Resolve every contact loaded for the implicated primaries.
    ///
    /// The oldest contact wins regardless of its current precedence; every
    /// other primary is demoted and all members are flattened onto the winner.
    /// Returns `None` for an empty input.
    pub fn resolve(mut loaded: Vec<Contact>) -> Option<MergePlan> {
        if loaded.is_empty() {
            return None;
        }
        loaded.sort_by(creation_order);
        loaded.dedup_by_key(|contact| contact.id);

        let mut contacts = loaded.into_iter();
        let mut primary = contacts.next()?;
        let promote = !primary.is_primary();
        let primary_id = primary.id;

        let mut demote = Vec::new();
        let members: Vec<Contact> = contacts
            .map(|mut contact| {
                if contact.is_primary() {
                    demote.push(contact.id);
                }
                contact.link_precedence = LinkPrecedence::Secondary;
                contact.linked_id = Some(primary_id);
                contact
            })
            .collect();

        primary.link_precedence = LinkPrecedence::Primary;
        primary.linked_id = None;

        Some(MergePlan {
            primary: primary_id,
            demote,
            promote,
            cluster: Self { primary, members },
        })
    }

    pub fn primary(&self) -> &Contact {
        &self.primary
    }

    pub fn primary_id(&self) -> ContactId {
        self.primary.id
    }

    pub fn members(&self) -> &[Contact] {
        &self.members
    }

    /// Primary first, then secondaries in creation order.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        std::iter::once(&self.primary).chain(self.members.iter())
    }

    pub fn len(&self) -> usize {
        self.members.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: ContactId) -> bool {
        self.contacts().any(|contact| contact.id == id)
    }

    pub fn contains_email(&self, email: &str) -> bool {
        self.contacts()
            .any(|contact| contact.email.as_deref() == Some(email))
    }

    pub fn contains_phone(&self, phone_number: &str) -> bool {
        self.contacts()
            .any(|contact| contact.phone_number.as_deref() == Some(phone_number))
    }

    /// Whether the fragment carries an email or phone this cluster lacks.
    pub fn has_novel_information(&self, fragment: &Fragment) -> bool {
        let novel_email = fragment
            .email()
            .is_some_and(|email| !self.contains_email(email));
        let novel_phone = fragment
            .phone_number()
            .is_some_and(|phone| !self.contains_phone(phone));
        novel_email || novel_phone
    }

    /// Replace members with freshly written versions and add new secondaries.
    pub fn refresh(&mut self, written: &[Contact]) {
        for contact in written {
            if contact.id == self.primary.id {
                self.primary = contact.clone();
            } else if contact.linked_id == Some(self.primary.id) {
                match self.members.iter_mut().find(|member| member.id == contact.id) {
                    Some(member) => *member = contact.clone(),
                    None => self.members.push(contact.clone()),
                }
            }
        }
        self.members.sort_by(creation_order);
    }

    /// Consolidated view: the primary's identifiers first, then everything
    /// else in cluster order, without duplicates.
    pub fn view(&self) -> IdentityView {
        let mut seen_emails = HashSet::new();
        let mut seen_phones = HashSet::new();
        let mut emails = Vec::new();
        let mut phone_numbers = Vec::new();

        for contact in self.contacts() {
            if let Some(email) = contact.email.as_deref() {
                if seen_emails.insert(email) {
                    emails.push(email.to_string());
                }
            }
            if let Some(phone) = contact.phone_number.as_deref() {
                if seen_phones.insert(phone) {
                    phone_numbers.push(phone.to_string());
                }
            }
        }

        IdentityView {
            primary_contact_id: self.primary.id,
            emails,
            phone_numbers,
            secondary_contact_ids: self.members.iter().map(|member| member.id).collect(),
        }
    }
}
