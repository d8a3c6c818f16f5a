//! # Data Model
//!
//! Core data structures for contact reconciliation: contacts, their link
//! precedence, incoming fragments and the consolidated identity view.

use crate::error::ReconcileError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use time::OffsetDateTime;

/// Compact identifier for contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub u64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a contact is the canonical member of its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPrecedence::Primary => write!(f, "primary"),
            LinkPrecedence::Secondary => write!(f, "secondary"),
        }
    }
}

/// A stored contact record.
///
/// `linked_id` is present exactly when `link_precedence` is `Secondary`, and
/// always names a primary (clusters are never more than one level deep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// The id of the primary owning this contact's cluster.
    pub fn primary_id(&self) -> ContactId {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Secondary, Some(linked)) => linked,
            _ => self.id,
        }
    }

    /// Check the linkedId-iff-secondary invariant for this record.
    pub fn is_well_formed(&self) -> bool {
        match self.link_precedence {
            LinkPrecedence::Primary => self.linked_id.is_none(),
            LinkPrecedence::Secondary => self.linked_id.is_some_and(|linked| linked != self.id),
        }
    }
}

/// Deterministic total order on contacts: creation time, then id.
///
/// This is the only definition of "oldest" used when selecting a primary.
pub fn creation_order(a: &Contact, b: &Contact) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// How a newly created contact joins the contact graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// Starts a new cluster
    Primary,
    /// Attaches to an existing cluster's primary
    SecondaryOf(ContactId),
}

/// A contact that has not been assigned an id or timestamps yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link: Link,
}

impl NewContact {
    pub fn primary(fragment: &Fragment) -> Self {
        Self {
            email: fragment.email.clone(),
            phone_number: fragment.phone_number.clone(),
            link: Link::Primary,
        }
    }

    pub fn secondary(fragment: &Fragment, primary: ContactId) -> Self {
        Self {
            email: fragment.email.clone(),
            phone_number: fragment.phone_number.clone(),
            link: Link::SecondaryOf(primary),
        }
    }

    /// Materialize into a stored contact.
    pub fn into_contact(self, id: ContactId, now: OffsetDateTime) -> Contact {
        let (link_precedence, linked_id) = match self.link {
            Link::Primary => (LinkPrecedence::Primary, None),
            Link::SecondaryOf(primary) => (LinkPrecedence::Secondary, Some(primary)),
        };
        Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            link_precedence,
            linked_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An incoming identity fragment with at least one identifier present
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FragmentFields")]
pub struct Fragment {
    email: Option<String>,
    phone_number: Option<String>,
}

/// Unvalidated wire shape of a `Fragment`
#[derive(Deserialize)]
struct FragmentFields {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
}

impl TryFrom<FragmentFields> for Fragment {
    type Error = ReconcileError;

    fn try_from(fields: FragmentFields) -> Result<Self, Self::Error> {
        Fragment::new(fields.email, fields.phone_number)
    }
}

impl Fragment {
    /// Build a fragment, treating empty strings as absent.
    ///
    /// # Errors
    /// Returns `ReconcileError::Validation` if neither identifier remains.
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, ReconcileError> {
        let email = email.filter(|value| !value.is_empty());
        let phone_number = phone_number.filter(|value| !value.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Err(ReconcileError::Validation);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "email={} phone={}",
            self.email.as_deref().unwrap_or("-"),
            self.phone_number.as_deref().unwrap_or("-")
        )
    }
}

/// Coerce a loosely typed request value into a canonical identifier string.
///
/// Strings pass through unchanged, numbers and `true` use their JSON text.
/// `null`, `false`, `0` and `""` are treated as absent. Arrays and objects
/// are rejected.
pub fn coerce_identifier(
    value: Option<&serde_json::Value>,
) -> Result<Option<String>, ReconcileError> {
    use serde_json::Value;

    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some("true".to_string())),
        Some(Value::String(text)) if text.is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(number)) => Ok(number_text(number)),
        Some(Value::Array(_)) | Some(Value::Object(_)) => Err(ReconcileError::Validation),
    }
}

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Text of a JSON number, `None` for zero.
///
/// Integral floats such as `123456.0` or `1e3` are written without a
/// fractional part so they match the integer form of the same value.
fn number_text(number: &serde_json::Number) -> Option<String> {
    if let Some(int) = number.as_i64() {
        return (int != 0).then(|| int.to_string());
    }
    if let Some(uint) = number.as_u64() {
        return Some(uint.to_string());
    }
    match number.as_f64() {
        Some(float) if float == 0.0 => None,
        Some(float) if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER => {
            Some((float as i64).to_string())
        }
        _ => Some(number.to_string()),
    }
}

/// Consolidated view of one resolved identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}
