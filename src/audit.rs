//! # Audit Module
//!
//! Checks a snapshot of the contact store against the linking invariants: one level
//! of links, no dangling references, one primary per connected identity, and no
//! repeated attribute pairs.

use crate::error::StoreError;
use crate::model::{Contact, ContactId, LinkPrecedence};
use crate::store::ContactStore;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkViolation {
    /// A primary carries a `linked_id`.
    PrimaryWithLink { contact: ContactId },
    /// A secondary has no `linked_id`.
    SecondaryWithoutLink { contact: ContactId },
    /// A `linked_id` names a contact that does not exist.
    DanglingLink { contact: ContactId, linked: ContactId },
    /// A `linked_id` names another secondary.
    ChainedLink { contact: ContactId, linked: ContactId },
    /// Contacts sharing an email or phone resolve to different primaries.
    SplitIdentity {
        value: String,
        primaries: Vec<ContactId>,
    },
    /// The same (email, phone) pair is stored more than once.
    DuplicatePair { contacts: Vec<ContactId> },
}

impl fmt::Display for LinkViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkViolation::PrimaryWithLink { contact } => {
                write!(f, "primary {contact} has a linked id")
            }
            LinkViolation::SecondaryWithoutLink { contact } => {
                write!(f, "secondary {contact} has no linked id")
            }
            LinkViolation::DanglingLink { contact, linked } => {
                write!(f, "{contact} links to missing contact {linked}")
            }
            LinkViolation::ChainedLink { contact, linked } => {
                write!(f, "{contact} links to secondary {linked}")
            }
            LinkViolation::SplitIdentity { value, primaries } => {
                write!(f, "value {value:?} is shared by primaries {primaries:?}")
            }
            LinkViolation::DuplicatePair { contacts } => {
                write!(f, "contacts {contacts:?} store the same email/phone pair")
            }
        }
    }
}

/// Summary of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub contacts: usize,
    pub primaries: usize,
    pub violations: Vec<LinkViolation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Audit every committed contact in `store`.
pub fn audit_store(store: &dyn ContactStore) -> Result<AuditReport, StoreError> {
    Ok(audit_contacts(&store.scan()?))
}

/// Audit a snapshot of contacts.
pub fn audit_contacts(contacts: &[Contact]) -> AuditReport {
    let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();
    let mut violations = Vec::new();

    for contact in contacts {
        match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, Some(_)) => {
                violations.push(LinkViolation::PrimaryWithLink {
                    contact: contact.id,
                });
            }
            (LinkPrecedence::Secondary, None) => {
                violations.push(LinkViolation::SecondaryWithoutLink {
                    contact: contact.id,
                });
            }
            (LinkPrecedence::Secondary, Some(linked)) => match by_id.get(&linked) {
                None => violations.push(LinkViolation::DanglingLink {
                    contact: contact.id,
                    linked,
                }),
                Some(target) if !target.is_primary() => {
                    violations.push(LinkViolation::ChainedLink {
                        contact: contact.id,
                        linked,
                    })
                }
                Some(_) => {}
            },
            (LinkPrecedence::Primary, None) => {}
        }
    }

    let mut roots_by_value: HashMap<String, BTreeSet<ContactId>> = HashMap::new();
    for contact in contacts {
        let root = contact.root_id();
        let values = [
            contact.email.as_ref().map(|email| format!("email:{email}")),
            contact.phone_number.as_ref().map(|phone| format!("phone:{phone}")),
        ];
        for value in values.into_iter().flatten() {
            roots_by_value.entry(value).or_default().insert(root);
        }
    }
    let mut split: Vec<LinkViolation> = roots_by_value
        .into_iter()
        .filter(|(_, roots)| roots.len() > 1)
        .map(|(value, roots)| LinkViolation::SplitIdentity {
            value,
            primaries: roots.into_iter().collect(),
        })
        .collect();
    split.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    violations.extend(split);

    let mut pairs: HashMap<(Option<&str>, Option<&str>), Vec<ContactId>> = HashMap::new();
    for contact in contacts {
        pairs
            .entry((contact.email.as_deref(), contact.phone_number.as_deref()))
            .or_default()
            .push(contact.id);
    }
    let mut duplicates: Vec<Vec<ContactId>> = pairs
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort();
            ids
        })
        .collect();
    duplicates.sort();
    violations.extend(
        duplicates
            .into_iter()
            .map(|contacts| LinkViolation::DuplicatePair { contacts }),
    );

    AuditReport {
        contacts: contacts.len(),
        primaries: contacts.iter().filter(|c| c.is_primary()).count(),
        violations,
    }
}
