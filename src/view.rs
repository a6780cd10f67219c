//! # View Module
//!
//! Builds the deduplicated identity view returned to callers.

use crate::error::IdentifyError;
use crate::model::{Contact, ContactId, ContactSummary};
use crate::store::ContactTransaction;

/// Re-read the cluster rooted at `primary_id` and assemble its view.
pub fn read_view(
    txn: &mut dyn ContactTransaction,
    primary_id: ContactId,
) -> Result<ContactSummary, IdentifyError> {
    let members = txn.find_by_id_or_linked_id(primary_id)?;
    assemble_view(primary_id, members)
}

/// Assemble the view of one settled cluster.
///
/// The primary's email and phone come first, followed by the secondaries' values in
/// creation order, without nulls or repeats. Secondary ids follow creation order too.
pub fn assemble_view(
    primary_id: ContactId,
    members: Vec<Contact>,
) -> Result<ContactSummary, IdentifyError> {
    let (mut primaries, mut secondaries): (Vec<Contact>, Vec<Contact>) = members
        .into_iter()
        .partition(|contact| contact.id == primary_id);
    let primary = primaries.pop().ok_or_else(|| {
        IdentifyError::Integrity(format!("primary contact {primary_id} missing from cluster"))
    })?;
    if !primary.is_primary() {
        return Err(IdentifyError::Integrity(format!(
            "contact {primary_id} is not a primary"
        )));
    }
    secondaries.sort_by_key(Contact::creation_key);

    let ordered = || std::iter::once(&primary).chain(secondaries.iter());
    Ok(ContactSummary {
        primary_contact_id: primary.id,
        emails: dedup(ordered().filter_map(|c| c.email.as_deref())),
        phone_numbers: dedup(ordered().filter_map(|c| c.phone_number.as_deref())),
        secondary_contact_ids: secondaries
            .iter()
            .filter(|c| !c.is_primary())
            .map(|c| c.id)
            .collect(),
    })
}

fn dedup<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    out
}
