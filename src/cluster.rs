//! # Cluster Module
//!
//! Closure walk over the "same identity" relation and consolidation of the
//! resulting component under a single canonical primary.

use crate::error::IdentifyError;
use crate::model::{Contact, ContactId, ContactPatch, LinkPrecedence};
use crate::store::ContactTransaction;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Every contact reachable from a set of initial matches, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ClusterExpansion {
    members: BTreeMap<ContactId, Contact>,
    roots_visited: usize,
}

impl ClusterExpansion {
    pub fn members(&self) -> impl Iterator<Item = &Contact> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ContactId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of distinct cluster roots queried during the walk.
    pub fn roots_visited(&self) -> usize {
        self.roots_visited
    }

    /// Members currently marked primary, earliest first.
    pub fn primaries(&self) -> Vec<&Contact> {
        let mut primaries: Vec<&Contact> =
            self.members.values().filter(|c| c.is_primary()).collect();
        primaries.sort_by_key(|c| c.creation_key());
        primaries
    }

    fn insert(&mut self, contact: Contact) -> bool {
        if self.members.contains_key(&contact.id) {
            return false;
        }
        self.members.insert(contact.id, contact);
        true
    }
}

/// Collect the full connected component(s) touched by `matches`.
///
/// Roots are the primary ids the matches point at. Each root is queried once for
/// itself and its dependents; anything new found that way contributes its own root
/// to the queue, so components joined through stale or chained links are still
/// walked to completion.
pub fn expand_cluster(
    txn: &mut dyn ContactTransaction,
    matches: &[Contact],
) -> Result<ClusterExpansion, IdentifyError> {
    let mut expansion = ClusterExpansion::default();
    let mut visited: FxHashSet<ContactId> = FxHashSet::default();
    let mut queue: VecDeque<ContactId> = VecDeque::new();

    for contact in matches {
        queue.push_back(contact.root_id());
        expansion.insert(contact.clone());
    }

    while let Some(root) = queue.pop_front() {
        if !visited.insert(root) {
            continue;
        }
        for contact in txn.find_by_id_or_linked_id(root)? {
            let next = contact.root_id();
            if expansion.insert(contact) && !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }

    expansion.roots_visited = visited.len();
    debug!(
        members = expansion.len(),
        roots = expansion.roots_visited,
        "cluster expanded"
    );
    Ok(expansion)
}

/// Outcome of bringing a cluster under one canonical primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consolidation {
    pub canonical: Contact,
    /// Former primaries turned into secondaries of `canonical`.
    pub demoted: Vec<ContactId>,
    /// Secondaries repointed at `canonical`.
    pub relinked: Vec<ContactId>,
}

impl Consolidation {
    pub fn is_noop(&self) -> bool {
        self.demoted.is_empty() && self.relinked.is_empty()
    }
}

/// Pick the canonical primary and make every other member a direct secondary of it.
///
/// The canonical primary is the earliest-created primary, ties broken by the
/// smallest id. Other primaries are demoted; secondaries that point anywhere but
/// the canonical primary are repointed, which keeps links exactly one level deep.
/// A settled cluster produces no writes.
pub fn consolidate(
    txn: &mut dyn ContactTransaction,
    expansion: &ClusterExpansion,
) -> Result<Consolidation, IdentifyError> {
    let canonical = expansion
        .primaries()
        .first()
        .map(|contact| (*contact).clone())
        .ok_or_else(|| {
            let ids: Vec<String> = expansion.members().map(|c| c.id.to_string()).collect();
            IdentifyError::Integrity(format!(
                "cluster without a primary contact: [{}]",
                ids.join(", ")
            ))
        })?;

    let mut demoted = Vec::new();
    let mut relinked = Vec::new();
    let patch = ContactPatch::secondary_of(canonical.id);

    for member in expansion.members() {
        if member.id == canonical.id {
            continue;
        }
        if member.link_precedence == LinkPrecedence::Secondary
            && member.linked_id == Some(canonical.id)
        {
            continue;
        }
        txn.update(member.id, patch)?;
        if member.is_primary() {
            demoted.push(member.id);
        } else {
            relinked.push(member.id);
        }
    }

    if !demoted.is_empty() || !relinked.is_empty() {
        debug!(
            canonical = %canonical.id,
            demoted = ?demoted,
            relinked = ?relinked,
            "cluster consolidated"
        );
    }

    Ok(Consolidation {
        canonical,
        demoted,
        relinked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewContact;
    use crate::store::{ContactStore, MemoryStore};
    use chrono::{Duration, Utc};

    fn contact(
        id: u64,
        email: Option<&str>,
        phone: Option<&str>,
        linked: Option<u64>,
        age_secs: i64,
    ) -> Contact {
        NewContact {
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            link_precedence: if linked.is_some() {
                LinkPrecedence::Secondary
            } else {
                LinkPrecedence::Primary
            },
            linked_id: linked.map(ContactId),
        }
        .into_contact(ContactId(id), Utc::now() - Duration::seconds(age_secs))
    }

    fn ids(expansion: &ClusterExpansion) -> Vec<u64> {
        expansion.members().map(|c| c.id.0).collect()
    }

    #[test]
    fn test_expand_single_cluster_from_secondary_match() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(1, Some("a@x.com"), Some("111"), None, 30),
            contact(2, Some("b@x.com"), Some("111"), Some(1), 20),
            contact(3, Some("c@x.com"), None, Some(1), 10),
            contact(4, Some("z@z.com"), Some("999"), None, 5),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn.find_by_email_or_phone(Some("c@x.com"), None).unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        assert_eq!(ids(&expansion), vec![1, 2, 3]);
        assert_eq!(expansion.roots_visited(), 1);
        assert_eq!(expansion.primaries().len(), 1);
    }

    #[test]
    fn test_expand_bridges_two_clusters() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(1, Some("a@x.com"), Some("111"), None, 40),
            contact(2, Some("a2@x.com"), Some("111"), Some(1), 35),
            contact(3, Some("b@y.com"), Some("222"), None, 30),
            contact(4, Some("b@y.com"), Some("333"), Some(3), 20),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn
            .find_by_email_or_phone(Some("a@x.com"), Some("333"))
            .unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        assert_eq!(ids(&expansion), vec![1, 2, 3, 4]);
        assert_eq!(expansion.roots_visited(), 2);
    }

    #[test]
    fn test_expand_follows_chained_links() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(1, Some("a@x.com"), None, None, 30),
            contact(2, Some("b@x.com"), None, Some(1), 20),
            contact(3, Some("c@x.com"), None, Some(2), 10),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn.find_by_email_or_phone(Some("c@x.com"), None).unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        assert_eq!(ids(&expansion), vec![1, 2, 3]);
    }

    #[test]
    fn test_consolidate_demotes_later_primary_and_flattens() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(1, Some("a@x.com"), Some("111"), None, 40),
            contact(2, Some("b@y.com"), Some("222"), None, 30),
            contact(3, Some("c@y.com"), Some("222"), Some(2), 20),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn
            .find_by_email_or_phone(Some("a@x.com"), Some("222"))
            .unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        let outcome = consolidate(txn.as_mut(), &expansion).unwrap();
        txn.commit().unwrap();

        assert_eq!(outcome.canonical.id, ContactId(1));
        assert_eq!(outcome.demoted, vec![ContactId(2)]);
        assert_eq!(outcome.relinked, vec![ContactId(3)]);

        let demoted = store.get(ContactId(2)).unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(ContactId(1)));
        assert_eq!(store.get(ContactId(3)).unwrap().linked_id, Some(ContactId(1)));
    }

    #[test]
    fn test_canonical_tie_broken_by_smallest_id() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut a = contact(7, Some("a@x.com"), None, None, 0);
        let mut b = contact(5, None, Some("111"), None, 0);
        a.created_at = now;
        b.created_at = now;
        store.import(vec![a, b]);

        let mut txn = store.begin().unwrap();
        let matches = txn
            .find_by_email_or_phone(Some("a@x.com"), Some("111"))
            .unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        let outcome = consolidate(txn.as_mut(), &expansion).unwrap();
        assert_eq!(outcome.canonical.id, ContactId(5));
        assert_eq!(outcome.demoted, vec![ContactId(7)]);
    }

    #[test]
    fn test_canonical_is_oldest_primary_not_smallest_id() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(7, Some("a@x.com"), Some("111"), None, 40),
            contact(3, Some("b@y.com"), Some("222"), None, 10),
            contact(5, Some("c@z.com"), Some("222"), Some(3), 5),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn
            .find_by_email_or_phone(Some("a@x.com"), Some("222"))
            .unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        let primaries: Vec<ContactId> = expansion.primaries().iter().map(|c| c.id).collect();
        assert_eq!(primaries, vec![ContactId(7), ContactId(3)]);

        let outcome = consolidate(txn.as_mut(), &expansion).unwrap();
        txn.commit().unwrap();
        assert_eq!(outcome.canonical.id, ContactId(7));
        assert_eq!(outcome.demoted, vec![ContactId(3)]);
        assert_eq!(outcome.relinked, vec![ContactId(5)]);
        assert_eq!(store.get(ContactId(3)).unwrap().linked_id, Some(ContactId(7)));
        assert_eq!(store.get(ContactId(5)).unwrap().linked_id, Some(ContactId(7)));
        assert!(store.get(ContactId(7)).unwrap().is_primary());
    }

    #[test]
    fn test_consolidate_settled_cluster_is_noop() {
        let store = MemoryStore::new();
        store.import(vec![
            contact(1, Some("a@x.com"), Some("111"), None, 40),
            contact(2, Some("a@x.com"), Some("222"), Some(1), 30),
        ]);

        let mut txn = store.begin().unwrap();
        let matches = txn.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        let outcome = consolidate(txn.as_mut(), &expansion).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.canonical.id, ContactId(1));
    }

    #[test]
    fn test_consolidate_without_primary_is_integrity_error() {
        let store = MemoryStore::new();
        store.import(vec![contact(2, Some("a@x.com"), None, Some(1), 10)]);

        let mut txn = store.begin().unwrap();
        let matches = txn.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
        let expansion = expand_cluster(txn.as_mut(), &matches).unwrap();
        let err = consolidate(txn.as_mut(), &expansion).unwrap_err();
        assert!(matches!(err, IdentifyError::Integrity(_)));
    }
}
