//! # Store Module
//!
//! The contact store contract used by the resolver, and an in-memory implementation
//! with optimistic, serializable transactions.

use crate::error::StoreError;
use crate::model::{Contact, ContactId, ContactPatch, NewContact};
use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Durable contact storage. Every read and write happens inside a transaction.
pub trait ContactStore: Send + Sync {
    /// Open a transaction. Dropping it without calling `commit` rolls it back.
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StoreError>;

    /// Committed contacts in id order.
    fn scan(&self) -> Result<Vec<Contact>, StoreError>;

    fn metrics(&self) -> Option<StoreMetrics> {
        None
    }
}

/// Operations the resolver needs, all scoped to one atomic unit of work.
pub trait ContactTransaction {
    /// Contacts whose email equals `email` or whose phone equals `phone_number`,
    /// ordered by creation time (ties by id). Absent arguments match nothing.
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError>;

    /// The contact with `id` plus every contact whose `linked_id` is `id`.
    fn find_by_id_or_linked_id(&mut self, id: ContactId) -> Result<Vec<Contact>, StoreError>;

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError>;

    fn update(&mut self, id: ContactId, patch: ContactPatch) -> Result<Contact, StoreError>;

    /// Atomically publish every write, or fail with [`StoreError::Conflict`] if
    /// anything this transaction read has changed since.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

impl<S: ContactStore + ?Sized> ContactStore for Arc<S> {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StoreError> {
        (**self).begin()
    }

    fn scan(&self) -> Result<Vec<Contact>, StoreError> {
        (**self).scan()
    }

    fn metrics(&self) -> Option<StoreMetrics> {
        (**self).metrics()
    }
}

/// Counters exposed by stores that track them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub contacts: u64,
    pub commits: u64,
    pub conflicts: u64,
}

/// Sort contacts by `created_at`, then `id`.
pub fn sort_by_creation(contacts: &mut [Contact]) {
    contacts.sort_by_key(Contact::creation_key);
}

/// A predicate lookup key. Its version changes whenever the set of contacts
/// under the key changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Email(String),
    Phone(String),
    Linked(ContactId),
}

impl IndexKey {
    fn for_contact(contact: &Contact) -> Vec<IndexKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(email) = &contact.email {
            keys.push(IndexKey::Email(email.clone()));
        }
        if let Some(phone) = &contact.phone_number {
            keys.push(IndexKey::Phone(phone.clone()));
        }
        if let Some(linked) = contact.linked_id {
            keys.push(IndexKey::Linked(linked));
        }
        keys
    }

    fn matches(&self, contact: &Contact) -> bool {
        match self {
            IndexKey::Email(email) => contact.email.as_deref() == Some(email.as_str()),
            IndexKey::Phone(phone) => contact.phone_number.as_deref() == Some(phone.as_str()),
            IndexKey::Linked(id) => contact.linked_id == Some(*id),
        }
    }
}

#[derive(Debug, Clone)]
struct VersionedContact {
    contact: Contact,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, VersionedContact>,
    index: HashMap<IndexKey, BTreeSet<ContactId>>,
    key_versions: HashMap<IndexKey, u64>,
}

impl MemoryState {
    fn record_version(&self, id: ContactId) -> u64 {
        self.contacts.get(&id).map_or(0, |entry| entry.version)
    }

    fn key_version(&self, key: &IndexKey) -> u64 {
        self.key_versions.get(key).copied().unwrap_or(0)
    }

    fn put(&mut self, contact: Contact) {
        let id = contact.id;
        let new_keys = IndexKey::for_contact(&contact);
        let (old_keys, version) = match self.contacts.get(&id) {
            Some(existing) => (IndexKey::for_contact(&existing.contact), existing.version + 1),
            None => (Vec::new(), 1),
        };

        for key in old_keys.iter().filter(|key| !new_keys.contains(key)) {
            if let Some(ids) = self.index.get_mut(key) {
                ids.remove(&id);
            }
            *self.key_versions.entry(key.clone()).or_insert(0) += 1;
        }
        for key in new_keys.iter().filter(|key| !old_keys.contains(key)) {
            self.index.entry(key.clone()).or_default().insert(id);
            *self.key_versions.entry(key.clone()).or_insert(0) += 1;
        }

        self.contacts.insert(id, VersionedContact { contact, version });
    }
}

/// In-process contact store.
///
/// Transactions read the latest committed data and remember what they saw: the
/// version of every record and of every lookup key. `commit` validates that none
/// of it moved before applying the buffered writes, which makes committed
/// transactions serializable.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    next_id: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store. The first contact gets id 1.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            next_id: AtomicU64::new(1),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Load contacts verbatim, keeping their ids and timestamps. Later creates
    /// continue after the largest imported id.
    pub fn import(&self, contacts: Vec<Contact>) {
        let mut state = self.state.write();
        for contact in contacts {
            self.next_id.fetch_max(contact.id.0 + 1, Ordering::SeqCst);
            state.put(contact);
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().contacts.is_empty()
    }

    pub fn get(&self, id: ContactId) -> Option<Contact> {
        self.state
            .read()
            .contacts
            .get(&id)
            .map(|entry| entry.contact.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            record_reads: HashMap::new(),
            key_reads: HashMap::new(),
            writes: BTreeMap::new(),
        }))
    }

    fn scan(&self) -> Result<Vec<Contact>, StoreError> {
        Ok(self
            .state
            .read()
            .contacts
            .values()
            .map(|entry| entry.contact.clone())
            .collect())
    }

    fn metrics(&self) -> Option<StoreMetrics> {
        Some(StoreMetrics {
            contacts: self.len() as u64,
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        })
    }
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    /// Record versions observed by this transaction (0 = absent).
    record_reads: HashMap<ContactId, u64>,
    /// Lookup-key versions observed by this transaction.
    key_reads: HashMap<IndexKey, u64>,
    /// Buffered creates and updates, visible to this transaction only.
    writes: BTreeMap<ContactId, Contact>,
}

impl MemoryTransaction<'_> {
    /// Contacts matching any of `keys`, or having id `by_id`, as seen through this
    /// transaction's own writes.
    fn lookup(&mut self, keys: &[IndexKey], by_id: Option<ContactId>) -> Vec<Contact> {
        let store = self.store;
        let state = store.state.read();
        let mut candidates: BTreeSet<ContactId> = BTreeSet::new();

        for key in keys {
            self.key_reads
                .entry(key.clone())
                .or_insert_with(|| state.key_version(key));
            if let Some(ids) = state.index.get(key) {
                candidates.extend(ids.iter().copied());
            }
        }
        if let Some(id) = by_id {
            candidates.insert(id);
        }
        candidates.extend(
            self.writes
                .values()
                .filter(|contact| keys.iter().any(|key| key.matches(contact)))
                .map(|contact| contact.id),
        );

        let mut found = Vec::with_capacity(candidates.len());
        for id in candidates {
            if !self.writes.contains_key(&id) {
                self.record_reads
                    .entry(id)
                    .or_insert_with(|| state.record_version(id));
            }
            let contact = match self.writes.get(&id) {
                Some(pending) => pending.clone(),
                None => match state.contacts.get(&id) {
                    Some(entry) => entry.contact.clone(),
                    None => continue,
                },
            };
            if Some(contact.id) == by_id || keys.iter().any(|key| key.matches(&contact)) {
                found.push(contact);
            }
        }
        found
    }
}

impl ContactTransaction for MemoryTransaction<'_> {
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = email {
            keys.push(IndexKey::Email(email.to_string()));
        }
        if let Some(phone) = phone_number {
            keys.push(IndexKey::Phone(phone.to_string()));
        }
        let mut found = self.lookup(&keys, None);
        sort_by_creation(&mut found);
        Ok(found)
    }

    fn find_by_id_or_linked_id(&mut self, id: ContactId) -> Result<Vec<Contact>, StoreError> {
        Ok(self.lookup(&[IndexKey::Linked(id)], Some(id)))
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError> {
        let id = ContactId(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let contact = contact.into_contact(id, Utc::now());
        self.writes.insert(id, contact.clone());
        Ok(contact)
    }

    fn update(&mut self, id: ContactId, patch: ContactPatch) -> Result<Contact, StoreError> {
        let mut contact = match self.writes.get(&id) {
            Some(pending) => pending.clone(),
            None => {
                let store = self.store;
                let state = store.state.read();
                let entry = state.contacts.get(&id).ok_or(StoreError::NotFound(id))?;
                self.record_reads.entry(id).or_insert(entry.version);
                entry.contact.clone()
            }
        };
        contact.apply(&patch, Utc::now());
        self.writes.insert(id, contact.clone());
        Ok(contact)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            record_reads,
            key_reads,
            writes,
        } = *self;

        let mut state = store.state.write();
        let stale_key = key_reads
            .iter()
            .any(|(key, version)| state.key_version(key) != *version);
        let stale_record = record_reads
            .iter()
            .any(|(id, version)| state.record_version(*id) != *version);
        if stale_key || stale_record {
            store.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Conflict);
        }

        for contact in writes.into_values() {
            state.put(contact);
        }
        store.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
