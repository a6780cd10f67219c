//! RocksDB-backed contact store.
//!
//! Contacts live in their own column family keyed by big-endian id. Three index
//! column families map an email, a phone number, or a linked id to the list of
//! contact ids carrying it. Every read inside a transaction goes through
//! `get_for_update`, so an optimistic transaction whose reads were overwritten by a
//! concurrent commit is rejected at commit time.

use crate::error::StoreError;
use crate::model::{Contact, ContactId, ContactPatch, NewContact};
use crate::store::{sort_by_creation, ContactStore, ContactTransaction, StoreMetrics};
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options, Transaction,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const CF_CONTACTS: &str = "contacts";
const CF_INDEX_EMAIL: &str = "index_email";
const CF_INDEX_PHONE: &str = "index_phone";
const CF_INDEX_LINKED: &str = "index_linked";

pub struct PersistentContactStore {
    db: OptimisticTransactionDB,
    next_id: AtomicU64,
    /// Committed contacts, counted once on open and kept current by commits.
    contacts: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl PersistentContactStore {
    /// Open (or create) a store under `path`. The id sequence resumes after the
    /// largest stored id.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), true)
    }

    /// Open a store that must already exist. Nothing is created on disk.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), false)
    }

    fn open_with(path: &Path, create: bool) -> Result<Self, StoreError> {
        if !create && !path.is_dir() {
            return Err(StoreError::Backend(format!(
                "no contact store at {}",
                path.display()
            )));
        }
        let db = open_db(path, create)?;
        let next_id = load_next_id(&db)?;
        let contacts = count_contacts(&db)?;
        info!(path = %path.display(), next_id, contacts, "contact store opened");
        Ok(Self {
            db,
            next_id: AtomicU64::new(next_id),
            contacts: AtomicU64::new(contacts),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in [CF_CONTACTS, CF_INDEX_EMAIL, CF_INDEX_PHONE, CF_INDEX_LINKED] {
            self.db.flush_cf(cf(&self.db, name)?).map_err(map_rocksdb)?;
        }
        Ok(())
    }
}

impl ContactStore for PersistentContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StoreError> {
        Ok(Box::new(PersistentTransaction {
            store: self,
            txn: self.db.transaction(),
            created: 0,
        }))
    }

    fn scan(&self) -> Result<Vec<Contact>, StoreError> {
        let contacts_cf = cf(&self.db, CF_CONTACTS)?;
        let mut contacts = Vec::new();
        for entry in self.db.iterator_cf(contacts_cf, IteratorMode::Start) {
            let (_, value) = entry.map_err(map_rocksdb)?;
            contacts.push(decode_contact(&value)?);
        }
        Ok(contacts)
    }

    fn metrics(&self) -> Option<StoreMetrics> {
        Some(StoreMetrics {
            contacts: self.contacts.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        })
    }
}

/// Optimistic transaction over a [`PersistentContactStore`].
pub struct PersistentTransaction<'a> {
    store: &'a PersistentContactStore,
    txn: Transaction<'a, OptimisticTransactionDB>,
    created: u64,
}

impl PersistentTransaction<'_> {
    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        cf(&self.store.db, name)
    }

    fn read_contact(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        let contacts_cf = self.cf(CF_CONTACTS)?;
        match self
            .txn
            .get_for_update_cf(contacts_cf, encode_id(id), true)
            .map_err(map_rocksdb)?
        {
            Some(bytes) => Ok(Some(decode_contact(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let contacts_cf = self.cf(CF_CONTACTS)?;
        let bytes = bincode::serialize(contact).map_err(map_codec)?;
        self.txn
            .put_cf(contacts_cf, encode_id(contact.id), bytes)
            .map_err(map_rocksdb)
    }

    fn read_index(&self, cf_name: &str, key: &[u8]) -> Result<BTreeSet<ContactId>, StoreError> {
        let index_cf = self.cf(cf_name)?;
        match self
            .txn
            .get_for_update_cf(index_cf, key, true)
            .map_err(map_rocksdb)?
        {
            Some(bytes) => bincode::deserialize(&bytes).map_err(map_codec),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_index(
        &self,
        cf_name: &str,
        key: &[u8],
        ids: &BTreeSet<ContactId>,
    ) -> Result<(), StoreError> {
        let index_cf = self.cf(cf_name)?;
        if ids.is_empty() {
            return self.txn.delete_cf(index_cf, key).map_err(map_rocksdb);
        }
        let bytes = bincode::serialize(ids).map_err(map_codec)?;
        self.txn.put_cf(index_cf, key, bytes).map_err(map_rocksdb)
    }

    fn index_insert(&self, cf_name: &str, key: &[u8], id: ContactId) -> Result<(), StoreError> {
        let mut ids = self.read_index(cf_name, key)?;
        if ids.insert(id) {
            self.write_index(cf_name, key, &ids)?;
        }
        Ok(())
    }

    fn index_remove(&self, cf_name: &str, key: &[u8], id: ContactId) -> Result<(), StoreError> {
        let mut ids = self.read_index(cf_name, key)?;
        if ids.remove(&id) {
            self.write_index(cf_name, key, &ids)?;
        }
        Ok(())
    }

    fn load_all(&self, ids: BTreeSet<ContactId>) -> Result<Vec<Contact>, StoreError> {
        let mut contacts = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_contact(id)? {
                Some(contact) => contacts.push(contact),
                None => {
                    return Err(StoreError::Backend(format!(
                        "index references missing contact {id}"
                    )))
                }
            }
        }
        Ok(contacts)
    }
}

impl ContactTransaction for PersistentTransaction<'_> {
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let mut ids = BTreeSet::new();
        if let Some(email) = email {
            ids.extend(self.read_index(CF_INDEX_EMAIL, email.as_bytes())?);
        }
        if let Some(phone) = phone_number {
            ids.extend(self.read_index(CF_INDEX_PHONE, phone.as_bytes())?);
        }
        let mut contacts = self.load_all(ids)?;
        sort_by_creation(&mut contacts);
        Ok(contacts)
    }

    fn find_by_id_or_linked_id(&mut self, id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let mut contacts = Vec::new();
        if let Some(contact) = self.read_contact(id)? {
            contacts.push(contact);
        }
        let linked = self.read_index(CF_INDEX_LINKED, &encode_id(id))?;
        contacts.extend(self.load_all(linked)?);
        Ok(contacts)
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError> {
        let id = ContactId(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let contact = contact.into_contact(id, Utc::now());
        self.write_contact(&contact)?;
        self.created += 1;
        if let Some(email) = &contact.email {
            self.index_insert(CF_INDEX_EMAIL, email.as_bytes(), id)?;
        }
        if let Some(phone) = &contact.phone_number {
            self.index_insert(CF_INDEX_PHONE, phone.as_bytes(), id)?;
        }
        if let Some(linked) = contact.linked_id {
            self.index_insert(CF_INDEX_LINKED, &encode_id(linked), id)?;
        }
        Ok(contact)
    }

    fn update(&mut self, id: ContactId, patch: ContactPatch) -> Result<Contact, StoreError> {
        let mut contact = self.read_contact(id)?.ok_or(StoreError::NotFound(id))?;
        let previous_link = contact.linked_id;
        contact.apply(&patch, Utc::now());
        self.write_contact(&contact)?;

        if previous_link != contact.linked_id {
            if let Some(old) = previous_link {
                self.index_remove(CF_INDEX_LINKED, &encode_id(old), id)?;
            }
            if let Some(new) = contact.linked_id {
                self.index_insert(CF_INDEX_LINKED, &encode_id(new), id)?;
            }
        }
        Ok(contact)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PersistentTransaction {
            store,
            txn,
            created,
        } = *self;
        match txn.commit().map_err(map_rocksdb) {
            Ok(()) => {
                store.contacts.fetch_add(created, Ordering::Relaxed);
                store.commits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(StoreError::Conflict) => {
                store.conflicts.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Conflict)
            }
            Err(err) => Err(err),
        }
    }
}

fn open_db(path: &Path, create: bool) -> Result<OptimisticTransactionDB, StoreError> {
    let mut options = Options::default();
    options.create_if_missing(create);
    options.create_missing_column_families(create);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_CONTACTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_EMAIL, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_PHONE, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_LINKED, Options::default()),
    ];
    OptimisticTransactionDB::open_cf_descriptors(&options, path, cfs).map_err(map_rocksdb)
}

fn load_next_id(db: &OptimisticTransactionDB) -> Result<u64, StoreError> {
    let contacts_cf = cf(db, CF_CONTACTS)?;
    match db.iterator_cf(contacts_cf, IteratorMode::End).next() {
        Some(entry) => {
            let (key, _) = entry.map_err(map_rocksdb)?;
            Ok(decode_id(&key)?.0 + 1)
        }
        None => Ok(1),
    }
}

fn count_contacts(db: &OptimisticTransactionDB) -> Result<u64, StoreError> {
    let contacts_cf = cf(db, CF_CONTACTS)?;
    let mut count = 0;
    for entry in db.iterator_cf(contacts_cf, IteratorMode::Start) {
        entry.map_err(map_rocksdb)?;
        count += 1;
    }
    Ok(count)
}

fn cf<'a>(db: &'a OptimisticTransactionDB, name: &str) -> Result<&'a ColumnFamily, StoreError> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Backend(format!("missing {name} column family")))
}

fn encode_id(id: ContactId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn decode_id(key: &[u8]) -> Result<ContactId, StoreError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StoreError::Codec(format!("invalid contact key length {}", key.len())))?;
    Ok(ContactId(u64::from_be_bytes(bytes)))
}

fn decode_contact(bytes: &[u8]) -> Result<Contact, StoreError> {
    bincode::deserialize(bytes).map_err(map_codec)
}

fn map_codec(err: bincode::Error) -> StoreError {
    StoreError::Codec(err.to_string())
}

fn map_rocksdb(err: rocksdb::Error) -> StoreError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict,
        ErrorKind::TimedOut | ErrorKind::Incomplete => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}
