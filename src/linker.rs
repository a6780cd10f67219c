//! # Linker Module
//!
//! Resolves one observation against the contact store: finds candidate contacts,
//! expands and consolidates their clusters, materializes a new contact when the
//! observation carries new information, and reads back the settled view. The whole
//! resolution runs in one transaction and is retried as a unit when it loses a race.

use crate::cluster::{consolidate, expand_cluster, ClusterExpansion, Consolidation};
use crate::config::RetryConfig;
use crate::error::{IdentifyError, StoreError};
use crate::model::{Contact, ContactId, ContactPatch, ContactSummary, NewContact, Observation};
use crate::store::{ContactStore, ContactTransaction};
use crate::view::read_view;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Result of a committed identify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub summary: ContactSummary,
    /// Contact materialized by this call, if any.
    pub created: Option<ContactId>,
    /// Merge work performed, when the observation matched existing contacts.
    pub consolidation: Option<Consolidation>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Contacts whose email or phone equals one supplied by the observation,
/// oldest first.
pub fn find_candidates(
    txn: &mut dyn ContactTransaction,
    observation: &Observation,
) -> Result<Vec<Contact>, IdentifyError> {
    Ok(txn.find_by_email_or_phone(observation.email(), observation.phone_number())?)
}

/// The contact the observation requires, if any.
///
/// With no cluster the observation founds a new identity. Inside an existing
/// cluster a contact is only added for a complete pair that no member already holds.
pub fn decide_new_record(
    observation: &Observation,
    cluster: Option<(&ClusterExpansion, ContactId)>,
) -> Option<NewContact> {
    match cluster {
        None => Some(NewContact::primary(observation)),
        Some((expansion, canonical)) => {
            let known = expansion
                .members()
                .any(|member| observation.matches_exactly(member));
            if known || !observation.is_complete() {
                None
            } else {
                Some(NewContact::secondary(observation, canonical))
            }
        }
    }
}

/// What one attempt did inside its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub summary: ContactSummary,
    pub created: Option<ContactId>,
    pub consolidation: Option<Consolidation>,
}

/// One resolution attempt. Nothing is committed here.
pub fn resolve(
    txn: &mut dyn ContactTransaction,
    observation: &Observation,
) -> Result<Settled, IdentifyError> {
    let candidates = find_candidates(txn, observation)?;

    if candidates.is_empty() {
        let new_contact = decide_new_record(observation, None)
            .ok_or_else(|| IdentifyError::Integrity("no record for a new identity".into()))?;
        let created = txn.create(new_contact)?;
        debug!(contact = %created.id, "new identity created");
        let summary = read_view(txn, created.id)?;
        return Ok(Settled {
            summary,
            created: Some(created.id),
            consolidation: None,
        });
    }

    let expansion = expand_cluster(txn, &candidates)?;
    let consolidation = consolidate(txn, &expansion)?;
    let canonical = consolidation.canonical.id;

    let created = match decide_new_record(observation, Some((&expansion, canonical))) {
        Some(new_contact) => {
            let created = txn.create(new_contact)?;
            debug!(contact = %created.id, primary = %canonical, "secondary contact created");
            Some(created.id)
        }
        None => None,
    };

    let summary = read_view(txn, canonical)?;
    Ok(Settled {
        summary,
        created,
        consolidation: Some(consolidation),
    })
}

/// Resolve `observation`, retrying the whole resolution on conflicts.
///
/// Conflicts are always retried. Transient store failures are retried only while
/// the attempt has not written anything yet.
#[instrument(
    skip(store, observation, retry),
    fields(
        has_email = observation.email().is_some(),
        has_phone = observation.phone_number().is_some()
    )
)]
pub fn identify(
    store: &dyn ContactStore,
    observation: &Observation,
    retry: &RetryConfig,
) -> Result<Resolution, IdentifyError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_error = None;
    // Contact values stay out of span fields; they are only logged at debug.
    debug!(observation = %observation, "identify started");

    for attempt in 1..=max_attempts {
        let mut txn = WriteTracking::new(store.begin()?);
        let outcome = resolve(&mut txn, observation).and_then(|resolved| {
            let writes = txn.writes;
            txn.commit()?;
            Ok((resolved, writes))
        });

        match outcome {
            Ok((settled, writes)) => {
                if writes > 0 {
                    info!(
                        primary = %settled.summary.primary_contact_id,
                        created = ?settled.created,
                        writes,
                        attempt,
                        "identity resolved"
                    );
                }
                return Ok(Resolution {
                    summary: settled.summary,
                    created: settled.created,
                    consolidation: settled.consolidation,
                    attempts: attempt,
                });
            }
            Err(IdentifyError::Store(err)) if err.is_transient() => {
                warn!(attempt, max_attempts, error = %err, "identify attempt aborted, retrying");
                last_error = Some(err);
                if attempt < max_attempts {
                    sleep_with_jitter(retry.backoff(attempt));
                }
            }
            Err(err) => return Err(err),
        }
    }

    match last_error {
        Some(StoreError::Unavailable(reason)) => Err(StoreError::Unavailable(reason).into()),
        _ => Err(IdentifyError::Conflict {
            attempts: max_attempts,
        }),
    }
}

fn sleep_with_jitter(base: Duration) {
    if base.is_zero() {
        return;
    }
    let jitter = rand::rng().random_range(0..=base.as_micros() as u64);
    std::thread::sleep(base + Duration::from_micros(jitter));
}

/// Counts writes so a failed attempt knows whether it is still safe to replay
/// after a transient error, and so committed resolutions can report their work.
struct WriteTracking<'a> {
    inner: Box<dyn ContactTransaction + 'a>,
    writes: usize,
}

impl<'a> WriteTracking<'a> {
    fn new(inner: Box<dyn ContactTransaction + 'a>) -> Self {
        Self {
            inner,
            writes: 0,
        }
    }

    /// A transient failure once a write has been attempted must not be replayed.
    fn guard<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match result {
            Err(StoreError::Unavailable(reason)) if self.writes > 0 => {
                Err(StoreError::Backend(format!(
                    "store unavailable after writes began: {reason}"
                )))
            }
            other => other,
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        let writes = self.writes;
        match self.inner.commit() {
            Err(StoreError::Unavailable(reason)) if writes > 0 => Err(StoreError::Backend(
                format!("commit failed, store unavailable: {reason}"),
            )),
            other => other,
        }
    }
}

impl ContactTransaction for WriteTracking<'_> {
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let result = self.inner.find_by_email_or_phone(email, phone_number);
        self.guard(result)
    }

    fn find_by_id_or_linked_id(&mut self, id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let result = self.inner.find_by_id_or_linked_id(id);
        self.guard(result)
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError> {
        self.writes += 1;
        let result = self.inner.create(contact);
        self.guard(result)
    }

    fn update(&mut self, id: ContactId, patch: ContactPatch) -> Result<Contact, StoreError> {
        self.writes += 1;
        let result = self.inner.update(id, patch);
        self.guard(result)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        WriteTracking::commit(*self)
    }
}
