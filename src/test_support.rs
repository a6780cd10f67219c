//! Helpers for tests and benchmarks: contact builders and seeded observation
//! streams.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Contact, ContactId, IdentifyRequest, LinkPrecedence, NewContact};
use crate::store::MemoryStore;

/// Fixed reference instant so seeded contacts sort predictably.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now)
}

/// A primary contact created `minute` minutes after [`epoch`].
pub fn primary_contact(id: u64, email: Option<&str>, phone: Option<&str>, minute: i64) -> Contact {
    contact(id, email, phone, LinkPrecedence::Primary, None, minute)
}

/// A secondary contact linked to `linked`, created `minute` minutes after [`epoch`].
pub fn secondary_contact(
    id: u64,
    email: Option<&str>,
    phone: Option<&str>,
    linked: u64,
    minute: i64,
) -> Contact {
    contact(
        id,
        email,
        phone,
        LinkPrecedence::Secondary,
        Some(ContactId(linked)),
        minute,
    )
}

fn contact(
    id: u64,
    email: Option<&str>,
    phone: Option<&str>,
    link_precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
    minute: i64,
) -> Contact {
    NewContact {
        email: email.map(str::to_string),
        phone_number: phone.map(str::to_string),
        link_precedence,
        linked_id,
    }
    .into_contact(ContactId(id), epoch() + Duration::minutes(minute))
}

/// A memory store preloaded with `contacts`.
pub fn seeded_store(contacts: Vec<Contact>) -> MemoryStore {
    let store = MemoryStore::new();
    store.import(contacts);
    store
}

#[derive(Debug, Clone)]
pub struct GeneratedRequests {
    pub requests: Vec<IdentifyRequest>,
    /// Distinct emails the generator drew from.
    pub email_pool: usize,
    /// Distinct phone numbers the generator drew from.
    pub phone_pool: usize,
}

/// Generate `count` requests over small value pools so that pairs overlap.
///
/// Roughly one request in five carries only an email or only a phone number.
/// The same seed always yields the same stream.
pub fn generate_requests(count: usize, pool: usize, seed: u64) -> GeneratedRequests {
    let mut rng = StdRng::seed_from_u64(seed);
    let pool = pool.max(1);
    let mut requests = Vec::with_capacity(count);

    for _ in 0..count {
        let email = format!("user{}@example.com", rng.random_range(0..pool));
        let phone = format!("555{:04}", rng.random_range(0..pool));
        let request = match rng.random_range(0..10) {
            0 => IdentifyRequest {
                email: Some(email),
                phone_number: None,
            },
            1 => IdentifyRequest {
                email: None,
                phone_number: Some(phone),
            },
            _ => IdentifyRequest {
                email: Some(email),
                phone_number: Some(phone),
            },
        };
        requests.push(request);
    }

    GeneratedRequests {
        requests,
        email_pool: pool,
        phone_pool: pool,
    }
}
