//! # Data Model
//!
//! Core data structures for contact identity resolution: the stored contact record,
//! the fields accepted by the store, and the request/response contract.

use crate::error::IdentifyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Compact identifier for contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub u64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Position of a contact inside its identity cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical record of the cluster
    Primary,
    /// Subordinate record pointing at the cluster's primary
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

/// A stored contact record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Id of the primary this contact belongs to, as far as this record alone can tell.
    pub fn root_id(&self) -> ContactId {
        match self.link_precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }

    /// Ordering key used everywhere creation order matters: `created_at`, then `id`.
    pub fn creation_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }

    pub(crate) fn apply(&mut self, patch: &ContactPatch, now: DateTime<Utc>) {
        self.link_precedence = patch.link_precedence;
        self.linked_id = patch.linked_id;
        self.updated_at = now;
    }
}

/// Fields for a contact about to be created. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    pub fn primary(observation: &Observation) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    pub fn secondary(observation: &Observation, primary: ContactId) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary),
        }
    }

    pub fn into_contact(self, id: ContactId, now: DateTime<Utc>) -> Contact {
        Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            link_precedence: self.link_precedence,
            linked_id: self.linked_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The only mutation a stored contact accepts: its place in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactPatch {
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl ContactPatch {
    pub fn secondary_of(primary: ContactId) -> Self {
        Self {
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary),
        }
    }
}

/// A validated identifying pair. At least one field is present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, IdentifyError> {
        let email = email.filter(|value| !value.is_empty());
        let phone_number = phone_number.filter(|value| !value.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Err(IdentifyError::Validation(
                "At least email or phoneNumber must be provided.".to_string(),
            ));
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

    pub fn is_complete(&self) -> bool {
        self.email.is_some() && self.phone_number.is_some()
    }

    /// True when every supplied field equals the contact's stored value.
    pub fn matches_exactly(&self, contact: &Contact) -> bool {
        let email_ok = self
            .email
            .as_deref()
            .map_or(true, |email| contact.email.as_deref() == Some(email));
        let phone_ok = self
            .phone_number
            .as_deref()
            .map_or(true, |phone| contact.phone_number.as_deref() == Some(phone));
        email_ok && phone_ok
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "email={} phone={}",
            self.email.as_deref().unwrap_or("-"),
            self.phone_number.as_deref().unwrap_or("-")
        )
    }
}

/// Request body of `/identify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }

    pub fn into_observation(self) -> Result<Observation, IdentifyError> {
        Observation::new(self.email, self.phone_number)
    }
}

/// Phone numbers are accepted both as JSON strings and JSON numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(u64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(text)) => Some(text),
        Some(Raw::Integer(value)) => Some(value.to_string()),
        Some(Raw::Float(value)) => Some(value.to_string()),
    })
}

/// Deduplicated view of one resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Response body of `/identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactSummary,
}
