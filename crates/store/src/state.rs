//! The store contents and the conditional-write rules, independent of where
//! they are kept.

use std::collections::{BTreeMap, HashMap};

use lifecycle::{
    DrawId, Email, ExternalId, RecordVersion, ScheduledEntity, SignupInsert, SignupRecord,
    StoreError, Versioned, WritePrecondition,
};
use serde::{Deserialize, Serialize};

/// Snapshot schema version written by this crate.
pub(crate) const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub(crate) version: RecordVersion,
    pub(crate) entity: ScheduledEntity,
}

/// Everything a store holds: scheduled records plus draw signups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    records: BTreeMap<ExternalId, StoredRecord>,
    signups: Vec<SignupRecord>,
    /// Email → draw index over `signups`; rebuilt after loading.
    #[serde(skip)]
    emails: HashMap<Email, DrawId>,
}

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) schema_version: u32,
    #[serde(flatten)]
    pub(crate) state: StoreState,
}

impl StoreState {
    /// Rebuilds derived indexes after deserialisation.
    pub(crate) fn reindex(&mut self) {
        self.emails = self
            .signups
            .iter()
            .map(|s| (s.email.clone(), s.draw_id.clone()))
            .collect();
    }

    pub(crate) fn get(&self, external_id: &ExternalId) -> Option<Versioned<ScheduledEntity>> {
        self.records.get(external_id).map(|r| Versioned {
            value: r.entity.clone(),
            version: r.version,
        })
    }

    pub(crate) fn put(
        &mut self,
        entity: ScheduledEntity,
        precondition: WritePrecondition,
    ) -> Result<RecordVersion, StoreError> {
        let current = self.records.get(&entity.external_id).map(|r| r.version);
        let version = match (precondition, current) {
            (WritePrecondition::MustNotExist, None) => RecordVersion::INITIAL,
            (WritePrecondition::MatchesVersion(expected), Some(actual)) if expected == actual => {
                actual.next()
            }
            (WritePrecondition::MustNotExist, actual) => {
                return Err(StoreError::Conflict {
                    external_id: entity.external_id,
                    expected: None,
                    actual,
                })
            }
            (WritePrecondition::MatchesVersion(expected), actual) => {
                return Err(StoreError::Conflict {
                    external_id: entity.external_id,
                    expected: Some(expected),
                    actual,
                })
            }
        };
        self.records
            .insert(entity.external_id.clone(), StoredRecord { version, entity });
        Ok(version)
    }

    pub(crate) fn delete(
        &mut self,
        external_id: &ExternalId,
        expected: RecordVersion,
    ) -> Result<(), StoreError> {
        match self.records.get(external_id).map(|r| r.version) {
            Some(actual) if actual == expected => {
                self.records.remove(external_id);
                Ok(())
            }
            actual => Err(StoreError::Conflict {
                external_id: external_id.clone(),
                expected: Some(expected),
                actual,
            }),
        }
    }

    pub(crate) fn all(&self) -> Vec<Versioned<ScheduledEntity>> {
        self.records
            .values()
            .map(|r| Versioned {
                value: r.entity.clone(),
                version: r.version,
            })
            .collect()
    }

    pub(crate) fn signups_for(&self, draw_id: &DrawId) -> Vec<SignupRecord> {
        self.signups
            .iter()
            .filter(|s| &s.draw_id == draw_id)
            .cloned()
            .collect()
    }

    pub(crate) fn insert_signup(&mut self, signup: SignupRecord) -> SignupInsert {
        if let Some(existing_draw) = self.email_owner(&signup.email) {
            return SignupInsert::EmailTaken { existing_draw };
        }
        self.emails
            .insert(signup.email.clone(), signup.draw_id.clone());
        self.signups.push(signup);
        SignupInsert::Inserted
    }

    pub(crate) fn email_owner(&self, email: &Email) -> Option<DrawId> {
        self.emails.get(email).cloned()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}
