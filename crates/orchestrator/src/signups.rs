//! Participant registration for prize draws.

use std::sync::Arc;

use lifecycle::{
    Clock, DrawCatalog, DrawId, EntityKind, Participant, ParticipantDirectory, RecordStore,
    SignupInsert, SignupRecord, SignupStore,
};
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::SignupError;

/// Result of a successful registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// The participant is now entered in the draw.
    Registered {
        /// Whether the upstream customer record was created or tagged. A
        /// failure there does not undo the signup.
        participant_synced: bool,
    },
    /// The email already holds a signup; nothing changed.
    AlreadyRegistered {
        /// Draw the existing signup belongs to.
        existing_draw: DrawId,
    },
}

/// Validates and stores draw registrations.
pub struct SignupRegistrar {
    records: Arc<dyn RecordStore>,
    signups: Arc<dyn SignupStore>,
    catalog: Arc<dyn DrawCatalog>,
    directory: Arc<dyn ParticipantDirectory>,
    clock: Arc<dyn Clock>,
}

impl SignupRegistrar {
    /// Creates a registrar over the given collaborators.
    pub fn new(
        records: Arc<dyn RecordStore>,
        signups: Arc<dyn SignupStore>,
        catalog: Arc<dyn DrawCatalog>,
        directory: Arc<dyn ParticipantDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            signups,
            catalog,
            directory,
            clock,
        }
    }

    /// Registers `participant` for `draw_id`, authenticated by the draw's secret.
    ///
    /// Registration closes when the draw's persisted start time is reached.
    /// An email can hold one signup across all draws; repeats are absorbed.
    /// A new signup is then mirrored upstream as a customer tagged with the
    /// draw id.
    #[instrument(skip_all, fields(draw_id = %draw_id))]
    pub async fn register(
        &self,
        draw_id: &DrawId,
        participant: Participant,
        secret: &str,
    ) -> Result<SignupOutcome, SignupError> {
        if !participant.is_named() {
            return Err(SignupError::MissingName(draw_id.clone()));
        }

        let Some(config) = self.catalog.fetch_draw_config(draw_id).await? else {
            return Err(SignupError::DrawNotFound(draw_id.clone()));
        };

        let secret_matches = config
            .secret
            .as_deref()
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(secret.as_bytes())));
        if !secret_matches {
            info!("registration rejected: invalid secret");
            return Err(SignupError::InvalidSecret(draw_id.clone()));
        }

        if let Some(record) = self.records.get(draw_id).await? {
            let record = record.value;
            if record.kind != EntityKind::Draw {
                return Err(SignupError::NotADraw(draw_id.clone()));
            }
            if !record.start_time.is_after(self.clock.now()) {
                return Err(SignupError::SignupClosed {
                    draw_id: draw_id.clone(),
                    started_at: record.start_time,
                });
            }
        }

        let signup = SignupRecord {
            draw_id: draw_id.clone(),
            email: participant.email.clone(),
        };
        match self.signups.insert_signup(signup).await? {
            SignupInsert::Inserted => {
                info!("participant registered");
                let participant_synced =
                    match self.directory.tag_participant(&participant, draw_id).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry = ?e.retry_policy(),
                                "participant not tagged upstream"
                            );
                            false
                        }
                    };
                Ok(SignupOutcome::Registered { participant_synced })
            }
            SignupInsert::EmailTaken { existing_draw } => {
                info!(existing_draw = %existing_draw, "email already registered");
                Ok(SignupOutcome::AlreadyRegistered { existing_draw })
            }
        }
    }
}
