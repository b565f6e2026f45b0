//! Draw Execution Engine: runs a prize draw when its "started" timer fires.

use std::sync::{Arc, Mutex, PoisonError};

use lifecycle::{
    select_winners, DrawCatalog, DrawId, Email, OrderCreator, OrderId, RetryPolicy, SignupStore,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{error, info, info_span, instrument, Instrument};

use crate::DrawError;

/// A winner whose prize order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinnerOrder {
    /// Winner contact.
    pub email: Email,
    /// Order created for the winner.
    pub order_id: OrderId,
}

/// A winner whose prize order could not be placed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinnerFailure {
    /// Winner contact.
    pub email: Email,
    /// Description of the failure.
    pub error: String,
    /// Whether placing the order again might succeed.
    pub retry: RetryPolicy,
}

/// Result of one draw execution, winner by winner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawReport {
    /// Draw that was executed.
    pub draw_id: DrawId,
    /// Number of signups considered.
    pub entrants: usize,
    /// Winners whose orders were created.
    pub succeeded: Vec<WinnerOrder>,
    /// Winners whose order creation failed.
    pub failed: Vec<WinnerFailure>,
}

impl DrawReport {
    /// Total number of winners selected.
    pub fn winners(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// What [`DrawExecutionEngine::execute`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome {
    /// The draw no longer exists upstream; nothing was done.
    Aborted,
    /// Winners were selected and orders attempted.
    Completed(DrawReport),
}

/// Selects winners for a draw and places their prize orders.
pub struct DrawExecutionEngine {
    catalog: Arc<dyn DrawCatalog>,
    signups: Arc<dyn SignupStore>,
    orders: Arc<dyn OrderCreator>,
    rng: Mutex<StdRng>,
}

impl DrawExecutionEngine {
    /// Creates an engine with an entropy-seeded RNG.
    pub fn new(
        catalog: Arc<dyn DrawCatalog>,
        signups: Arc<dyn SignupStore>,
        orders: Arc<dyn OrderCreator>,
    ) -> Self {
        Self::with_rng(catalog, signups, orders, StdRng::from_entropy())
    }

    /// Creates an engine with a caller-supplied RNG (e.g. seeded for tests).
    pub fn with_rng(
        catalog: Arc<dyn DrawCatalog>,
        signups: Arc<dyn SignupStore>,
        orders: Arc<dyn OrderCreator>,
        rng: StdRng,
    ) -> Self {
        Self {
            catalog,
            signups,
            orders,
            rng: Mutex::new(rng),
        }
    }

    /// Runs the draw.
    ///
    /// Each winner's order is an isolated unit of work: a failure is recorded
    /// in the report and does not stop the remaining winners.
    #[instrument(skip_all, fields(draw_id = %draw_id))]
    pub async fn execute(&self, draw_id: &DrawId) -> Result<DrawOutcome, DrawError> {
        let config = self
            .catalog
            .fetch_draw_config(draw_id)
            .await
            .map_err(|source| DrawError::Catalog {
                draw_id: draw_id.clone(),
                source,
            })?;
        let Some(config) = config else {
            info!("draw no longer exists upstream; aborting");
            return Ok(DrawOutcome::Aborted);
        };

        let signups = self
            .signups
            .fetch_signups(draw_id)
            .await
            .map_err(|source| DrawError::Signups {
                draw_id: draw_id.clone(),
                source,
            })?;
        let entrants = signups.len();

        let slots = usize::try_from(config.number_available).unwrap_or(usize::MAX);
        let winners = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            select_winners(&mut *rng, signups, slots)
        };
        info!(entrants, slots, winners = winners.len(), "winners selected");

        let mut report = DrawReport {
            draw_id: draw_id.clone(),
            entrants,
            succeeded: Vec::with_capacity(winners.len()),
            failed: Vec::new(),
        };

        for winner in winners {
            let email = winner.email;
            let span = info_span!("winner_order", email = %email);
            let result = self
                .orders
                .create_order_for_winner(draw_id, &email, &config.prize_line_item)
                .instrument(span)
                .await;
            match result {
                Ok(order_id) => {
                    info!(%email, %order_id, "prize order created");
                    report.succeeded.push(WinnerOrder { email, order_id });
                }
                Err(e) => {
                    error!(%email, error = %e, "prize order failed");
                    report.failed.push(WinnerFailure {
                        email,
                        retry: e.retry_policy(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "draw executed"
        );
        Ok(DrawOutcome::Completed(report))
    }
}
