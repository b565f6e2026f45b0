//! The event loop: notification intake on one side, timer deliveries on the other.
//!
//! Each intake line and each delivery runs as its own task. Work for the same
//! external id runs in arrival order; work for different ids runs
//! concurrently, so a long draw execution holds up only its own draw.

use std::future::Future;
use std::sync::Arc;

use lifecycle::{
    DeferredDelivery, DrawId, Edge, Email, EntityKind, ExternalId, Notification, Participant,
};
use orchestrator::{
    DeliveryOutcome, DrawExecutionEngine, DrawOutcome, Reconciler, SignupRegistrar,
};
use serde::Deserialize;
use timers::TokioScheduler;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::lanes::Lanes;

/// One intake line.
///
/// Notification lines carry `"type": "created" | "updated" | "deleted"`;
/// `"type": "signup"` registers a participant for a draw.
#[derive(Debug)]
pub enum IntakeLine {
    Notification(Notification),
    Signup(SignupRequest),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub draw_id: DrawId,
    pub email: Email,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub secret: String,
}

impl SignupRequest {
    fn participant(&self) -> Participant {
        Participant {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

impl IntakeLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if value.get("type").and_then(serde_json::Value::as_str) == Some("signup") {
            serde_json::from_value(value).map(IntakeLine::Signup)
        } else {
            serde_json::from_value(value).map(IntakeLine::Notification)
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: usize,
    pub malformed: usize,
    pub failed: usize,
    pub deliveries_accepted: usize,
    pub deliveries_discarded: usize,
    pub draws_executed: usize,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.lines += other.lines;
        self.malformed += other.malformed;
        self.failed += other.failed;
        self.deliveries_accepted += other.deliveries_accepted;
        self.deliveries_discarded += other.deliveries_discarded;
        self.draws_executed += other.draws_executed;
    }
}

/// A unit of work for one external id.
#[derive(Debug)]
enum Work {
    Notification(Notification),
    Signup(SignupRequest),
    Delivery(DeferredDelivery),
}

impl Work {
    fn key(&self) -> ExternalId {
        match self {
            Work::Notification(notification) => notification.external_id().clone(),
            Work::Signup(request) => request.draw_id.clone(),
            Work::Delivery(delivery) => delivery.signal.entity_id.clone(),
        }
    }
}

type Finished = (ExternalId, u64, RunSummary);

/// Everything the loop dispatches to. Cloning shares the components.
#[derive(Clone)]
pub struct App {
    pub reconciler: Arc<Reconciler>,
    pub engine: Arc<DrawExecutionEngine>,
    pub registrar: Arc<SignupRegistrar>,
    pub scheduler: TokioScheduler,
}

impl App {
    /// Runs until `shutdown` resolves, or until the intake is exhausted and no
    /// work or timers remain. Work already started is finished before return.
    pub async fn run<R>(
        &self,
        intake: R,
        mut deliveries: mpsc::Receiver<DeferredDelivery>,
        shutdown: impl Future<Output = ()>,
    ) -> RunSummary
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = RunSummary::default();
        let mut lines = intake.lines();
        let mut intake_open = true;
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut lanes: Lanes<ExternalId> = Lanes::new();
        tokio::pin!(shutdown);

        loop {
            if !intake_open
                && tasks.is_empty()
                && self.scheduler.pending() == 0
                && deliveries.is_empty()
            {
                info!("intake exhausted and no timers pending");
                break;
            }

            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    finish(joined, &mut lanes, &mut summary);
                }
                line = lines.next_line(), if intake_open => match line {
                    Ok(Some(line)) => {
                        if let Some(work) = admit_line(&line, &mut summary) {
                            self.spawn(work, &mut tasks, &mut lanes);
                        }
                    }
                    Ok(None) => {
                        debug!("intake closed");
                        intake_open = false;
                    }
                    Err(e) => {
                        error!(error = %e, "intake read failed; no further notifications");
                        intake_open = false;
                    }
                },
                Some(delivery) = deliveries.recv() => {
                    self.spawn(Work::Delivery(delivery), &mut tasks, &mut lanes);
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight work");
        }
        while let Some(joined) = tasks.join_next().await {
            finish(joined, &mut lanes, &mut summary);
        }
        self.scheduler.shutdown();
        summary
    }

    fn spawn(&self, work: Work, tasks: &mut JoinSet<Finished>, lanes: &mut Lanes<ExternalId>) {
        let key = work.key();
        let mut turn = lanes.admit(key.clone());
        let app = self.clone();
        tasks.spawn(async move {
            turn.wait().await;
            let tally = app.perform(work).await;
            (key, turn.seq(), tally)
        });
    }

    async fn perform(&self, work: Work) -> RunSummary {
        match work {
            Work::Notification(notification) => self.handle_notification(notification).await,
            Work::Signup(request) => self.handle_signup(request).await,
            Work::Delivery(delivery) => self.handle_delivery(delivery).await,
        }
    }

    async fn handle_notification(&self, notification: Notification) -> RunSummary {
        let mut tally = RunSummary::default();
        let action = notification.action();
        let kind = notification.kind();
        let external_id = notification.external_id().clone();
        match self.reconciler.apply(notification).await {
            Ok(outcome) => {
                info!(%external_id, action, ?kind, ?outcome, "notification reconciled");
            }
            Err(e) => {
                tally.failed += 1;
                error!(
                    %external_id,
                    action,
                    error = %e,
                    retry = ?e.retry_policy(),
                    "notification failed"
                );
            }
        }
        tally
    }

    async fn handle_signup(&self, request: SignupRequest) -> RunSummary {
        let mut tally = RunSummary::default();
        match self
            .registrar
            .register(&request.draw_id, request.participant(), &request.secret)
            .await
        {
            Ok(outcome) => info!(draw_id = %request.draw_id, ?outcome, "signup handled"),
            Err(e) => {
                tally.failed += 1;
                warn!(draw_id = %request.draw_id, error = %e, "signup rejected");
            }
        }
        tally
    }

    async fn handle_delivery(&self, delivery: DeferredDelivery) -> RunSummary {
        let mut tally = RunSummary::default();
        let signal = match self.reconciler.on_deferred(delivery).await {
            Ok(DeliveryOutcome::Accepted(signal)) => signal,
            Ok(DeliveryOutcome::Discarded(reason)) => {
                tally.deliveries_discarded += 1;
                debug!(?reason, "delivery discarded");
                return tally;
            }
            Err(e) => {
                tally.failed += 1;
                error!(error = %e, "delivery failed");
                return tally;
            }
        };
        tally.deliveries_accepted += 1;

        if signal.kind != EntityKind::Draw || signal.edge != Edge::Started {
            return tally;
        }
        match self.engine.execute(&signal.entity_id).await {
            Ok(DrawOutcome::Completed(report)) => {
                tally.draws_executed += 1;
                info!(
                    draw_id = %report.draw_id,
                    entrants = report.entrants,
                    succeeded = report.succeeded.len(),
                    failed = report.failed.len(),
                    "draw completed"
                );
            }
            Ok(DrawOutcome::Aborted) => {
                info!(draw_id = %signal.entity_id, "draw aborted: no longer exists upstream");
            }
            Err(e) => {
                tally.failed += 1;
                error!(draw_id = %signal.entity_id, error = %e, "draw execution failed");
            }
        }
        tally
    }
}

/// Counts and parses one intake line. Blank and malformed lines yield no work.
fn admit_line(line: &str, summary: &mut RunSummary) -> Option<Work> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    summary.lines += 1;
    match IntakeLine::parse(line) {
        Ok(IntakeLine::Notification(notification)) => Some(Work::Notification(notification)),
        Ok(IntakeLine::Signup(request)) => Some(Work::Signup(request)),
        Err(e) => {
            warn!(error = %e, "skipping malformed intake line");
            summary.malformed += 1;
            None
        }
    }
}

fn finish(
    joined: Result<Finished, JoinError>,
    lanes: &mut Lanes<ExternalId>,
    summary: &mut RunSummary,
) {
    match joined {
        Ok((key, seq, tally)) => {
            lanes.release(&key, seq);
            summary.absorb(tally);
        }
        Err(e) => {
            // The lane entry stays until the key is next admitted.
            summary.failed += 1;
            error!(error = %e, "work task failed");
        }
    }
}
