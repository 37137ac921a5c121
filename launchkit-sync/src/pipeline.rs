//! Single entrypoint mapping a requested operation onto a [`Session`].

use crate::orchestrator::{RepairOutcome, Session, StatusReport, SyncOutcome};
use crate::publish::{PublishReport, PublishRequest};
use crate::SyncError;

/// An operation requested by a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Status,
    Sync,
    Repair,
    Uninstall,
    Publish(PublishRequest),
}

/// What the operation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Status(StatusReport),
    Synced(SyncOutcome),
    Repair(RepairOutcome),
    Uninstalled,
    Published(PublishReport),
}

/// Run `op` against `session`.
pub fn run(session: &Session, op: Operation) -> Result<Outcome, SyncError> {
    tracing::debug!(game = %session.game(), ?op, "running operation");
    match op {
        Operation::Status => session.status().map(Outcome::Status),
        Operation::Sync => session.sync().map(Outcome::Synced),
        Operation::Repair => session.repair().map(Outcome::Repair),
        Operation::Uninstall => session.uninstall().map(|()| Outcome::Uninstalled),
        Operation::Publish(request) => session.publish(&request).map(Outcome::Published),
    }
}
