// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time;
use tracing::{error, instrument, warn};

use crate::status::PartitionStatus;
use crate::worker::{PartitionWorker, WorkerContext};

/// Run a worker until shutdown, restarting it from its checkpoint on failure.
///
/// Gives up after `max_partition_restarts` restarts, or at once when the error
/// cannot be cleared by a restart.
#[instrument(name = "supervisor", skip_all, fields(worker = %ctx.id))]
pub(crate) async fn supervise(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut restarts = 0u32;
    loop {
        ctx.board.set_status(ctx.id, PartitionStatus::Starting);
        let result = match PartitionWorker::restore(Arc::clone(&ctx)) {
            Ok(worker) => {
                ctx.board.set_status(ctx.id, PartitionStatus::Running);
                worker.run(shutdown.clone()).await
            }
            Err(err) => Err(err),
        };
        let err = match result {
            Ok(()) => {
                ctx.board.set_status(ctx.id, PartitionStatus::Stopped);
                return;
            }
            Err(err) => err,
        };
        if !err.is_retryable() || restarts >= ctx.config.max_partition_restarts {
            error!(%err, restarts, "partition failed");
            ctx.board.set_status(
                ctx.id,
                PartitionStatus::Failed {
                    reason: err.to_string(),
                },
            );
            return;
        }
        restarts += 1;
        warn!(%err, attempt = restarts, "worker failed; restarting from checkpoint");
        ctx.board
            .set_status(ctx.id, PartitionStatus::Restarting { attempt: restarts });
        if *shutdown.borrow() {
            ctx.board.set_status(ctx.id, PartitionStatus::Stopped);
            return;
        }
        tokio::select! {
            () = time::sleep(ctx.config.restart_backoff()) => {}
            _ = shutdown.changed() => {
                ctx.board.set_status(ctx.id, PartitionStatus::Stopped);
                return;
            }
        }
    }
}
