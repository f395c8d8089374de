use std::future::Future;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::Shared;
use crate::client::command::{Command, Inbox};
use crate::swarm::SwarmClient;

/// Drains the command queues until shutdown, running each command on its own worker task.
///
/// Commands of one queue are spawned in submission order. On shutdown the workers are aborted
/// and joined, the metadata waiters are joined and the swarm client is closed.
pub(crate) async fn run<C: SwarmClient>(shared: Arc<Shared<C>>, mut inbox: Inbox) {
    let permits = Arc::new(Semaphore::new(shared.config.max_workers));
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            Some(Command { args, reply }) = inbox.adds.recv() => {
                let Some(permit) = acquire(&permits, &shared.shutdown).await else { break };
                let shared = Arc::clone(&shared);
                spawn(&mut workers, permit, async move {
                    let result = shared.add(&args).await;
                    if let Err(err) = &result {
                        warn!("unable to add {}: {:#}", args, err);
                    }
                    let _ = reply.send(result);
                });
            }
            Some(Command { args, reply }) = inbox.removes.recv() => {
                let Some(permit) = acquire(&permits, &shared.shutdown).await else { break };
                let shared = Arc::clone(&shared);
                spawn(&mut workers, permit, async move {
                    let result = shared.remove(&args).await;
                    if let Err(err) = &result {
                        warn!("unable to remove {}: {:#}", args, err);
                    }
                    let _ = reply.send(result);
                });
            }
            Some(Command { args: (info_hash, bytes), reply }) = inbox.updates.recv() => {
                let Some(permit) = acquire(&permits, &shared.shutdown).await else { break };
                let shared = Arc::clone(&shared);
                spawn(&mut workers, permit, async move {
                    let limitation = shared.update_budget(&info_hash, bytes).await;
                    let _ = reply.send(Ok(limitation));
                });
            }
            Some(result) = workers.join_next() => {
                if let Err(err) = result {
                    if err.is_panic() {
                        error!("worker panicked: {}", err);
                    }
                }
            }
        }
    }

    debug!("dispatcher shutting down, {} workers in flight", workers.len());
    drop(inbox);
    workers.shutdown().await;
    shared.waiters.close();
    shared.waiters.wait().await;
    shared.client.close();
    info!("dispatcher stopped");
}

async fn acquire(
    permits: &Arc<Semaphore>,
    shutdown: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        permit = Arc::clone(permits).acquire_owned() => permit.ok(),
    }
}

fn spawn<F>(workers: &mut JoinSet<()>, permit: OwnedSemaphorePermit, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    workers.spawn(async move {
        let _permit = permit;
        work.await;
    });
}
