use anyhow::{Result, anyhow, bail};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::client::Config;
use crate::crypto::InfoHash;

/// Outcome of an add command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    Tracked,
    AlreadyTracked,
}

/// Outcome of a remove command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Removed,
    NotFound,
}

/// Pending outcome of a submitted command. Dropping it discards the outcome.
#[derive(Debug)]
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Reply<T> {
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| anyhow!("manager stopped before replying"))?
    }
}

pub(crate) struct Command<A, T> {
    pub args: A,
    pub reply: oneshot::Sender<Result<T>>,
}

impl<A, T> Command<A, T> {
    fn new(args: A) -> (Self, Reply<T>) {
        let (reply, rx) = oneshot::channel();
        (Self { args, reply }, Reply { rx })
    }
}

pub(crate) type AddCommand = Command<String, Added>;
pub(crate) type RemoveCommand = Command<String, Removed>;
pub(crate) type UpdateCommand = Command<(InfoHash, u64), Option<u64>>;

/// Sending half of the command queues, owned by the manager.
pub(crate) struct Queues {
    pub adds: Sender<AddCommand>,
    pub removes: Sender<RemoveCommand>,
    pub updates: Sender<UpdateCommand>,
}

/// Receiving half of the command queues, owned by the dispatcher.
pub(crate) struct Inbox {
    pub adds: Receiver<AddCommand>,
    pub removes: Receiver<RemoveCommand>,
    pub updates: Receiver<UpdateCommand>,
}

pub(crate) fn queues(config: &Config) -> (Queues, Inbox) {
    let (adds_tx, adds_rx) = mpsc::channel(config.add_queue);
    let (removes_tx, removes_rx) = mpsc::channel(config.remove_queue);
    let (updates_tx, updates_rx) = mpsc::channel(config.update_queue);
    let queues = Queues {
        adds: adds_tx,
        removes: removes_tx,
        updates: updates_tx,
    };
    let inbox = Inbox {
        adds: adds_rx,
        removes: removes_rx,
        updates: updates_rx,
    };
    (queues, inbox)
}

/// Enqueues `args`, waiting for room in the queue. Fails once shutdown is signalled.
pub(crate) async fn submit<A, T>(
    tx: &Sender<Command<A, T>>,
    shutdown: &CancellationToken,
    args: A,
) -> Result<Reply<T>> {
    if shutdown.is_cancelled() {
        bail!("manager is stopped");
    }
    let (command, reply) = Command::new(args);
    tokio::select! {
        _ = shutdown.cancelled() => bail!("manager is stopped"),
        result = tx.send(command) => {
            result.map_err(|_| anyhow!("manager is stopped"))?;
        }
    }
    Ok(reply)
}
