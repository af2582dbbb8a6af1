// ── Reactor ──
//
// Hosts one watchlist on a tokio task. Submissions, inbound provider
// messages and channel events arrive over a bounded command channel;
// timers are driven from the watchlist's next deadline; consumer events
// leave over an unbounded channel. The task is the only caller of the
// watchlist, which stays synchronous.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use streamwatch_api::{ChannelEvent, Transport, WireMsg};

use crate::error::WatchlistError;
use crate::event::{ConsumerEvent, SubmitOptions};
use crate::watchlist::{Submission, Watchlist};

const COMMAND_CHANNEL_SIZE: usize = 64;

enum Command {
    Submit {
        submission: Submission,
        options: SubmitOptions,
        response_tx: oneshot::Sender<Result<(), WatchlistError>>,
    },
    Deliver(WireMsg),
    Channel(ChannelEvent),
}

/// Handle to a running reactor task.
pub struct ReactorHandle {
    command_tx: mpsc::Sender<Command>,
    events: Option<mpsc::UnboundedReceiver<ConsumerEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start driving `watchlist` on a new task until `cancel` fires or every
/// handle is dropped.
pub fn spawn<T>(watchlist: Watchlist<T>, cancel: CancellationToken) -> ReactorHandle
where
    T: Transport + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(watchlist, command_rx, events_tx, cancel.clone()));
    ReactorHandle {
        command_tx,
        events: Some(events_rx),
        cancel,
        task,
    }
}

impl ReactorHandle {
    /// Apply a submission on the reactor task and wait for its result.
    pub async fn submit(
        &self,
        submission: Submission,
        options: SubmitOptions,
    ) -> Result<(), WatchlistError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Submit {
                submission,
                options,
                response_tx,
            })
            .await
            .map_err(|_| WatchlistError::ShutDown)?;
        response_rx.await.map_err(|_| WatchlistError::ShutDown)?
    }

    /// Feed one decoded provider message to the watchlist.
    pub async fn deliver(&self, msg: impl Into<WireMsg>) -> Result<(), WatchlistError> {
        self.command_tx
            .send(Command::Deliver(msg.into()))
            .await
            .map_err(|_| WatchlistError::ShutDown)
    }

    pub async fn channel_event(&self, event: ChannelEvent) -> Result<(), WatchlistError> {
        self.command_tx
            .send(Command::Channel(event))
            .await
            .map_err(|_| WatchlistError::ShutDown)
    }

    /// Consumer events as a stream. Only the first call gets it.
    pub fn events(&mut self) -> Option<UnboundedReceiverStream<ConsumerEvent>> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!(error = %e, "reactor task ended abnormally");
        }
    }
}

async fn run<T: Transport>(
    mut watchlist: Watchlist<T>,
    mut rx: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<ConsumerEvent>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = watchlist.next_timer_deadline();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep_until(deadline) => watchlist.process_timers(),
            command = rx.recv() => {
                let Some(command) = command else { break };
                // Timers already due go before the command, even when the
                // timer driver has not caught up with the clock yet.
                watchlist.process_timers();
                handle(&mut watchlist, command);
            }
        }
        for event in watchlist.drain_events() {
            let _ = events_tx.send(event);
        }
    }
    debug!("reactor stopped");
}

fn handle<T: Transport>(watchlist: &mut Watchlist<T>, command: Command) {
    match command {
        Command::Submit {
            submission,
            options,
            response_tx,
        } => {
            let result = watchlist.apply(submission, &options);
            let _ = response_tx.send(result);
        }
        Command::Deliver(msg) => watchlist.process_msg(msg),
        Command::Channel(event) => watchlist.channel_event(event),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
