//! Event loops that own the controllers.
//!
//! # Threading model (for beginners)
//!
//! ```text
//!  transport endpoint ─(unbounded)─► forwarder ─┐
//!  capture / ticker   ─────────────────────────┤  bounded mpsc   ┌──────────────┐
//!  SourceHandle / SinkHandle (API calls) ───────┴───────────────► │  event loop  │
//!                                                                 │  controller  │
//!                                                                 └──────────────┘
//! ```
//!
//! Each role runs one task that exclusively owns its controller, so no
//! controller state is ever behind a lock.  Everything else (transport
//! readers, the capture source, the latency ticker, public API callers)
//! talks to the loop by enqueueing an event.  The queue is bounded:
//! producers wait only when it is full.
//!
//! API calls carry a `oneshot` reply slot wrapped as a [`Completion`]; the
//! controller invokes it exactly once, from inside the loop.  If the loop is
//! gone the caller sees [`SharingError::Disconnected`].

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::application::error::SharingError;
use crate::application::pending::Completion;

pub mod node;
pub mod sink_loop;
pub mod source_loop;

pub use node::{Node, NodeHardware, NodeSettings, RoleEndpoint};
pub use sink_loop::{spawn_sink_loop, SinkHandle};
pub use source_loop::{spawn_source_loop, SourceHandle};

/// Builds a completion whose outcome is read back through the receiver.
pub(crate) fn reply_slot<T: Send + 'static>(
) -> (Completion<T>, oneshot::Receiver<Result<T, SharingError>>) {
    let (tx, rx) = oneshot::channel();
    let completion: Completion<T> = Box::new(move |result| {
        // The caller may have stopped waiting.
        let _ = tx.send(result);
    });
    (completion, rx)
}

/// Waits for a reply slot.  A slot dropped unanswered means the loop died.
pub(crate) async fn await_reply<T>(
    rx: oneshot::Receiver<Result<T, SharingError>>,
) -> Result<T, SharingError> {
    rx.await.unwrap_or(Err(SharingError::Disconnected))
}

/// Enqueues `event` on a loop, mapping a closed queue to `Disconnected`.
pub(crate) async fn enqueue<E>(tx: &mpsc::Sender<E>, event: E) -> Result<(), SharingError> {
    tx.send(event).await.map_err(|_| {
        warn!("event loop is gone");
        SharingError::Disconnected
    })
}

/// Moves items from an unbounded producer into a bounded loop queue.
///
/// Ends when either side closes.
pub(crate) fn spawn_forwarder<T, E, F>(
    name: &'static str,
    mut from: mpsc::UnboundedReceiver<T>,
    to: mpsc::Sender<E>,
    wrap: F,
) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> E + Send + 'static,
{
    spawn_named(name, async move {
        while let Some(item) = from.recv().await {
            if to.send(wrap(item)).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_named<F>(name: &'static str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        fut.await;
        debug!(task = name, "task finished");
    })
}
