//! Adapter contracts (§4.2, §6). New input or output adapters only need to
//! implement one of these two traits — modeled directly on the teacher's
//! `channels::traits::ChannelAdapter` shape (`id`, async lifecycle methods,
//! `anyhow::Result` at the adapter boundary).

use std::sync::Arc;

use async_trait::async_trait;

use crate::buddy::event::{AdapterCommand, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

/// A producer of input events. `start` is expected to spawn its own worker
/// task(s) and return once they are running; `stop` must unblock any
/// in-progress blocking read before joining, per §10's resource discipline.
#[async_trait]
pub trait InputAdapter: Send + Sync {
    /// Stable adapter identifier, used in config, logs, and command
    /// broadcast bookkeeping.
    fn id(&self) -> &'static str;

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Best-effort reaction to a broadcast adapter command. Returns
    /// whether this adapter acted on it; `false` means "not for me" or
    /// "already in that state", never an error (§4.2).
    async fn handle_command(&self, cmd: AdapterCommand) -> bool {
        let _ = cmd;
        false
    }
}

/// A consumer of output events. Also a [`RouteTarget`] so the Router can
/// enqueue directly onto the adapter's own internal queue without going
/// through its worker loop.
#[async_trait]
pub trait OutputAdapter: Send + Sync + RouteTarget {
    fn id(&self) -> &'static str;

    /// The output kinds this adapter wants routed to it. Declared
    /// statically so the Router can be wired purely from configuration
    /// (§9.2).
    fn handled_kinds(&self) -> &'static [OutputKind];

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn handle_command(&self, cmd: AdapterCommand) -> bool {
        let _ = cmd;
        false
    }
}
