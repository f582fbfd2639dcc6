//! Split issue/settle requests.
//!
//! A `Pending*` value carries everything needed to perform a request away
//! from the session. Running it yields a [`SessionEvent`] that is handed back
//! to [`super::Session::settle`], typically after travelling through an
//! `mpsc` channel from a spawned task.

use tokio::sync::mpsc;

use super::version::Stamp;
use crate::backend::{Backend, BackendResult, Membership};
use crate::model::{Item, ItemId};

/// A read-state change waiting to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRead {
    pub item: ItemId,
    /// Target state: true for read.
    pub read: bool,
    pub stamp: Stamp,
}

impl PendingRead {
    pub async fn run<B: Backend>(self, backend: &B) -> SessionEvent {
        let result = if self.read {
            backend.mark_item_read(self.item).await
        } else {
            backend.mark_item_unread(self.item).await
        };
        SessionEvent::ReadState {
            pending: self,
            result,
        }
    }
}

/// A membership lookup for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMemberships {
    pub item: ItemId,
    pub stamp: Stamp,
}

impl PendingMemberships {
    pub async fn run<B: Backend>(self, backend: &B) -> SessionEvent {
        let result = backend.list_item_categories(self.item).await;
        SessionEvent::Memberships {
            pending: self,
            result,
        }
    }
}

/// A completed request, ready to settle.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ReadState {
        pending: PendingRead,
        result: BackendResult<Item>,
    },
    Memberships {
        pending: PendingMemberships,
        result: BackendResult<Vec<Membership>>,
    },
}

/// What settling did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied,
    /// A newer request for the same entity was issued; the response was
    /// dropped.
    Stale,
}

/// Run a pending read change on a tokio task and report through `tx`.
pub fn spawn_read<B>(
    backend: std::sync::Arc<B>,
    pending: PendingRead,
    tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()>
where
    B: Backend + 'static,
{
    tokio::spawn(async move {
        let event = pending.run(&*backend).await;
        if let Err(e) = tx.send(event).await {
            tracing::warn!(
                item_id = %pending.item,
                error = %e,
                "Failed to deliver read-state result (receiver dropped)"
            );
        }
    })
}
