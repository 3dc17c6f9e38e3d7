//! Request cancellation.
//!
//! SQL Server cancels a request through an out-of-band Attention packet. The
//! connection's IO is split into read and write halves, so a
//! [`CancelHandle`] can write the Attention from another task while the
//! owner is blocked reading the response. The owner then discards the rest
//! of the response up to the server's acknowledgement and fails the request
//! with [`Error::Cancelled`](crate::Error::Cancelled).
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! let cancel = client.cancel_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     let _ = cancel.cancel().await;
//! });
//!
//! // Fails with Error::Cancelled if it runs longer than 5 seconds.
//! client.execute_batch("SELECT * FROM very_large_table", &mut ()).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mssql_codec::AttentionSender;
use tokio::sync::Notify;

use crate::error::Result;
use crate::login::Transport;

/// Shared between the client and its cancel handles.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    in_flight: AtomicBool,
    pub(crate) notify: Notify,
}

impl CancelState {
    pub(crate) fn begin_request(&self) {
        self.in_flight.store(true, Ordering::Release);
    }

    pub(crate) fn end_request(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Cancels the request currently running on a connection.
///
/// Cloneable and `Send + Sync`. Cancelling is idempotent: while an
/// Attention is awaiting acknowledgement, further calls do nothing.
#[derive(Clone)]
pub struct CancelHandle {
    attention: AttentionSender<Box<dyn Transport>>,
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub(crate) fn new(attention: AttentionSender<Box<dyn Transport>>, state: Arc<CancelState>) -> Self {
        Self { attention, state }
    }

    /// Ask the server to stop the running request.
    ///
    /// Returns `false` when no request was running, in which case nothing is
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the Attention packet cannot be written.
    pub async fn cancel(&self) -> Result<bool> {
        if !self.state.in_flight() {
            tracing::debug!("cancel requested with no request in flight");
            return Ok(false);
        }
        // Only the first caller writes; a bulk load in progress sends the
        // Attention after its last packet.
        self.attention.send_attention().await?;
        self.state.notify.notify_one();
        Ok(true)
    }

    /// Whether an Attention is awaiting acknowledgement.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.attention.is_pending()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("in_flight", &self.state.in_flight())
            .field("pending", &self.attention.is_pending())
            .finish()
    }
}
