//! Cooperative cancellation signal threaded through every component.
//!
//! A single [`CancelToken`] is cloned into C1–C7; every network call, stream read, and save
//! checks it at a suspension point. The orchestrator installs the OS-signal trap (spec.md §5):
//! the first `ctrl_c` cancels and asks components to flush; the second force-exits.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    signal_count: AtomicU8,
    notify: tokio::sync::Notify,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                signal_count: AtomicU8::new(0),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns an error carrying [`crate::errors::Cancelled`] if the token has fired;
    /// intended to be called at every suspension point per spec.md §5.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            Err(crate::errors::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Records one interrupt. Returns the running count: 1 on first cancel (flush and exit),
    /// 2+ on second+ (caller should force-exit without further I/O).
    pub fn signal(&self) -> u8 {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        self.inner.signal_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// Installs the ctrl-c trap described in spec.md §4.8/§5: first signal flips the token,
    /// second calls `std::process::exit(2)` immediately.
    pub fn install_trap(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if token.signal() > 1 {
                    std::process::exit(2);
                }
            }
        });
    }
}
