// NetSecSim: Containerized BGP lab orchestration written in Rust
// Copyright (C) 2023 The NetSecSim Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Cooperative cancellation of long-running operations.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::sync::watch;

/// Token that signals cancellation to all operations of a lab. Cloning the token yields a handle
/// to the same cancellation state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a new token that is not yet cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Cancel all operations that observe this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Check if the token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // the sender lives as long as any clone of the token, so this cannot happen while
                // we hold `self`.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run the future until it completes or until the token is cancelled.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            x = fut => Ok(x),
        }
    }

    /// Sleep for the given duration, unless the token is cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.run(tokio::time::sleep(duration)).await
    }
}

/// The operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation was cancelled")]
pub struct Cancelled;
