/*
 *
 * Copyright 2025 wirecall authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::status::Status;

/// A request-scoped context carrying an optional deadline and a cancellation
/// signal.
///
/// Contexts form a tree: a child derived with [`Context::with_cancel`] or
/// [`Context::with_timeout`] is cancelled whenever its parent is, and a
/// child's deadline is never later than its parent's.  Cancelling a child
/// does not affect the parent.
#[derive(Clone, Debug)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

/// Cancels the [`Context`] it was derived with.  Cancellation is advisory
/// and idempotent.
#[derive(Clone, Debug)]
pub struct Cancel {
    token: CancellationToken,
}

impl Cancel {
    /// Cancel the associated context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl Context {
    /// Returns an empty root context with no deadline that is never
    /// cancelled.
    pub fn background() -> Self {
        Context {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Derives a cancellable child context.
    pub fn with_cancel(&self) -> (Context, Cancel) {
        let token = self.token.child_token();
        (
            Context {
                deadline: self.deadline,
                token: token.clone(),
            },
            Cancel { token },
        )
    }

    /// Derives a cancellable child context whose deadline is the minimum of
    /// the parent's deadline and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, Cancel) {
        let proposed = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, proposed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let token = self.token.child_token();
        (
            Context {
                deadline,
                token: token.clone(),
            },
            Cancel { token },
        )
    }

    /// The deadline of this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes when the context is cancelled or its deadline passes.
    /// Pending forever on a background context.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Reports the status this context is done with: `DeadlineExceeded` when
    /// the deadline has passed, `Cancelled` when cancelled, and `None` while
    /// the context is still live.
    ///
    /// The deadline is checked first so that a context cancelled *because*
    /// it timed out reports the timeout.
    pub fn error(&self) -> Option<Status> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Status::deadline_exceeded("context deadline exceeded"));
            }
        }
        if self.token.is_cancelled() {
            return Some(Status::cancelled("context cancelled"));
        }
        None
    }

    /// Reports whether the context has been cancelled or has expired.
    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }
}
