/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared "the server told us to go away until T" state.
///
/// The host creates one of these and hands the client an `Arc`; every
/// operation consults it before touching the network. Zero means no
/// backoff. Reads and writes are individually atomic; concurrent
/// writers may clobber each other, which at worst re-opens the window
/// one request early - the next response will set it again.
#[derive(Debug, Default)]
pub struct BackoffState {
    until_local_millis: AtomicU64,
}

impl BackoffState {
    pub fn new() -> Self {
        BackoffState::default()
    }

    /// Record that requests should be deferred until the given local
    /// clock value (milliseconds).
    pub fn note_backoff(&self, until_local_millis: u64) {
        self.until_local_millis
            .store(until_local_millis, Ordering::Relaxed);
    }

    /// Returns `Some(until)` iff a backoff window is open at `now`.
    pub fn check(&self, now_local_millis: u64) -> Option<u64> {
        let until = self.until_local_millis.load(Ordering::Relaxed);
        (until != 0 && until > now_local_millis).then_some(until)
    }

    pub fn clear(&self) {
        self.until_local_millis.store(0, Ordering::Relaxed);
    }
}
