// This file is part of Gear.
//
// Copyright (C) 2024-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Process-wide nonce bookkeeping of the signing account.

use crate::ChainError;
use std::future::Future;
use tokio::sync::{Mutex, MutexGuard};

/// Serializes nonce allocation across concurrently running jobs.
///
/// The counter is read from the chain lazily. A slot that is dropped without
/// [`NonceSlot::commit`] invalidates the counter, so the next allocation
/// re-reads the pending nonce instead of reusing the slot.
#[derive(Debug, Default)]
pub struct NonceAllocator {
    next: Mutex<Option<u64>>,
}

/// Exclusive right to sign with one nonce. Other allocations wait until it
/// is committed or dropped.
#[derive(Debug)]
pub struct NonceSlot<'a> {
    guard: MutexGuard<'a, Option<u64>>,
    nonce: u64,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next nonce, reading it with `read_pending` if unknown.
    pub async fn allocate<F, Fut>(&self, read_pending: F) -> Result<NonceSlot<'_>, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, ChainError>>,
    {
        let mut guard = self.next.lock().await;

        let nonce = match guard.take() {
            Some(nonce) => nonce,
            None => {
                let nonce = read_pending().await?;
                log::debug!("Read pending nonce {nonce} from chain");
                nonce
            }
        };

        Ok(NonceSlot { guard, nonce })
    }

    /// Forgets the cached counter.
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }
}

impl NonceSlot<'_> {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Marks the nonce as consumed by a sent transaction.
    pub fn commit(mut self) {
        *self.guard = Some(self.nonce + 1);
    }
}
