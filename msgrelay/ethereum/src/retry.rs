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

use crate::ChainError;
use std::{future::Future, time::Duration};

/// Exponential backoff for transient [`ChainError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1 << attempt.min(16))
            .min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails with a non-transient error or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0;

        loop {
            match f().await {
                Err(err) if err.is_transient() && attempt + 1 < self.attempts => {
                    let delay = self.delay(attempt);
                    log::warn!("{what} failed: {err}. Retrying in {delay:?}...");

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}
