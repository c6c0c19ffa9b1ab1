/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/backoff.rs
*
* Converts a resource's consecutive-failure counter into the delay before its
* next reconciliation. The delay grows geometrically from `base` and is capped
* at `max`. Because a successful cycle resets the counter, the first failure
* after a success is always retried after `base`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureBackoff {
    base: Duration,
    factor: u32,
    max: Duration,
}

impl FailureBackoff {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1),
            max: max.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay for a resource that has already failed `failure_count` times in a row.
    pub fn delay(&self, failure_count: i64) -> Duration {
        let exponent = u32::try_from(failure_count.max(0)).unwrap_or(u32::MAX);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(multiplier)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
