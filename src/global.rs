// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use chrono::prelude::*;
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

lazy_static! {
    /// Process-wide shutdown flag, shared with the signal handlers
    pub static ref EXIT_SIGNAL: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

    /// Unix timestamp of process start
    pub static ref STARTUP_TIME: AtomicI64 = AtomicI64::new(0);
}

/// Initialize globals
pub fn init() {
    STARTUP_TIME.store(Utc::now().timestamp(), Ordering::Relaxed);
}

#[must_use]
pub fn exit_requested() -> bool {
    EXIT_SIGNAL.load(Ordering::Relaxed)
}

pub fn request_exit() {
    EXIT_SIGNAL.store(true, Ordering::Relaxed);
}
