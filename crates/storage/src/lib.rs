// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for Odd Jobs: atomic [`meow_core::Run`] persistence.

mod run_store;

pub use run_store::{FsRunStore, RunFilter, RunLock, RunStore, RunStoreError};
