// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod error;
pub mod mux;
pub mod oneshot;
pub mod process;
pub mod registry;
pub mod server;
pub mod session;
pub mod test_support;
pub mod transport;
pub mod utf8;
