// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: types and rules with no I/O of their own.

pub mod agent;
pub mod error;
pub mod lock;
pub mod node_config;
pub mod protocol;
pub mod status;
pub mod supervisor;
