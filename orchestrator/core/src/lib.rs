// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ensemble Core
//!
//! Keeps a local agent hub running and reachable, and routes free text to
//! the agents behind it.
//!
//! # Architecture
//!
//! - **domain:** agent table, wire protocol, status and lock records,
//!   configuration, the process supervisor and its seams
//! - **application:** startup orchestration and message routing
//! - **infrastructure:** lock file, status file, wire client, health probe,
//!   hub process launcher, external startup steps
//! - **presentation:** the hub server itself

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
