// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ensemble CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers, hub mode and logging setup for the `ensemble` binary

pub mod commands;
pub mod daemon;
pub mod logging;
