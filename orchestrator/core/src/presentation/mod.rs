// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`ensemble-core`)
//!
//! The wire surface peers talk to. Request handling delegates to domain
//! types; relaying is the only state kept here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`hub_server`] | TCP, newline-delimited JSON | Hub endpoint: health, status, registration, agent relay |

pub mod hub_server;

pub use hub_server::HubServer;
