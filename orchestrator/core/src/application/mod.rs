// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod router;
pub mod startup;

pub use router::{EnvelopeStatus, MessageRouter, ResponseEnvelope};
pub use startup::{PhaseStep, StartupOrchestrator, StartupReport, StatusObserver};
