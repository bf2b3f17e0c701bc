// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Team orchestration: turns one user request into a manager-decomposed set
//! of role assignments, runs them sequence-bucket by sequence-bucket through
//! fresh per-role agent instances, and finalizes the run with a verification
//! pass and (when applicable) a git push and pull request.

pub mod agent_factory;
pub mod coordinator;
pub mod decomposition;
pub mod events;

pub use agent_factory::{build_agent, AgentBinding};
pub use coordinator::{AssignmentResult, Callback, Coordinator, CoordinatorReport};
pub use events::EventRecorder;
