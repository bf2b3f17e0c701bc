// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod agent_comm;
pub mod code_exec;
pub mod edit_file;
pub mod file_ops;
pub mod git_ops;
pub mod package_ops;
pub mod path_guard;
