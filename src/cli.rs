// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "orkestra", version, about = "A multi-agent task orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decompose a request into role assignments, dispatch them, and verify the result.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// The task to decompose and run.
    pub request: String,

    /// Replay the most recent session's recorded responses instead of
    /// calling live model endpoints.
    #[arg(long)]
    pub replay: bool,

    /// Roles-config document (JSON or YAML). Falls back to the default
    /// search paths when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Session-root directory. A fresh timestamped session is created
    /// beneath it on a live run; the latest one is replayed under `--replay`.
    #[arg(long, default_value = "./orkestra-sessions")]
    pub shared_dir: PathBuf,

    /// A git repository to work in: a URL to clone, or a path to an
    /// existing checkout. Defaults to the current directory.
    #[arg(long)]
    pub repo: Option<String>,

    /// Raise log verbosity. Repeatable (`-v`, `-vv`, `-vvv`).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
