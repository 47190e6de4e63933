//! Process entry points (spec.md §1 "CLI ergonomics... explicit Non-goal" —
//! kept deliberately minimal). Same `#[derive(Parser)]`/`#[derive(Subcommand)]`
//! shape as the teacher's `cli.rs`, trimmed to the two commands this service
//! actually needs.

use clap::{Parser, Subcommand};

/// cee-gateway — decision-graph generation HTTP service
#[derive(Parser)]
#[command(name = "cee-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the pipeline once against the fixture LLM provider, no network
    /// required. Used by load-test tooling and smoke checks.
    Fixtures {
        /// Decision brief to draft a graph for
        #[arg(long)]
        brief: String,
        /// Deterministic seed
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Optional archetype hint
        #[arg(long)]
        archetype_hint: Option<String>,
    },
}
