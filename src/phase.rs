//! Phase definitions for the stagehand pipeline.
//!
//! This module provides:
//! - `Phase` — the fixed, totally-ordered pipeline sequence
//! - `Criticality` — whether a phase failure aborts the pipeline
//! - `PhaseSpec` — one pipeline entry binding a phase name to its agent
//!   invocation
//!
//! The fixed order is the backbone of context handoff: a phase receives the
//! accumulated minimal context of every phase strictly before it. Phase
//! names outside this order (the best-effort `improve` pass) fold all known
//! context instead — see `handoff::ContextHandoff::load_for_phase`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named step in the fixed pipeline sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Build,
    Test,
    Review,
    Ship,
}

impl Phase {
    /// The fixed total order of the pipeline.
    pub const ORDER: [Phase; 5] = [
        Phase::Plan,
        Phase::Build,
        Phase::Test,
        Phase::Review,
        Phase::Ship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::Test => "test",
            Phase::Review => "review",
            Phase::Ship => "ship",
        }
    }

    /// Parse a phase name. Returns `None` for names outside the fixed
    /// order, which callers must treat via their documented fallback.
    pub fn parse(name: &str) -> Option<Phase> {
        Self::ORDER.iter().copied().find(|p| p.as_str() == name)
    }

    /// Zero-based position in the fixed order.
    pub fn position(&self) -> usize {
        Self::ORDER.iter().position(|p| p == self).unwrap_or(0)
    }

    /// All phases strictly earlier than this one, in order.
    pub fn predecessors(&self) -> &'static [Phase] {
        &Self::ORDER[..self.position()]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a phase failure aborts the whole pipeline.
///
/// Hard phases halt the run; soft phases are best-effort and their failure
/// is logged and skipped, since self-improvement must never sink a
/// completed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Hard,
    Soft,
}

/// One entry in the pipeline: a phase name bound to the slash command and
/// agent identity that executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpec {
    /// Phase name; members of `Phase::ORDER` plus optional soft extras.
    pub name: &'static str,
    /// Slash command sent to the agent transport. The plan phase overrides
    /// this with the classified issue command (`/chore`, `/bug`, `/feature`).
    pub slash_command: &'static str,
    /// Agent identity used for transcript namespacing.
    pub agent_name: &'static str,
    pub criticality: Criticality,
}

impl PhaseSpec {
    pub fn is_hard(&self) -> bool {
        self.criticality == Criticality::Hard
    }
}

/// The default pipeline: the five ordered phases plus a trailing
/// best-effort improvement pass.
pub fn default_pipeline() -> Vec<PhaseSpec> {
    vec![
        PhaseSpec {
            name: "plan",
            slash_command: "/feature",
            agent_name: "sdlc_planner",
            criticality: Criticality::Hard,
        },
        PhaseSpec {
            name: "build",
            slash_command: "/implement",
            agent_name: "sdlc_implementor",
            criticality: Criticality::Hard,
        },
        PhaseSpec {
            name: "test",
            slash_command: "/test",
            agent_name: "sdlc_tester",
            criticality: Criticality::Hard,
        },
        PhaseSpec {
            name: "review",
            slash_command: "/review",
            agent_name: "sdlc_reviewer",
            criticality: Criticality::Hard,
        },
        PhaseSpec {
            name: "ship",
            slash_command: "/pull_request",
            agent_name: "pr_creator",
            criticality: Criticality::Hard,
        },
        PhaseSpec {
            name: "improve",
            slash_command: "/improve",
            agent_name: "sdlc_improver",
            criticality: Criticality::Soft,
        },
    ]
}

/// Look up a pipeline entry by phase name.
pub fn find_spec(name: &str) -> Option<PhaseSpec> {
    default_pipeline().into_iter().find(|s| s.name == name)
}
