// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Adapter for chess engines speaking CECP (the xboard protocol) on their
//! standard streams. One adapter is spawned per active game; it owns the
//! child process, negotiates features, queues commands until the engine
//! declares `done=1`, and reports moves back over a typed channel.

use chessd_common::chess::{Board, Color};
use thiserror::Error;

mod engine;
mod parse;
pub mod testing;

pub use engine::EngineHandle;
pub use parse::{CecpLine, classify, parse_features};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("empty engine command line")]
    EmptyCommand,
    #[error("could not run chess engine at '{path}': {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },
    #[error("engine '{0}' did not expose stdio pipes")]
    MissingPipes(String),
}

/// A command for the engine, rendered to protocol text only when it is
/// drained to the child, so the rendering sees the negotiated features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCommand {
    /// An already-terminated CECP line, e.g. `draw\n` or `result 1-0 {mate}\n`.
    Line(String),
    /// A move made by the remote opponent, in long algebraic form.
    OpponentMove(String),
    /// Load a mid-game position before play starts.
    SetBoard(Board),
    /// Clock setup for a timed game, in whole seconds.
    SetTime { time_secs: u64, inc_secs: u64 },
    /// Point the engine at its side and set it thinking if it is on turn.
    Play { turn: Color, is_white: bool },
}

/// Something the engine did that its owning bot needs to hear about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineEvent {
    /// The tag given at spawn time; the controller uses the game room name.
    pub tag: String,
    pub kind: EngineEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEventKind {
    /// The engine produced a move (from `move …` or `My move is: …`).
    Move(String),
    /// The engine declared `setboard=0` and cannot be used.
    SetboardUnsupported,
}
