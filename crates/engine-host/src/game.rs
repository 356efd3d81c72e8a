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

//! Match and game table records. A match offer lives in the match table
//! until the server resolves it; accepting moves it into the game table
//! under the room short-name, with an engine attached.

use chessd_cecp::EngineHandle;
use chessd_common::chess::Color;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerInfo {
    pub jid: String,
    pub time_secs: u64,
    pub inc_secs: u64,
    pub color: Option<Color>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRecord {
    pub category: String,
    pub p1: PlayerInfo,
    pub p2: PlayerInfo,
}

impl MatchRecord {
    /// The entry for the given jid; an unmatched jid falls back to player 2,
    /// which keeps a mangled server player list from crashing the game.
    pub fn our_player(&self, jid: &str) -> &PlayerInfo {
        if self.p1.jid == jid { &self.p1 } else { &self.p2 }
    }

    pub fn opponent_of(&self, jid: &str) -> &PlayerInfo {
        if self.p1.jid == jid { &self.p2 } else { &self.p1 }
    }

    pub fn color_for(&self, jid: &str) -> Option<Color> {
        self.our_player(jid).color
    }
}

pub struct GameRecord {
    pub info: MatchRecord,
    /// Which side this bot plays; unresolved until the match accept or the
    /// first board names our color.
    pub is_white: Option<bool>,
    /// True until the first `game#state` board arrives and the engine is set
    /// playing.
    pub wait_first_board: bool,
    pub engine: EngineHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> MatchRecord {
        MatchRecord {
            category: "blitz".to_string(),
            p1: PlayerInfo {
                jid: "alice@srv/ChessD".to_string(),
                time_secs: 180,
                inc_secs: 0,
                color: Some(Color::White),
            },
            p2: PlayerInfo {
                jid: "bob@srv/ChessD".to_string(),
                time_secs: 180,
                inc_secs: 2,
                color: Some(Color::Black),
            },
        }
    }

    #[test]
    fn players_resolve_by_jid() {
        let m = record();
        assert_eq!(m.color_for("alice@srv/ChessD"), Some(Color::White));
        assert_eq!(m.color_for("bob@srv/ChessD"), Some(Color::Black));
        assert_eq!(m.our_player("bob@srv/ChessD").inc_secs, 2);
        assert_eq!(m.opponent_of("alice@srv/ChessD").jid, "bob@srv/ChessD");
        assert_eq!(m.opponent_of("bob@srv/ChessD").jid, "alice@srv/ChessD");
    }
}
