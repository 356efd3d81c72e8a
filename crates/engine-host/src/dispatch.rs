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

//! Per-body stanza dispatch: each decoded BOSH response is one `<body>`
//! whose children are routed by tag, and iqs further by the namespace of
//! their `<query>` child. Parsing is lenient about unknown content but a
//! body that cannot be made sense of at all tears the session down; the
//! server is never second-guessed.

use chessd_cecp::{EngineCommand, EngineError, EngineHandle};
use chessd_common::chess::{Board, Color};
use chessd_common::jid;
use chessd_common::xml::Element;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bot::{Bot, BotError};
use crate::game::{GameRecord, MatchRecord, PlayerInfo};
use crate::stanza::{self, ns};

/// The canned answer to anyone who tries to chat with an engine.
const AUTO_REPLY: &str = "(auto-reply) Hi, I am a chess-playing robot. I cannot chat!";

/// Whether to keep routing the rest of this body's stanzas.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// A stanza whose required structure is missing. These follow the original
/// protocol's rule: don't guess, log and drop the session.
#[derive(Debug, Error)]
enum StanzaError {
    #[error("missing <{0}> element")]
    MissingElement(&'static str),
    #[error("missing or invalid '{0}' attribute")]
    MissingAttr(&'static str),
    #[error("unknown match id {0}")]
    UnknownMatch(u32),
    #[error("no game in room '{0}'")]
    UnknownGame(String),
    #[error("own color in room '{0}' never resolved")]
    UnresolvedColor(String),
    #[error("unknown game result '{0}'")]
    BadResult(String),
}

enum DispatchError {
    Stanza(StanzaError),
    /// Faults that kill the whole bot, not just the session.
    Fatal(BotError),
}

impl From<StanzaError> for DispatchError {
    fn from(e: StanzaError) -> Self {
        DispatchError::Stanza(e)
    }
}

impl From<EngineError> for DispatchError {
    fn from(e: EngineError) -> Self {
        DispatchError::Fatal(BotError::Engine(e))
    }
}

fn req_attr<'a>(el: &'a Element, name: &'static str) -> Result<&'a str, StanzaError> {
    el.attr(name).ok_or(StanzaError::MissingAttr(name))
}

fn num_attr<T: std::str::FromStr>(el: &Element, name: &'static str) -> Result<T, StanzaError> {
    req_attr(el, name)?
        .parse()
        .map_err(|_| StanzaError::MissingAttr(name))
}

fn req_descendant<'a>(el: &'a Element, name: &'static str) -> Result<&'a Element, StanzaError> {
    el.descendant(name).ok_or(StanzaError::MissingElement(name))
}

fn parse_player(el: &Element) -> Result<PlayerInfo, StanzaError> {
    Ok(PlayerInfo {
        jid: req_attr(el, "jid")?.to_string(),
        time_secs: num_attr(el, "time")?,
        inc_secs: num_attr(el, "inc")?,
        color: el.attr("color").and_then(Color::parse),
    })
}

fn parse_board(el: &Element) -> Result<Board, StanzaError> {
    let turn = req_attr(el, "turn")?;
    Ok(Board {
        state: el.attr("state").unwrap_or_default().to_string(),
        turn: Color::parse(turn).ok_or(StanzaError::MissingAttr("turn"))?,
        castle: el.attr("castle").unwrap_or_default().to_string(),
        enpassant: el.attr("enpassant").unwrap_or_default().to_string(),
        halfmoves: el.attr("halfmoves").unwrap_or_default().to_string(),
        fullmoves: el.attr("fullmoves").unwrap_or_default().to_string(),
    })
}

impl Bot {
    /// Route one decoded response body. Malformed XML and structurally
    /// broken stanzas force a disconnect; only engine-level faults bubble
    /// out as errors.
    pub(crate) async fn handle_payload(&mut self, raw: &[u8]) -> Result<(), BotError> {
        if raw.is_empty() {
            return Ok(());
        }
        let root = match Element::parse(raw) {
            Ok(root) => root,
            Err(e) => {
                warn!(user = %self.user, "received XMPP is not well-formed ({e}); \
                      the server may be down or unreachable");
                self.disconnect(false).await;
                return Ok(());
            }
        };

        // A bare <error> root is a BOSH-level failure, not a stanza batch.
        if root.name == "error" {
            if root.text() == "invalid sid" {
                info!(user = %self.user, "disconnected from BOSH server");
                self.disconnect(false).await;
            }
            return Ok(());
        }
        if root.name != "body" {
            warn!(user = %self.user, root = %root.name, "unexpected response root element");
            self.disconnect(false).await;
            return Ok(());
        }

        if let Some(sid) = root.attr("sid")
            && self.session.adopt_sid(sid)
        {
            info!(user = %self.user, sid, "acquired SID");
        }

        if root.attr("type") == Some("terminate") {
            let condition = root.attr("condition").unwrap_or("");
            info!(
                user = %self.user, condition,
                "disconnected from BOSH server (connection terminated)"
            );
            self.disconnect(false).await;
            return Ok(());
        }

        for child in root.children() {
            let flow = match child.name.as_str() {
                "message" => {
                    self.handle_message(child);
                    Flow::Continue
                }
                "presence" => {
                    self.handle_presence(child);
                    Flow::Continue
                }
                "iq" => self.handle_iq(child).await?,
                other => {
                    debug!(user = %self.user, tag = other, "ignoring unknown stanza");
                    Flow::Continue
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, message: &Element) {
        match message.attr("type") {
            Some("chat") => {
                let Some(from) = message.attr("from") else {
                    return;
                };
                self.session
                    .enqueue(&stanza::chat_message(&self.jid, from, AUTO_REPLY));
                let body = message.child("body").map(Element::text).unwrap_or_default();
                info!(user = %self.user, from, "message: '{body}'");
            }
            Some("groupchat") => {
                // Room chatter; nothing to say back.
                let from = message.attr("from").unwrap_or("");
                let body = message.child("body").map(Element::text).unwrap_or_default();
                debug!(user = %self.user, from, "groupchat: '{body}'");
            }
            _ => {}
        }
    }

    fn handle_presence(&mut self, presence: &Element) {
        let from = presence.attr("from").unwrap_or("");
        let to = presence.attr("to").unwrap_or("");
        let ptype = presence.attr("type").unwrap_or("");

        if ptype == "subscribe" {
            self.session.enqueue(&stanza::subscribed(to, from));
            info!(user = %self.user, from, "authorized contact");
        }

        if let Some(opponent) = &self.opponent
            && from == format!("general@conference.{}/{opponent}", self.server)
        {
            if ptype == "unavailable" {
                info!(user = %self.user, %opponent, "opponent is offline");
                self.opp_online = false;
            } else {
                info!(user = %self.user, %opponent, "opponent is online");
                self.opp_online = true;
            }
        }
    }

    async fn handle_iq(&mut self, iq: &Element) -> Result<Flow, BotError> {
        let from = iq.attr("from").unwrap_or("");
        let itype = iq.attr("type").unwrap_or("");
        let id = iq.attr("id").unwrap_or("");

        // The two authentication replies are recognized by id, not by query.
        if id == "auth_1" && itype == "result" && from == self.server {
            self.session
                .enqueue(&stanza::auth_step2(&self.server, &self.user, &self.password));
        } else if id == "auth_2" && itype == "result" && from == self.server {
            self.session.phase = chessd_bosh::Phase::Online;
            self.session
                .enqueue(&stanza::global_presence(&self.jid, &self.server, &self.user));
            self.session.enqueue(&stanza::update_profile(&self.user));
            info!(user = %self.user, "connected to server '{}'", self.server);
        }

        let Some(query) = iq.child("query") else {
            if iq.children().next().is_some() {
                debug!(user = %self.user, itype, "iq without query ignored");
            }
            return Ok(Flow::Continue);
        };
        let xmlns = query.ns().unwrap_or("");

        if itype == "error" {
            // The server is authoritative about moves and cancels; an error
            // there is not worth a reconnect.
            if xmlns == ns::GAME_MOVE || xmlns == ns::GAME_CANCEL {
                return Ok(Flow::Continue);
            }
            let room = jid::node(from);
            let code = iq
                .descendant("error")
                .and_then(|e| e.attr("code"))
                .unwrap_or("");
            warn!(user = %self.user, room, xmlns, code, "iq error; disconnecting");
            self.disconnect(true).await;
            return Ok(Flow::Stop);
        }

        let outcome = self.dispatch_query(query, xmlns, itype, from);
        match outcome {
            Ok(flow) => Ok(flow),
            Err(DispatchError::Stanza(e)) => {
                warn!(user = %self.user, xmlns, "unable to process XMPP stanza: {e}");
                self.disconnect(false).await;
                Ok(Flow::Stop)
            }
            Err(DispatchError::Fatal(e)) => Err(e),
        }
    }

    fn dispatch_query(
        &mut self,
        query: &Element,
        xmlns: &str,
        itype: &str,
        from: &str,
    ) -> Result<Flow, DispatchError> {
        match xmlns {
            ns::MATCH_OFFER if itype == "set" => self.on_match_offered(query)?,
            ns::MATCH_OFFER if itype == "result" => self.on_match_offer_confirmed(query)?,
            ns::MATCH_ACCEPT => self.on_match_accepted(query)?,
            ns::MATCH_DECLINE => self.on_match_declined(query)?,
            ns::GAME_STATE => self.on_game_state(query, from)?,
            ns::GAME_MOVE if itype == "set" => self.on_game_move(query, from)?,
            ns::GAME_RESIGN => {
                info!(user = %self.user, room = jid::node(from), "opponent has resigned");
            }
            ns::GAME_DRAW if itype == "set" => self.on_game_draw(from)?,
            ns::GAME_CANCEL | ns::GAME_ADJOURN if itype == "set" => {
                self.on_game_end_request(xmlns, from);
            }
            // Known game namespaces with unexpected types are not worth a
            // reconnect.
            ns::GAME_MOVE | ns::GAME_DRAW | ns::GAME_CANCEL | ns::GAME_ADJOURN => {}
            ns::GAME_END => self.on_game_end(query, from)?,
            ns::AUTH => self.on_auth_query(query),
            ns::ROSTER | ns::DISCO_INFO => {}
            _ => {
                warn!(user = %self.user, xmlns, itype, "unknown query xmlns");
            }
        }
        Ok(Flow::Continue)
    }

    /// Someone offered us a match; store it and accept unconditionally.
    fn on_match_offered(&mut self, query: &Element) -> Result<(), StanzaError> {
        let offer = req_descendant(query, "match")?;
        let match_id: u32 = num_attr(offer, "id")?;
        let category = offer.attr("category").unwrap_or_default().to_string();
        let players = offer.descendants("player");
        let [p1, p2, ..] = players.as_slice() else {
            return Err(StanzaError::MissingElement("player"));
        };
        let record = MatchRecord {
            category,
            p1: parse_player(p1)?,
            p2: parse_player(p2)?,
        };
        self.matches.insert(match_id, record);
        self.session
            .enqueue(&stanza::accept_match(&self.server, match_id));
        info!(user = %self.user, match_id, "accepting match");
        Ok(())
    }

    /// The server assigned an id to our own outstanding offer.
    fn on_match_offer_confirmed(&mut self, query: &Element) -> Result<(), StanzaError> {
        let confirmation = req_descendant(query, "match")?;
        let match_id: u32 = num_attr(confirmation, "id")?;
        if let Some(offer) = self.pending_offer.take() {
            self.matches.insert(match_id, offer);
        }
        Ok(())
    }

    /// A match became a game: move it to the game table, spawn its engine,
    /// and join the room.
    fn on_match_accepted(&mut self, query: &Element) -> Result<(), DispatchError> {
        let accepted = req_descendant(query, "match")?;
        let match_id: u32 = num_attr(accepted, "id")?;
        let room_jid = req_attr(accepted, "room")?;
        let room = jid::node(room_jid).to_string();

        let info = self
            .matches
            .remove(&match_id)
            .ok_or(StanzaError::UnknownMatch(match_id))?;
        let color = info.color_for(&self.jid);
        let opponent = info.opponent_of(&self.jid);
        info!(
            user = %self.user, %room,
            "starting game: {} ({}) vs {} ({})",
            self.user,
            color.as_ref().map(Color::as_str).unwrap_or("?"),
            jid::node(&opponent.jid),
            opponent.color.as_ref().map(Color::as_str).unwrap_or("?"),
        );

        let engine =
            EngineHandle::spawn(&self.engine_path, room.clone(), self.engine_tx.clone())?;
        self.games.insert(
            room.clone(),
            GameRecord {
                is_white: color.map(|c| c == Color::White),
                wait_first_board: true,
                engine,
                info,
            },
        );
        self.session
            .enqueue(&stanza::join_game(&room, &self.server, &self.user));
        Ok(())
    }

    fn on_match_declined(&mut self, query: &Element) -> Result<(), StanzaError> {
        let declined = req_descendant(query, "match")?;
        let match_id: u32 = num_attr(declined, "id")?;
        self.matches.remove(&match_id);
        info!(user = %self.user, match_id, "match declined");
        Ok(())
    }

    /// A board snapshot. The first one per game sets the engine playing:
    /// clocks, position if mid-game, and the color/turn setup sequence.
    fn on_game_state(&mut self, query: &Element, from: &str) -> Result<(), StanzaError> {
        let room = jid::node(from).to_string();
        let board = parse_board(req_descendant(query, "board")?)?;
        let jid = self.jid.clone();

        let game = self
            .games
            .get_mut(&room)
            .ok_or_else(|| StanzaError::UnknownGame(room.clone()))?;

        if game.is_white.is_none() {
            // The accept didn't name usable colors; the board's player list
            // does.
            let players = query.descendants("player");
            let [pa, pb, ..] = players.as_slice() else {
                return Err(StanzaError::MissingElement("player"));
            };
            let a_jid = req_attr(pa, "jid")?;
            let a_color = pa.attr("color");
            let b_color = pb.attr("color");
            let (c1, c2) = if game.info.p1.jid == a_jid {
                (a_color, b_color)
            } else {
                (b_color, a_color)
            };
            game.info.p1.color = c1.and_then(Color::parse);
            game.info.p2.color = c2.and_then(Color::parse);
            game.is_white = game.info.color_for(&jid).map(|c| c == Color::White);
        }

        if game.wait_first_board {
            game.wait_first_board = false;
            if game.info.category != "untimed" {
                let ours = game.info.our_player(&jid);
                game.engine.send(EngineCommand::SetTime {
                    time_secs: ours.time_secs,
                    inc_secs: ours.inc_secs,
                });
            }
            if !board.is_default_start() {
                game.engine.send(EngineCommand::SetBoard(board.clone()));
            }
            let is_white = game
                .is_white
                .ok_or_else(|| StanzaError::UnresolvedColor(room.clone()))?;
            game.engine.send(EngineCommand::Play {
                turn: board.turn,
                is_white,
            });
            info!(user = %self.user, %room, "received first board, game started");
        }
        Ok(())
    }

    /// The opponent moved; hand it to the engine if it is now our turn.
    fn on_game_move(&mut self, query: &Element, from: &str) -> Result<(), StanzaError> {
        let long = req_attr(req_descendant(query, "move")?, "long")?.to_string();
        let board = parse_board(req_descendant(query, "board")?)?;
        let room = jid::node(from).to_string();
        let game = self
            .games
            .get(&room)
            .ok_or_else(|| StanzaError::UnknownGame(room.clone()))?;
        let is_white = game
            .is_white
            .ok_or_else(|| StanzaError::UnresolvedColor(room.clone()))?;
        if (board.turn == Color::White) == is_white {
            game.engine.send(EngineCommand::OpponentMove(long.clone()));
            info!(
                user = %self.user, %room, fullmoves = %board.fullmoves,
                "received move '{long}'"
            );
        }
        Ok(())
    }

    /// A draw was requested. Ask the engine and decide in two seconds;
    /// silence counts as refusal, no stanza is sent for it.
    fn on_game_draw(&mut self, from: &str) -> Result<(), StanzaError> {
        let room = jid::node(from).to_string();
        let game = self
            .games
            .get(&room)
            .ok_or_else(|| StanzaError::UnknownGame(room.clone()))?;
        game.engine.send(EngineCommand::Line("draw\n".to_string()));
        self.schedule_draw_verification(room);
        Ok(())
    }

    /// Cancel and adjourn requests are always agreed to.
    fn on_game_end_request(&mut self, xmlns: &str, from: &str) {
        let action = xmlns.rsplit('#').next().unwrap_or("");
        let room = jid::node(from);
        self.session
            .enqueue(&stanza::endgame_accept(&self.jid, room, &self.server, action));
        info!(user = %self.user, room, "accepted '{action}' request");
    }

    /// The game is over: relay the result to the engine, stop it, drop the
    /// game, and leave the room.
    fn on_game_end(&mut self, query: &Element, from: &str) -> Result<(), StanzaError> {
        let room = jid::node(from).to_string();
        let end = req_descendant(query, "end")?;
        let end_type = end.attr("type").unwrap_or("");
        let end_result = end.attr("result").unwrap_or("");

        let game = self
            .games
            .remove(&room)
            .ok_or_else(|| StanzaError::UnknownGame(room.clone()))?;

        match end_type {
            "normal" => {
                let players = query.descendants("player");
                let [p1, p2, ..] = players.as_slice() else {
                    return Err(StanzaError::MissingElement("player"));
                };
                let p1_result = req_attr(p1, "result")?;
                let score = match p1_result {
                    "won" => "1-0",
                    "lost" => "0-1",
                    "draw" => "1/2-1/2",
                    other => return Err(StanzaError::BadResult(other.to_string())),
                };
                let p1_jid = req_attr(p1, "jid")?;
                let p2_jid = req_attr(p2, "jid")?;
                let (white, black) = if p1.attr("role") == Some("white") {
                    (jid::node(p1_jid), jid::node(p2_jid))
                } else {
                    (jid::node(p2_jid), jid::node(p1_jid))
                };
                game.engine
                    .send(EngineCommand::Line(format!("result {score} {{{end_result}}}\n")));
                info!(
                    user = %self.user, %room,
                    "game ended: {white} {score} {black}, reason: {end_result}"
                );
            }
            "adjourned" => info!(user = %self.user, %room, "game adjourned"),
            "canceled" => info!(user = %self.user, %room, "game canceled"),
            _ => debug!(user = %self.user, %room, end_type, "game ended"),
        }

        game.engine.stop();
        self.session
            .enqueue(&stanza::leave_game(&room, &self.server, &self.user));
        Ok(())
    }

    /// The server echoes the auth query back; a username that isn't ours
    /// means the handshake went to the wrong account.
    fn on_auth_query(&mut self, query: &Element) {
        if let Some(username) = query.child("username")
            && username.text() != self.user
        {
            error!(user = %self.user, echoed = username.text(), "authentication error");
        }
    }
}
