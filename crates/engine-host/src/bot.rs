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

//! One bot: a single event loop multiplexing its BOSH sockets, its engines'
//! move channel, and its timer events. The loop owns all of the bot's state;
//! nothing here is shared with other tasks except through channels and the
//! engines' atomics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chessd_bosh::{BoshSession, HttpPool, Phase};
use chessd_cecp::{EngineError, EngineEvent, EngineEventKind};
use chessd_common::chess::Color;
use rand::Rng;
use thiserror::Error;
use tokio::select;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::game::{GameRecord, MatchRecord, PlayerInfo};
use crate::stanza;

/// Cap on one select pass, so the inactivity timer always gets a look-in.
const POLL_WAIT: Duration = Duration::from_secs(10);
/// A server silent this long gets a full disconnect and re-handshake.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace before the inactivity clock means anything at startup.
const STARTUP_GRACE: Duration = Duration::from_secs(120);
/// How long the engine gets to answer a draw request before silence counts
/// as a refusal.
pub(crate) const DRAW_VERIFY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BotError {
    #[error("could not start chess engine: {0}")]
    Engine(#[from] EngineError),
    #[error("engine for game '{0}' cannot load positions (setboard unsupported)")]
    SetboardUnsupported(String),
}

/// Timer expiries posted back into the owning bot's loop.
pub(crate) enum BotEvent {
    SidRetryElapsed,
    VerifyDraw(String),
}

pub struct Bot {
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) engine_path: String,
    pub(crate) opponent: Option<String>,
    pub(crate) server: String,
    pub(crate) jid: String,

    pub(crate) session: BoshSession,
    pub(crate) pool: HttpPool,

    pub(crate) matches: HashMap<u32, MatchRecord>,
    pub(crate) games: HashMap<String, GameRecord>,
    pub(crate) pending_offer: Option<MatchRecord>,
    pub(crate) opp_online: bool,

    kill_switch: Arc<AtomicBool>,
    pub(crate) events_tx: flume::Sender<BotEvent>,
    events_rx: flume::Receiver<BotEvent>,
    pub(crate) engine_tx: flume::Sender<EngineEvent>,
    engine_rx: flume::Receiver<EngineEvent>,
}

impl Bot {
    pub fn new(config: BotConfig, server: String, port: u16, kill_switch: Arc<AtomicBool>) -> Bot {
        let (events_tx, events_rx) = flume::unbounded();
        let (engine_tx, engine_rx) = flume::unbounded();
        let jid = format!("{}@{}/{}", config.username, server, stanza::RESOURCE);
        Bot {
            user: config.username,
            password: config.password,
            engine_path: config.engine_path,
            opponent: config.opponent,
            jid,
            session: BoshSession::new(server.clone()),
            pool: HttpPool::new(server.clone(), port),
            server,
            matches: HashMap::new(),
            games: HashMap::new(),
            pending_offer: None,
            opp_online: false,
            kill_switch,
            events_tx,
            events_rx,
            engine_tx,
            engine_rx,
        }
    }

    pub(crate) fn online(&self) -> bool {
        self.session.phase == Phase::Online
    }

    /// The bot's event loop. Returns `Ok` on an orderly stop and `Err` only
    /// for faults that are fatal to this bot (engine spawn failure,
    /// `setboard=0`); the rest of the process keeps running either way.
    pub async fn run(mut self) -> Result<(), BotError> {
        let mut last_received = Instant::now() + STARTUP_GRACE;
        loop {
            if self.kill_switch.load(Ordering::Relaxed) {
                self.disconnect(true).await;
                return Ok(());
            }

            if self.session.sid().is_none() {
                if !self.session.sid_pending() {
                    self.ask_sid();
                }
            } else if !matches!(
                self.session.phase,
                Phase::Authenticating | Phase::Online | Phase::Terminating
            ) {
                self.begin_authentication();
            }

            // Keep a request parked on the server whenever nothing else is
            // in flight, so it always has a channel to push stanzas down.
            if self.session.queue_is_empty() && self.pool.all_idle() {
                self.session.enqueue("");
            }
            self.pump().await;

            select! {
                payloads = self.pool.recv(), if self.pool.has_conns() => {
                    last_received = Instant::now();
                    for payload in payloads {
                        self.handle_payload(&payload).await?;
                    }
                }
                event = self.engine_rx.recv_async() => {
                    if let Ok(event) = event {
                        self.handle_engine_event(event).await?;
                    }
                }
                event = self.events_rx.recv_async() => {
                    if let Ok(event) = event {
                        self.handle_bot_event(event);
                    }
                }
                _ = tokio::time::sleep(POLL_WAIT) => {}
            }

            // Drain whatever else piled up before deciding on keep-alives.
            while let Ok(event) = self.engine_rx.try_recv() {
                self.handle_engine_event(event).await?;
            }
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_bot_event(event);
            }

            self.challenge();

            if (self.session.sid().is_some() || self.online())
                && Instant::now().saturating_duration_since(last_received) >= INACTIVITY_TIMEOUT
            {
                info!(user = %self.user, "closing connection due to inactivity");
                self.disconnect(false).await;
            }
        }
    }

    /// Enqueue a session request and arm its retry timer.
    fn ask_sid(&mut self) {
        let delay = self.session.ask_sid();
        info!(user = %self.user, "asking a SID from the BOSH server");
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(BotEvent::SidRetryElapsed);
        });
    }

    pub(crate) fn begin_authentication(&mut self) {
        self.session
            .enqueue(&stanza::auth_step1(&self.server, &self.user));
        self.session.phase = Phase::Authenticating;
    }

    /// Push queued bodies out; a transport fault tears the session down and
    /// the next loop pass starts over.
    pub(crate) async fn pump(&mut self) {
        if let Err(e) = self.session.pump(&mut self.pool).await {
            warn!(user = %self.user, "server '{}' is not responding: {e}", self.server);
            self.disconnect(false).await;
        }
    }

    fn handle_bot_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::SidRetryElapsed => self.session.retry_elapsed(),
            BotEvent::VerifyDraw(room) => self.verify_draw(&room),
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), BotError> {
        match event.kind {
            EngineEventKind::Move(long) => {
                if self.online() && self.games.contains_key(&event.tag) {
                    self.session
                        .enqueue(&stanza::game_move(&event.tag, &self.server, &long));
                    self.pump().await;
                    info!(user = %self.user, room = %event.tag, "sending move '{long}'");
                }
                Ok(())
            }
            EngineEventKind::SetboardUnsupported => {
                error!(user = %self.user, room = %event.tag, "engine cannot be used for play");
                self.disconnect(true).await;
                Err(BotError::SetboardUnsupported(event.tag))
            }
        }
    }

    /// The engine was told `draw` two seconds ago; agree if it has offered a
    /// draw of its own by now, otherwise let silence stand as the refusal.
    pub(crate) fn verify_draw(&mut self, room: &str) {
        let accepted = self
            .games
            .get(room)
            .map(|g| g.engine.accepted_draw())
            .unwrap_or(false);
        if accepted {
            self.session
                .enqueue(&stanza::endgame_accept(&self.jid, room, &self.server, "draw"));
            info!(user = %self.user, room, "accepted 'draw' request");
        } else {
            info!(user = %self.user, room, "rejected 'draw' request");
        }
    }

    /// With an opponent configured and nothing going on, offer them a blitz
    /// match, shuffling who sits white.
    fn challenge(&mut self) {
        let Some(opponent) = &self.opponent else {
            return;
        };
        if !self.matches.is_empty()
            || !self.games.is_empty()
            || self.pending_offer.is_some()
            || !self.online()
            || !self.opp_online
        {
            return;
        }
        let opp_jid = format!("{opponent}@{}/{}", self.server, stanza::RESOURCE);
        let (p1_jid, p2_jid) = if rand::rng().random_bool(0.5) {
            (self.jid.clone(), opp_jid)
        } else {
            (opp_jid, self.jid.clone())
        };
        self.session
            .enqueue(&stanza::offer_match(&self.server, &p1_jid, &p2_jid));
        self.pending_offer = Some(MatchRecord {
            category: "blitz".to_string(),
            p1: PlayerInfo {
                jid: p1_jid.clone(),
                time_secs: 180,
                inc_secs: 0,
                color: Some(Color::White),
            },
            p2: PlayerInfo {
                jid: p2_jid.clone(),
                time_secs: 180,
                inc_secs: 0,
                color: Some(Color::Black),
            },
        });
        info!(user = %self.user, "offering match {p1_jid} vs {p2_jid}");
    }

    /// Tear the session down. `clean` additionally says goodbye: leave-room
    /// presences for open games and the BOSH terminate body, pushed out
    /// best-effort before the sockets close.
    pub(crate) async fn disconnect(&mut self, clean: bool) {
        if self.session.sid().is_none() && !self.online() {
            return;
        }
        for (room, game) in std::mem::take(&mut self.games) {
            if clean {
                self.session
                    .enqueue(&stanza::leave_game(&room, &self.server, &self.user));
            }
            game.engine.stop();
        }
        self.matches.clear();
        self.pending_offer = None;
        if clean {
            self.session.enqueue_terminate();
            let _ = self.session.pump(&mut self.pool).await;
        }
        self.session.reset();
        self.opp_online = false;
        self.pool.close_all();
        info!(user = %self.user, "disconnected from server '{}'", self.server);
    }

    /// Arm the timer that decides a pending draw request two seconds on.
    pub(crate) fn schedule_draw_verification(&self, room: String) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DRAW_VERIFY_DELAY).await;
            let _ = events.send(BotEvent::VerifyDraw(room));
        });
    }
}
