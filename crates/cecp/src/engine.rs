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

//! The engine adapter task: owns one child process per game, feeds it CECP
//! commands through a FIFO gated on `feature done=1`, and relays the moves it
//! prints back to the owning bot.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::select;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, trace};

use crate::{EngineCommand, EngineError, EngineEvent, EngineEventKind};
use crate::parse::{CecpLine, classify};

/// How long the adapter waits on engine output before giving queued commands
/// another chance to drain.
const DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Feature flags negotiated with the engine. `colors` starts true: the old
/// `white`/`black` commands are the protocol baseline, and `playother=1` is
/// how an engine opts out of them.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Features {
    pub usermove: bool,
    pub colors: bool,
    pub ping: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            usermove: false,
            colors: true,
            ping: false,
        }
    }
}

/// The bot-side handle to a running engine. Dropping the last handle closes
/// the command channel, which makes the adapter task kill and reap the child.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: flume::Sender<EngineCommand>,
    accepted_draw: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Spawn the configured engine command (split on whitespace) with piped
    /// stdio, start its adapter task, and kick off the CECP handshake.
    pub fn spawn(
        path: &str,
        tag: String,
        events: flume::Sender<EngineEvent>,
    ) -> Result<EngineHandle, EngineError> {
        let args: Vec<&str> = path.split_whitespace().collect();
        let Some((program, rest)) = args.split_first() else {
            return Err(EngineError::EmptyCommand);
        };
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: path.to_string(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::MissingPipes(path.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::MissingPipes(path.to_string()))?;

        info!(pid = child.id(), path, "chess engine started");

        let (cmd_tx, cmd_rx) = flume::unbounded();
        let accepted_draw = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let task = EngineTask {
            path: path.to_string(),
            tag,
            child,
            stdin,
            lines: FramedRead::new(stdout, LinesCodec::new()),
            cmd_rx,
            events,
            features: Features::default(),
            done_accepted: false,
            queue: VecDeque::new(),
            accepted_draw: accepted_draw.clone(),
            stop_flag: stop_flag.clone(),
        };
        tokio::spawn(task.run());

        Ok(EngineHandle {
            cmd_tx,
            accepted_draw,
            stop_flag,
        })
    }

    /// Queue a command for the engine. Sends into a dead adapter are dropped;
    /// the server will finish any game whose engine died.
    pub fn send(&self, cmd: EngineCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// Whether the engine has offered/agreed to a draw.
    pub fn accepted_draw(&self) -> bool {
        self.accepted_draw.load(Ordering::Relaxed)
    }

    /// Ask the adapter to kill and reap the child. Idempotent; the adapter
    /// notices within its drain wait.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub(crate) fn detached(
        cmd_tx: flume::Sender<EngineCommand>,
        accepted_draw: Arc<AtomicBool>,
    ) -> EngineHandle {
        EngineHandle {
            cmd_tx,
            accepted_draw,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct EngineTask {
    path: String,
    tag: String,
    child: Child,
    stdin: ChildStdin,
    lines: FramedRead<ChildStdout, LinesCodec>,
    cmd_rx: flume::Receiver<EngineCommand>,
    events: flume::Sender<EngineEvent>,
    features: Features,
    done_accepted: bool,
    queue: VecDeque<EngineCommand>,
    accepted_draw: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
}

impl EngineTask {
    async fn run(mut self) {
        if let Err(e) = self.stdin.write_all(b"xboard\nprotover 2\n").await {
            error!(pid = self.child.id(), "unable to greet engine: {e}");
            self.shutdown().await;
            return;
        }

        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            select! {
                line = self.lines.next() => match line {
                    Some(Ok(line)) => {
                        if !self.handle_line(&line) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(pid = self.child.id(), "error reading engine output: {e}");
                        break;
                    }
                    None => {
                        error!(pid = self.child.id(), "engine closed its output unexpectedly");
                        break;
                    }
                },
                cmd = self.cmd_rx.recv_async() => match cmd {
                    Ok(cmd) => self.queue.push_back(cmd),
                    // Handle dropped: the game is gone.
                    Err(_) => break,
                },
                _ = tokio::time::sleep(DRAIN_WAIT) => {}
            }
            if !self.drain().await {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Write queued commands to the child, oldest first, while the engine
    /// has declared `done=1`. Rendering happens here so it sees the feature
    /// flags as negotiated, not as they were at enqueue time.
    async fn drain(&mut self) -> bool {
        while self.done_accepted {
            let Some(cmd) = self.queue.pop_front() else {
                break;
            };
            let line = render_command(&cmd, &self.features);
            trace!(pid = self.child.id(), line = line.trim_end(), "-> engine");
            if let Err(e) = self.stdin.write_all(line.as_bytes()).await {
                error!(pid = self.child.id(), "unable to write to engine: {e}");
                return false;
            }
        }
        true
    }

    /// Returns false when the adapter must stop.
    fn handle_line(&mut self, line: &str) -> bool {
        match classify(line) {
            CecpLine::Move(mv) => {
                let _ = self.events.send(EngineEvent {
                    tag: self.tag.clone(),
                    kind: EngineEventKind::Move(mv),
                });
            }
            CecpLine::Pong => {}
            CecpLine::OfferDraw => {
                self.accepted_draw.store(true, Ordering::Relaxed);
            }
            CecpLine::Features(features) => return self.negotiate(features),
            CecpLine::Other => {
                trace!(pid = self.child.id(), line, "<- engine");
            }
        }
        true
    }

    fn negotiate(&mut self, features: Vec<(String, String)>) -> bool {
        for (key, value) in features {
            let enabled = value == "1";
            match key.as_str() {
                "done" => {
                    self.accept(&key);
                    self.done_accepted = enabled;
                }
                "usermove" => {
                    self.features.usermove = enabled;
                    self.accept(&key);
                }
                "playother" => {
                    // An engine that prefers `playother` gives up the old
                    // colors commands.
                    self.features.colors = !enabled;
                    self.accept(&key);
                }
                "colors" => {
                    self.features.colors = enabled;
                    self.accept(&key);
                }
                "ping" => {
                    self.features.ping = enabled;
                    self.accept(&key);
                }
                "setboard" => {
                    if !enabled {
                        error!(
                            path = %self.path,
                            "engine does not support the 'setboard' command"
                        );
                        let _ = self.events.send(EngineEvent {
                            tag: self.tag.clone(),
                            kind: EngineEventKind::SetboardUnsupported,
                        });
                        return false;
                    }
                    self.accept(&key);
                }
                _ => {}
            }
        }
        if self.done_accepted {
            debug!(
                pid = self.child.id(),
                usermove = self.features.usermove,
                colors = self.features.colors,
                ping = self.features.ping,
                "engine features negotiated"
            );
        }
        true
    }

    fn accept(&mut self, feature: &str) {
        self.queue
            .push_back(EngineCommand::Line(format!("accepted {feature}\n")));
    }

    async fn shutdown(mut self) {
        match self.child.kill().await {
            Ok(()) => info!(path = %self.path, "chess engine stopped"),
            Err(e) => debug!(path = %self.path, "engine already gone: {e}"),
        }
    }
}

/// Render one command to protocol text under the given feature flags.
fn render_command(cmd: &EngineCommand, features: &Features) -> String {
    match cmd {
        EngineCommand::Line(line) => line.clone(),
        EngineCommand::OpponentMove(mv) => {
            if features.usermove {
                format!("usermove {mv}\n")
            } else {
                format!("{mv}\n")
            }
        }
        EngineCommand::SetBoard(board) => format!(
            "setboard {} {} {} {} {} {}\n",
            board.state,
            board.turn.fen_char(),
            board.castle,
            board.enpassant,
            board.halfmoves,
            board.fullmoves
        ),
        EngineCommand::SetTime {
            time_secs,
            inc_secs,
        } => {
            let minutes = time_secs / 60;
            let seconds = time_secs % 60;
            if seconds != 0 {
                format!("level 0 {minutes}:{seconds} {inc_secs}\n")
            } else {
                format!("level 0 {minutes} {inc_secs}\n")
            }
        }
        EngineCommand::Play { turn, is_white } => {
            let mut out = String::from("force\nnew\nrandom\n");
            let on_turn = (*turn == chessd_common::chess::Color::White) == *is_white;
            if features.colors {
                // `white`/`black` name the side the engine is NOT playing.
                match (*is_white, on_turn) {
                    (true, true) => out.push_str("black\nwhite\ngo\n"),
                    (true, false) => out.push_str("black\n"),
                    (false, true) => out.push_str("white\nblack\ngo\n"),
                    (false, false) => out.push_str("white\n"),
                }
            } else if on_turn {
                out.push_str("go\n");
            } else {
                out.push_str("playother\n");
            }
            out
        }
    }
}
