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

//! Test support: an engine handle wired to bare channels instead of a child
//! process, so controller logic can be exercised without spawning anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{EngineCommand, EngineHandle};

pub struct DetachedEngine {
    pub handle: EngineHandle,
    /// Everything the controller sent to the "engine".
    pub commands: flume::Receiver<EngineCommand>,
    accepted_draw: Arc<AtomicBool>,
}

impl DetachedEngine {
    /// Pretend the engine printed `offer draw`.
    pub fn offer_draw(&self) {
        self.accepted_draw.store(true, Ordering::Relaxed);
    }
}

pub fn detached_engine() -> DetachedEngine {
    let (cmd_tx, commands) = flume::unbounded();
    let accepted_draw = Arc::new(AtomicBool::new(false));
    DetachedEngine {
        handle: EngineHandle::detached(cmd_tx, accepted_draw.clone()),
        commands,
        accepted_draw,
    }
}
