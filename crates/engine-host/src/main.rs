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

//! Process entry: load the configuration document, start one event-loop task
//! per configured bot, and run until a signal flips the kill switch.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::bail;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

use chessd_engine_host::bot::Bot;
use chessd_engine_host::config::Config;

#[derive(Parser, Debug)]
#[command(
    about = "Connects and manages interaction between chess engines and a chessd server."
)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "address",
        help = "Chess server address, overriding the configuration document"
    )]
    server: Option<String>,

    #[arg(
        short,
        long,
        value_name = "port",
        help = "Chess server port, overriding the configuration document"
    )]
    port: Option<u16>,

    #[arg(
        short,
        long,
        value_name = "log-file",
        help = "Log file path",
        value_hint = ValueHint::FilePath
    )]
    log: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "config-file",
        help = "Path to the bots configuration document",
        value_hint = ValueHint::FilePath,
        default_value = "config.xml"
    )]
    config: PathBuf,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let args: Args = match Args::try_parse() {
        Ok(args) => args,
        // The usage screen exits 1, never 0.
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            e.print()?;
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    let config = Config::load(&args.config, args.server, args.port, args.log)?;
    chessd_common::tracing::init_tracing(args.debug, config.log_file.as_deref())?;

    if config.bots.is_empty() {
        bail!("there are no bots to start; check the configuration file");
    }
    info!("bots started");

    let kill_switch = Arc::new(AtomicBool::new(false));

    let mut bot_tasks = Vec::new();
    for (i, bot_config) in config.bots.iter().cloned().enumerate() {
        let user = bot_config.username.clone();
        let bot = Bot::new(
            bot_config,
            config.server.clone(),
            config.port,
            kill_switch.clone(),
        );
        // Stagger the logins so the server isn't hit by every bot at once.
        let stagger = Duration::from_millis(250 * i as u64);
        bot_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(stagger).await;
            if let Err(e) = bot.run().await {
                error!(user = %user, "bot stopped: {e}");
            }
        }));
    }

    let mut hup_signal =
        signal(SignalKind::hangup()).expect("Unable to register HUP signal handler");
    let mut stop_signal =
        signal(SignalKind::interrupt()).expect("Unable to register STOP signal handler");
    let mut term_signal =
        signal(SignalKind::terminate()).expect("Unable to register TERM signal handler");
    select! {
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
        },
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
        },
        _ = term_signal.recv() => {
            info!("TERM received, stopping...");
        }
    }
    kill_switch.store(true, std::sync::atomic::Ordering::SeqCst);

    for task in bot_tasks {
        let _ = task.await;
    }
    info!("Done.");

    Ok(())
}
