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

//! A whole bot against a scripted BOSH server on a real socket: session
//! request, authentication, the global presence burst, and an inbound match
//! offer.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chessd_engine_host::bot::Bot;
use chessd_engine_host::config::BotConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";

#[derive(Default)]
struct ServerState {
    /// All request bodies, in arrival order.
    bodies: Vec<String>,
    /// When set, the next free poll is answered with a match offer.
    offer_armed: bool,
    offer_sent: bool,
    open_conns: usize,
    max_conns: usize,
}

type Shared = Arc<Mutex<ServerState>>;

fn respond(body: &str, state: &mut ServerState) -> String {
    if body.contains("hold='1'") {
        return format!("<body sid='S1' xmlns='{HTTPBIND}'/>");
    }
    if body.contains("id='auth_1'") {
        return format!("<body xmlns='{HTTPBIND}'><iq id='auth_1' type='result' from='127.0.0.1'/></body>");
    }
    if body.contains("id='auth_2'") {
        return format!("<body xmlns='{HTTPBIND}'><iq id='auth_2' type='result' from='127.0.0.1'/></body>");
    }
    if state.offer_armed && !state.offer_sent {
        state.offer_sent = true;
        return format!(
            "<body xmlns='{HTTPBIND}'><iq type='set' from='chessd.127.0.0.1'>\
             <query xmlns='http://c3sl.ufpr.br/chessd#match#offer'>\
             <match id='7' category='blitz'>\
             <player jid='rival@127.0.0.1/ChessD' color='white' time='180' inc='0'/>\
             <player jid='self@127.0.0.1/ChessD' color='black' time='180' inc='0'/>\
             </match></query></iq></body>"
        );
    }
    format!("<body xmlns='{HTTPBIND}'/>")
}

async fn serve_connection(mut stream: TcpStream, state: Shared) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // Accumulate one full request: headers, then Content-Length bytes.
        let (body, consumed) = loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let header = String::from_utf8_lossy(&buf[..end]).to_string();
                let content_len: usize = header
                    .split("\r\n")
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse().ok())?
                    })
                    .expect("request without Content-Length");
                if buf.len() >= end + 4 + content_len {
                    let body =
                        String::from_utf8_lossy(&buf[end + 4..end + 4 + content_len]).to_string();
                    break (body, end + 4 + content_len);
                }
            }
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => {
                    let mut state = state.lock().unwrap();
                    state.open_conns -= 1;
                    return;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        buf.drain(..consumed);

        let reply = {
            let mut state = state.lock().unwrap();
            state.bodies.push(body.clone());
            respond(&body, &mut state)
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
            reply.len(),
            reply
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            let mut state = state.lock().unwrap();
            state.open_conns -= 1;
            return;
        }
    }
}

async fn start_server() -> (u16, Shared) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state: Shared = Arc::new(Mutex::new(ServerState::default()));
    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            {
                let mut state = accept_state.lock().unwrap();
                state.open_conns += 1;
                state.max_conns = state.max_conns.max(state.open_conns);
            }
            tokio::spawn(serve_connection(stream, accept_state.clone()));
        }
    });
    (port, state)
}

async fn wait_for_body(state: &Shared, needle: &str) -> usize {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        {
            let state = state.lock().unwrap();
            if let Some(idx) = state.bodies.iter().position(|b| b.contains(needle)) {
                return idx;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for a body containing {needle:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn rid_of(body: &str) -> Option<u64> {
    let start = body.find("rid='")? + 5;
    let end = start + body[start..].find('\'')?;
    body[start..end].parse().ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_offer_and_clean_shutdown() {
    let (port, state) = start_server().await;
    let kill_switch = Arc::new(AtomicBool::new(false));

    let config = BotConfig {
        username: "self".to_string(),
        password: "pw".to_string(),
        engine_path: "/bin/cat".to_string(),
        opponent: None,
    };
    let bot = Bot::new(config, "127.0.0.1".to_string(), port, kill_switch.clone());
    let bot_task = tokio::spawn(bot.run());

    // S1: session request, two auth steps, presences, vCard.
    let sid_req = wait_for_body(&state, "hold='1'").await;
    let auth1 = wait_for_body(&state, "id='auth_1'").await;
    let auth2 = wait_for_body(&state, "id='auth_2'").await;
    let presences = wait_for_body(&state, "general@conference.127.0.0.1/self").await;
    let vcard = wait_for_body(&state, "vcard-temp").await;
    assert!(sid_req < auth1, "auth started before the session request");
    assert!(auth1 < auth2);
    assert!(auth2 < presences);

    {
        let state = state.lock().unwrap();
        // The session request carries no sid; everything after does.
        assert!(!state.bodies[sid_req].contains("sid="));
        for body in &state.bodies[auth1..] {
            assert!(body.contains("sid='S1'"), "unwrapped body: {body}");
        }
        // rids are assigned at enqueue time: presences before the vCard.
        let presence_rid = rid_of(&state.bodies[presences]).unwrap();
        let vcard_rid = rid_of(&state.bodies[vcard]).unwrap();
        assert!(presence_rid < vcard_rid);

        // Every rid in the session is distinct and they form one dense run.
        let mut rids: Vec<u64> = state.bodies.iter().filter_map(|b| rid_of(b)).collect();
        rids.sort_unstable();
        for pair in rids.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "rid sequence has gaps or repeats");
        }
    }

    // S2: the server pushes a match offer down a free poll; the bot accepts.
    state.lock().unwrap().offer_armed = true;
    let accept = wait_for_body(&state, "chessd#match#accept").await;
    {
        let state = state.lock().unwrap();
        assert!(state.bodies[accept].contains("<match id='7'/>"));
    }

    // Clean shutdown: leave-room presence is not expected (no game started),
    // but the terminate body is.
    kill_switch.store(true, std::sync::atomic::Ordering::SeqCst);
    let joined = tokio::time::timeout(Duration::from_secs(15), bot_task)
        .await
        .expect("bot did not stop after the kill switch");
    assert!(joined.unwrap().is_ok());
    wait_for_body(&state, "type='terminate'").await;

    let state = state.lock().unwrap();
    assert!(
        state.max_conns <= 2,
        "pool grew past two sockets: {}",
        state.max_conns
    );
}
