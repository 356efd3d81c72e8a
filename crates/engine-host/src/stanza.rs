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

//! Builders for every outbound stanza the host produces, shaped exactly as
//! the chessd server expects them. The BOSH `<body>` envelope is not applied
//! here; the session layer wraps these at enqueue time.

/// The Jabber resource every engine player binds.
pub const RESOURCE: &str = "ChessD";

/// Query namespaces dispatched on inbound iqs.
pub mod ns {
    pub const AUTH: &str = "jabber:iq:auth";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

    pub const MATCH_OFFER: &str = "http://c3sl.ufpr.br/chessd#match#offer";
    pub const MATCH_ACCEPT: &str = "http://c3sl.ufpr.br/chessd#match#accept";
    pub const MATCH_DECLINE: &str = "http://c3sl.ufpr.br/chessd#match#decline";
    pub const GAME_STATE: &str = "http://c3sl.ufpr.br/chessd#game#state";
    pub const GAME_MOVE: &str = "http://c3sl.ufpr.br/chessd#game#move";
    pub const GAME_RESIGN: &str = "http://c3sl.ufpr.br/chessd#game#resign";
    pub const GAME_DRAW: &str = "http://c3sl.ufpr.br/chessd#game#draw";
    pub const GAME_CANCEL: &str = "http://c3sl.ufpr.br/chessd#game#cancel";
    pub const GAME_ADJOURN: &str = "http://c3sl.ufpr.br/chessd#game#adjourn";
    pub const GAME_END: &str = "http://c3sl.ufpr.br/chessd#game#end";
}

/// First authentication step: ask the server which auth fields it wants.
pub fn auth_step1(server: &str, user: &str) -> String {
    format!(
        "<iq type='get' id='auth_1' to='{server}'><query xmlns='jabber:iq:auth'>\
         <username>{user}</username></query></iq>"
    )
}

/// Second authentication step: username, password, and the fixed resource.
pub fn auth_step2(server: &str, user: &str, password: &str) -> String {
    format!(
        "<iq type='set' id='auth_2' to='{server}'><query xmlns='jabber:iq:auth'>\
         <username>{user}</username><password>{password}</password>\
         <resource>{RESOURCE}</resource></query></iq>"
    )
}

/// The three presences sent on becoming online: to everyone, to the general
/// chat room, and to the matches component (asking for multigame).
pub fn global_presence(jid: &str, server: &str, user: &str) -> String {
    format!(
        "<presence from='{jid}'/>\
         <presence to='general@conference.{server}/{user}'/>\
         <presence to='chessd.{server}'><config multigame='true'/></presence>"
    )
}

/// vCard update so the roster shows the bot under its own name.
pub fn update_profile(user: &str) -> String {
    format!(
        "<iq type='set'><vCard xmlns='vcard-temp' \
         prodid='-//HandGen//NONSGML vGen v1.0//EN' version='2.0'>\
         <FN>{user}</FN><DESC></DESC><PHOTO><TYPE></TYPE><BINVAL></BINVAL></PHOTO>\
         </vCard></iq>"
    )
}

/// Offer a blitz match between the two given players, player 1 as white.
pub fn offer_match(server: &str, p1_jid: &str, p2_jid: &str) -> String {
    format!(
        "<iq type='set' to='chessd.{server}' id='match'>\
         <query xmlns='{}'>\
         <match category='blitz'>\
         <player inc='0' color='white' time='180' jid='{p1_jid}'/>\
         <player inc='0' color='black' time='180' jid='{p2_jid}'/>\
         </match></query></iq>",
        ns::MATCH_OFFER
    )
}

pub fn accept_match(server: &str, match_id: u32) -> String {
    format!(
        "<iq type='set' to='chessd.{server}' id='match'>\
         <query xmlns='{}'><match id='{match_id}'/></query></iq>",
        ns::MATCH_ACCEPT
    )
}

pub fn join_game(room: &str, server: &str, user: &str) -> String {
    format!("<presence to='{room}@chessd.{server}/{user}'/>")
}

pub fn leave_game(room: &str, server: &str, user: &str) -> String {
    format!("<presence to='{room}@chessd.{server}/{user}' type='unavailable'/>")
}

pub fn game_move(room: &str, server: &str, long: &str) -> String {
    format!(
        "<iq type='set' to='{room}@chessd.{server}' id='match'>\
         <query xmlns='{}'><move long='{long}'/></query></iq>",
        ns::GAME_MOVE
    )
}

/// Agree to an end-of-game request (`draw`, `cancel`, `adjourn`).
pub fn endgame_accept(jid: &str, room: &str, server: &str, action: &str) -> String {
    format!(
        "<iq type='set' from='{jid}' to='{room}@chessd.{server}' id='{action}'>\
         <query xmlns='http://c3sl.ufpr.br/chessd#game#{action}'/></iq>"
    )
}

pub fn chat_message(from: &str, to: &str, body: &str) -> String {
    format!("<message from='{from}' to='{to}' type='chat'><body>{body}</body></message>")
}

/// Answer to a subscription request; note the swapped addressing.
pub fn subscribed(from: &str, to: &str) -> String {
    format!("<presence from='{from}' to='{to}' type='subscribed'><status/></presence>")
}
