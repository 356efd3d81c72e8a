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

//! Line-level classification of engine output. CECP is loose: engines chat,
//! print banners and thinking lines; everything not recognized here is
//! ignored by the adapter.

/// One classified line of engine output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CecpLine {
    /// `move e2e4`, or GNU Chess's `My move is: e2e4`.
    Move(String),
    /// `pong <n>`; answers to pings, nothing to do.
    Pong,
    /// `offer draw`.
    OfferDraw,
    /// `feature k=v …` declarations.
    Features(Vec<(String, String)>),
    Other,
}

pub fn classify(line: &str) -> CecpLine {
    if let Some(rest) = line.strip_prefix("move ")
        && let Some(mv) = leading_word(rest)
    {
        return CecpLine::Move(mv.to_string());
    }
    if let Some(rest) = line.strip_prefix("My move is: ")
        && let Some(mv) = leading_word(rest)
    {
        return CecpLine::Move(mv.to_string());
    }
    if let Some(rest) = line.strip_prefix("pong ")
        && leading_word(rest).is_some()
    {
        return CecpLine::Pong;
    }
    if line.starts_with("offer draw") {
        return CecpLine::OfferDraw;
    }
    if line.strip_prefix("feature").is_some_and(|r| r.starts_with(char::is_whitespace)) {
        return CecpLine::Features(parse_features(line));
    }
    CecpLine::Other
}

/// The leading run of word characters, if non-empty.
fn leading_word(s: &str) -> Option<&str> {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 { None } else { Some(&s[..end]) }
}

/// Tokenize a `feature` line into `(key, value)` pairs. Values are either a
/// bare token or a `"`-quoted string that may contain spaces.
pub fn parse_features(line: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = line.strip_prefix("feature").unwrap_or(line).trim_start();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(char::is_whitespace) {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };
        if !key.is_empty() {
            out.push((key.to_string(), value.to_string()));
        }
        rest = remainder.trim_start();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn move_lines() {
        assert_eq!(classify("move e2e4"), CecpLine::Move("e2e4".to_string()));
        assert_eq!(
            classify("My move is: c7c5"),
            CecpLine::Move("c7c5".to_string())
        );
        // Promotion suffixes are word characters and come along.
        assert_eq!(classify("move e7e8q"), CecpLine::Move("e7e8q".to_string()));
        assert_eq!(classify("moved on"), CecpLine::Other);
        assert_eq!(classify("move "), CecpLine::Other);
    }

    #[test]
    fn pong_and_draw_lines() {
        assert_eq!(classify("pong 3"), CecpLine::Pong);
        assert_eq!(classify("pong x"), CecpLine::Other);
        assert_eq!(classify("offer draw"), CecpLine::OfferDraw);
    }

    #[test]
    fn chatter_is_other() {
        assert_eq!(classify(""), CecpLine::Other);
        assert_eq!(classify("GNU Chess 5.07"), CecpLine::Other);
        assert_eq!(classify("12 156 1100 87654 e2e4"), CecpLine::Other);
        assert_eq!(classify("featureless"), CecpLine::Other);
    }

    #[test]
    fn feature_pairs() {
        let CecpLine::Features(fs) = classify("feature ping=1 setboard=1 usermove=1 done=1")
        else {
            panic!("not a feature line");
        };
        assert_eq!(
            fs,
            vec![
                ("ping".to_string(), "1".to_string()),
                ("setboard".to_string(), "1".to_string()),
                ("usermove".to_string(), "1".to_string()),
                ("done".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn quoted_feature_values_keep_spaces() {
        let fs = parse_features("feature myname=\"GNU Chess 5.07\" colors=0 done=1");
        assert_eq!(
            fs,
            vec![
                ("myname".to_string(), "GNU Chess 5.07".to_string()),
                ("colors".to_string(), "0".to_string()),
                ("done".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_quote_takes_the_rest() {
        let fs = parse_features("feature myname=\"Broken Engine");
        assert_eq!(
            fs,
            vec![("myname".to_string(), "Broken Engine".to_string())]
        );
    }
}
