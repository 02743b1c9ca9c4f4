// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Recursive-descent parser for the serial command grammar.
//!
//! ```text
//! command := "on"  WS uint8 WS uint8
//!          | "of"  WS uint8 WS uint8
//!          | "cy"  WS uint8 WS uint8
//!          | "quit"
//!          | ""
//! uint8   := ASCII digits, value <= 256
//! ```
//!
//! A segment is whatever the caller already framed on `\r`; the terminator
//! itself is never part of the input handed to [`parse`].

use crate::error::GatewayError;

/// Command verb. `Of` (not `Off`) and the quirky `<= 256` bound on ids are
/// preserved from the legacy wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    On,
    Of,
    Cy,
    Quit,
    Empty,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::On => "on",
            Verb::Of => "of",
            Verb::Cy => "cy",
            Verb::Quit => "quit",
            Verb::Empty => "",
        }
    }
}

/// A fully parsed command. `device_id`/`outlet_id` are only present for
/// `on`/`of`/`cy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub device_id: Option<u16>,
    pub outlet_id: Option<u16>,
}

impl Command {
    fn ids(verb: Verb, device_id: u16, outlet_id: u16) -> Self {
        Command {
            verb,
            device_id: Some(device_id),
            outlet_id: Some(outlet_id),
        }
    }

    fn bare(verb: Verb) -> Self {
        Command {
            verb,
            device_id: None,
            outlet_id: None,
        }
    }
}

const UINT8_MAX: u32 = 256;

/// Cursor-based recursive-descent engine with one-character lookahead.
///
/// `keyword` and `search_uint8` never advance the cursor on failure; callers
/// that try several alternatives in sequence therefore resume from the same
/// starting position, and the parser tracks the furthest position any
/// attempt reached so the reported error points at the most informative
/// failure.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    furthest: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor {
            bytes: s.as_bytes(),
            pos: 0,
            furthest: 0,
        }
    }

    fn mark_furthest(&mut self, at: usize) {
        if at > self.furthest {
            self.furthest = at;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) -> usize {
        let mut n = 0;
        while self.peek() == Some(b' ') {
            self.pos += 1;
            n += 1;
        }
        n
    }

    /// Consumes one or more spaces. Fails (without advancing) if none are
    /// present.
    fn whitespace(&mut self) -> Result<(), ()> {
        let start = self.pos;
        if self.skip_spaces() == 0 {
            self.mark_furthest(start);
            return Err(());
        }
        Ok(())
    }

    /// Longest unambiguous literal match among `alternatives` at the
    /// cursor. Leaves the cursor untouched on failure.
    fn keyword(&mut self, alternatives: &[&str]) -> Option<&'static str> {
        let start = self.pos;
        let mut best: Option<&'static str> = None;
        for alt in alternatives {
            if self.bytes[start..].starts_with(alt.as_bytes())
                && alt.len() > best.map(str::len).unwrap_or(0)
            {
                best = Some(match *alt {
                    "on" => "on",
                    "of" => "of",
                    "cy" => "cy",
                    "quit" => "quit",
                    _ => unreachable!("unregistered keyword alternative"),
                });
            }
        }
        match best {
            Some(kw) => {
                self.pos += kw.len();
                Some(kw)
            },
            None => {
                self.mark_furthest(start);
                None
            },
        }
    }

    /// Skips leading spaces, then consumes a maximal digit run and parses it
    /// as a `uint8` bounded by `<= 256`. Fails without advancing past the
    /// leading spaces already skipped if there are zero digits or the value
    /// is out of range.
    fn search_uint8(&mut self) -> Result<u16, ()> {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            self.mark_furthest(start);
            return Err(());
        }
        // SAFETY-free: the slice is guaranteed ASCII digits by the loop above.
        let digits = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        let value: u32 = match digits.parse() {
            Ok(v) => v,
            Err(_) => {
                self.mark_furthest(self.pos);
                return Err(());
            },
        };
        if value > UINT8_MAX {
            self.mark_furthest(self.pos);
            return Err(());
        }
        Ok(value as u16)
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Parses one already-framed segment into a [`Command`].
pub fn parse(segment: &str) -> Result<Command, GatewayError> {
    if segment.is_empty() {
        return Ok(Command::bare(Verb::Empty));
    }

    let mut cur = Cursor::new(segment);

    if let Some(cmd) = try_verb_with_ids(&mut cur, "on", Verb::On)
        .or_else(|| {
            cur.pos = 0;
            try_verb_with_ids(&mut cur, "of", Verb::Of)
        })
        .or_else(|| {
            cur.pos = 0;
            try_verb_with_ids(&mut cur, "cy", Verb::Cy)
        })
    {
        return Ok(cmd);
    }

    cur.pos = 0;
    if cur.keyword(&["quit"]).is_some() && cur.at_end() {
        return Ok(Command::bare(Verb::Quit));
    }

    Err(GatewayError::Parse {
        position: cur.furthest,
        reason: format!("unrecognized command {segment:?}"),
    })
}

fn try_verb_with_ids(cur: &mut Cursor<'_>, kw: &str, verb: Verb) -> Option<Command> {
    cur.keyword(&[kw])?;
    cur.whitespace().ok()?;
    let device_id = cur.search_uint8().ok()?;
    cur.whitespace().ok()?;
    let outlet_id = cur.search_uint8().ok()?;
    if !cur.at_end() {
        cur.mark_furthest(cur.pos);
        return None;
    }
    Some(Command::ids(verb, device_id, outlet_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(device_id: u16, outlet_id: u16) -> (Option<u16>, Option<u16>) {
        (Some(device_id), Some(outlet_id))
    }

    #[test]
    fn parses_on() {
        let c = parse("on 1 1").unwrap();
        assert_eq!(c.verb, Verb::On);
        assert_eq!((c.device_id, c.outlet_id), ids(1, 1));
    }

    #[test]
    fn parses_of() {
        let c = parse("of 1 1").unwrap();
        assert_eq!(c.verb, Verb::Of);
        assert_eq!((c.device_id, c.outlet_id), ids(1, 1));
    }

    #[test]
    fn parses_cy() {
        let c = parse("cy 1 1").unwrap();
        assert_eq!(c.verb, Verb::Cy);
        assert_eq!((c.device_id, c.outlet_id), ids(1, 1));
    }

    #[test]
    fn parses_quit() {
        let c = parse("quit").unwrap();
        assert_eq!(c.verb, Verb::Quit);
        assert_eq!(c.device_id, None);
    }

    #[test]
    fn parses_empty() {
        let c = parse("").unwrap();
        assert_eq!(c.verb, Verb::Empty);
    }

    #[test]
    fn accepts_upper_bound_256() {
        let c = parse("on 256 1").unwrap();
        assert_eq!(c.device_id, Some(256));
    }

    #[test]
    fn rejects_257() {
        assert!(parse("on 257 1").is_err());
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse("shutdown 1 1").is_err());
    }

    #[test]
    fn rejects_missing_whitespace() {
        assert!(parse("on11").is_err());
    }

    #[test]
    fn rejects_negative() {
        assert!(parse("on -1 1").is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("on 1 1 x").is_err());
    }
}
