// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use bitflags::bitflags;

use crate::backtrack;
use crate::boyer_moore::BoyerMoore;
use crate::captures::Match;
use crate::inst;
use crate::{Error, Options};

bitflags! {
    /// Anchors a scan-hint analyzer proved hold at the start of every
    /// match of a program.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Anchors: u32 {
        const BEGINNING = 1 << 0;
        const START = 1 << 1;
        const END_Z = 1 << 2;
        const END = 1 << 3;
    }
}

/// A literal every match must start with (end with, for a right-to-left
/// program).
#[derive(Clone, Debug)]
pub struct LiteralPrefix {
    pub text: String,
    pub case_insensitive: bool,
}

/// A class describing the characters a match can start with. When
/// `case_insensitive` is set the class is built over folded characters
/// and the scan folds the text side.
#[derive(Clone, Debug)]
pub struct FirstChars {
    pub set: Vec<i32>,
    pub case_insensitive: bool,
}

/// Scan hints from an external prefix/anchor analyzer. All fields are
/// optional and only ever speed a search up; an all-null `Hints` yields
/// identical match results.
#[derive(Clone, Debug, Default)]
pub struct Hints {
    pub prefix: Option<LiteralPrefix>,
    pub first_chars: Option<FirstChars>,
    pub anchors: Anchors,
}

/// A compiled program. Immutable once written, and shareable by
/// reference across any number of concurrent searches; all mutable
/// search state lives in the runner.
#[derive(Clone, Debug)]
pub struct Program {
    /// The instruction stream.
    pub codes: Vec<i32>,
    /// Pooled literals and class blobs, referenced by index from
    /// operands.
    pub strings: Vec<Vec<i32>>,
    /// Static bound on the backtrack frames any forward stretch of
    /// execution can push; runners pre-size their stacks from it.
    pub track_reserve: usize,
    /// Total number of capture slots, including slot 0.
    pub cap_count: usize,
    /// Source capture number to dense slot, present only when the
    /// source numbering has gaps.
    pub cap_map: Option<HashMap<i32, i32>>,
    /// Capture names by slot.
    pub cap_names: Vec<Option<String>>,
    /// Boyer-Moore machine for the literal prefix, if hinted.
    pub bm_prefix: Option<BoyerMoore>,
    /// Legal first characters, if hinted.
    pub fc_prefix: Option<FirstChars>,
    pub anchors: Anchors,
    pub right_to_left: bool,
    pub options: Options,
}

impl Program {
    /// The number of capture slots (including the whole-match slot).
    pub fn num_captures(&self) -> usize {
        self.cap_count
    }

    /// Resolves a capture name to its slot.
    pub fn slot_of_name(&self, name: &str) -> Option<usize> {
        self.cap_names
            .iter()
            .position(|n| n.as_deref() == Some(name))
    }

    /// Searches `text` for the first match at or after `start` (at or
    /// before, for a right-to-left program).
    pub fn find(
        &self,
        text: &[char],
        start: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Match>, Error> {
        self.find_within(text, 0, text.len(), start, timeout)
    }

    /// Like `find`, restricted to the window `[beg, end)` of `text`.
    pub fn find_within(
        &self,
        text: &[char],
        beg: usize,
        end: usize,
        start: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Match>, Error> {
        assert!(beg <= start && start <= end && end <= text.len());
        assert!(text.len() <= i32::MAX as usize);
        backtrack::exec(self, text, beg, end, start, None, timeout)
    }

    /// Continues a search after a previous match, guaranteeing progress:
    /// an empty previous match advances the start position by one before
    /// scanning (and reports `None` if the text is exhausted).
    pub fn find_next(
        &self,
        text: &[char],
        prev: &Match,
        timeout: Option<Duration>,
    ) -> Result<Option<Match>, Error> {
        assert!(prev.text_pos() <= text.len());
        backtrack::exec(
            self,
            text,
            0,
            text.len(),
            prev.text_pos(),
            Some(prev.len() as i32),
            timeout,
        )
    }

    /// Disassembles the program, one instruction per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut pos = 0;
        while pos < self.codes.len() {
            let _ = writeln!(
                out,
                "{:>4}: {}",
                pos,
                inst::describe(&self.codes, pos, &self.strings)
            );
            pos += inst::size(self.codes[pos]);
        }
        out
    }
}

/// Builds the Boyer-Moore machine for a hinted literal prefix. The
/// pattern is folded here when the prefix is case-insensitive.
pub(crate) fn bm_from_prefix(
    prefix: &LiteralPrefix,
    right_to_left: bool,
) -> Option<BoyerMoore> {
    if prefix.text.is_empty() {
        return None;
    }
    let pattern: Vec<char> = if prefix.case_insensitive {
        prefix.text.chars().map(crate::charclass::to_lower).collect()
    } else {
        prefix.text.chars().collect()
    };
    Some(BoyerMoore::new(pattern, prefix.case_insensitive, right_to_left))
}
