// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// This is the backtracking matching engine: an explicit stack machine
// over the compiled instruction stream.
//
// Forward execution walks the code, pushing one frame on `track` for
// every instruction that may need undoing. A failed test jumps to the
// backtrack switch, which pops the top frame and re-enters the
// instruction it names with its `BACK` flag set (or `BACK2`, when the
// stored code position was negated). `stack` carries operand-level
// bookkeeping (marks, loop counters), and `crawl` journals capture
// writes so backtracking can roll them back. The outermost Lazybranch
// frame doubles as the "give up this start position" alternative, so the
// machine always halts via `Stop`; a match was found iff capture slot 0
// recorded a span.

use std::mem;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::captures::{Match, MatchState};
use crate::charclass::{self, char_in_class, is_ecma_word_char, is_word_char, to_lower};
use crate::inst::{self, BACK, BACK2};
use crate::program::Program;
use crate::{Error, Options};

/// How many timeout consultations elapse between clock reads.
const TIMEOUT_CHECK_EVERY: u32 = 1024;

// The backtracking variants, as the dispatch sees them after a frame
// pop. Only instructions that push frames have one; a second variant
// exists where the undo happens in two stages.
const LAZYBRANCH_BACK: i32 = inst::LAZYBRANCH | BACK;
const SETMARK_BACK: i32 = inst::SETMARK | BACK;
const NULLMARK_BACK: i32 = inst::NULLMARK | BACK;
const GETMARK_BACK: i32 = inst::GETMARK | BACK;
const CAPTUREMARK_BACK: i32 = inst::CAPTUREMARK | BACK;
const BRANCHMARK_BACK: i32 = inst::BRANCHMARK | BACK;
const BRANCHMARK_BACK2: i32 = inst::BRANCHMARK | BACK2;
const LAZYBRANCHMARK_BACK: i32 = inst::LAZYBRANCHMARK | BACK;
const LAZYBRANCHMARK_BACK2: i32 = inst::LAZYBRANCHMARK | BACK2;
const SETCOUNT_BACK: i32 = inst::SETCOUNT | BACK;
const NULLCOUNT_BACK: i32 = inst::NULLCOUNT | BACK;
const BRANCHCOUNT_BACK: i32 = inst::BRANCHCOUNT | BACK;
const BRANCHCOUNT_BACK2: i32 = inst::BRANCHCOUNT | BACK2;
const LAZYBRANCHCOUNT_BACK: i32 = inst::LAZYBRANCHCOUNT | BACK;
const LAZYBRANCHCOUNT_BACK2: i32 = inst::LAZYBRANCHCOUNT | BACK2;
const SETJUMP_BACK: i32 = inst::SETJUMP | BACK;
const FOREJUMP_BACK: i32 = inst::FOREJUMP | BACK;
const ONELOOP_BACK: i32 = inst::ONELOOP | BACK;
const NOTONELOOP_BACK: i32 = inst::NOTONELOOP | BACK;
const SETLOOP_BACK: i32 = inst::SETLOOP | BACK;
const ONELAZY_BACK: i32 = inst::ONELAZY | BACK;
const NOTONELAZY_BACK: i32 = inst::NOTONELAZY | BACK;
const SETLAZY_BACK: i32 = inst::SETLAZY | BACK;

/// Searches `text[text_beg..text_end]` for one match starting at
/// `start`, bumping the start position until a match is found or the
/// range is exhausted. `prev_len` is the length of the previous match in
/// a chained search: zero forces a one-position bump first, which is
/// what guarantees progress over empty matches.
pub fn exec(
    prog: &Program,
    text: &[char],
    text_beg: usize,
    text_end: usize,
    start: usize,
    prev_len: Option<i32>,
    timeout: Option<Duration>,
) -> Result<Option<Match>, Error> {
    let mut runner = Runner {
        prog,
        text,
        text_beg: text_beg as i32,
        text_end: text_end as i32,
        text_start: start as i32,
        text_pos: start as i32,
        code_pos: 0,
        operator: 0,
        rtl: false,
        ci: false,
        track: Vec::with_capacity((prog.track_reserve * 8).max(32)),
        stack: Vec::with_capacity((prog.track_reserve * 8).max(16)),
        crawl: Vec::with_capacity(32),
        state: MatchState::new(prog.cap_count),
        deadline: timeout.map(|t| Instant::now() + t),
        timeout_tick: 0,
    };
    runner.scan(prev_len)
}

struct Runner<'r, 't> {
    prog: &'r Program,
    text: &'t [char],
    text_beg: i32,
    text_end: i32,
    /// The position the caller started this search at (`Start` anchor).
    text_start: i32,
    text_pos: i32,
    code_pos: usize,
    /// The current opcode with `BACK`/`BACK2` OR-ed in; `RTL`/`CI` are
    /// stripped into the two bools below at dispatch time.
    operator: i32,
    rtl: bool,
    ci: bool,
    track: Vec<i32>,
    stack: Vec<i32>,
    crawl: Vec<i32>,
    state: MatchState,
    deadline: Option<Instant>,
    timeout_tick: u32,
}

impl<'r, 't> Runner<'r, 't> {
    fn scan(&mut self, prev_len: Option<i32>) -> Result<Option<Match>, Error> {
        let bump = if self.prog.right_to_left { -1 } else { 1 };
        let stop_pos =
            if self.prog.right_to_left { self.text_beg } else { self.text_end };

        if prev_len == Some(0) {
            if self.text_pos == stop_pos {
                return Ok(None);
            }
            self.text_pos += bump;
        }
        loop {
            if self.find_first_char() {
                self.check_timeout()?;
                self.track.clear();
                self.stack.clear();
                self.crawl.clear();
                self.go()?;
                if self.state.is_matched(0) {
                    let state = mem::take(&mut self.state);
                    return Ok(Some(state.into_match(self.text_pos)));
                }
            }
            if self.text_pos == stop_pos {
                return Ok(None);
            }
            self.text_pos += bump;
        }
    }

    /// Advances `text_pos` to a plausible start position using the
    /// program's anchor and prefix hints. Returns false if no position
    /// at or beyond the current one can start a match.
    fn find_first_char(&mut self) -> bool {
        let prog = self.prog;
        use crate::program::Anchors as A;

        if !prog.anchors.is_empty() {
            if !prog.right_to_left {
                if (prog.anchors.contains(A::BEGINNING)
                    && self.text_pos > self.text_beg)
                    || (prog.anchors.contains(A::START)
                        && self.text_pos > self.text_start)
                {
                    self.text_pos = self.text_end;
                    return false;
                }
                if prog.anchors.contains(A::END_Z)
                    && self.text_pos < self.text_end - 1
                {
                    self.text_pos = self.text_end - 1;
                } else if prog.anchors.contains(A::END)
                    && self.text_pos < self.text_end
                {
                    self.text_pos = self.text_end;
                }
            } else {
                if (prog.anchors.contains(A::END) && self.text_pos < self.text_end)
                    || (prog.anchors.contains(A::END_Z)
                        && (self.text_pos < self.text_end - 1
                            || (self.text_pos == self.text_end - 1
                                && self.char_at(self.text_pos) != '\n')))
                    || (prog.anchors.contains(A::START)
                        && self.text_pos < self.text_start)
                {
                    self.text_pos = self.text_beg;
                    return false;
                }
                if prog.anchors.contains(A::BEGINNING)
                    && self.text_pos > self.text_beg
                {
                    self.text_pos = self.text_beg;
                }
            }
            if let Some(bm) = &prog.bm_prefix {
                return bm.is_match(
                    self.text,
                    self.text_pos,
                    self.text_beg,
                    self.text_end,
                );
            }
            return true;
        }

        if let Some(bm) = &prog.bm_prefix {
            let pos =
                bm.scan(self.text, self.text_pos, self.text_beg, self.text_end);
            if pos == -1 {
                self.text_pos =
                    if prog.right_to_left { self.text_beg } else { self.text_end };
                return false;
            }
            self.text_pos = pos;
            return true;
        }

        let fc = match &prog.fc_prefix {
            None => return true,
            Some(fc) => fc,
        };
        self.rtl = prog.right_to_left;
        self.ci = fc.case_insensitive;
        if charclass::is_singleton(&fc.set) {
            let ch = charclass::singleton_char(&fc.set);
            let mut i = self.forward_chars();
            while i > 0 {
                if self.forward_char_next() == ch {
                    self.backward_next();
                    return true;
                }
                i -= 1;
            }
        } else {
            let mut i = self.forward_chars();
            while i > 0 {
                if char_in_class(self.forward_char_next(), &fc.set) {
                    self.backward_next();
                    return true;
                }
                i -= 1;
            }
        }
        false
    }

    /// Executes the program from code position 0 until `Stop`.
    fn go(&mut self) -> Result<(), Error> {
        self.code_pos = 0;
        self.set_operator(self.prog.codes[0]);

        loop {
            self.check_timeout()?;
            match self.operator {
                inst::STOP => return Ok(()),

                inst::NOTHING => self.backtrack()?,

                inst::GOTO => {
                    let dest = self.operand(0) as usize;
                    self.goto_pos(dest);
                }

                inst::TESTREF => {
                    if self.state.is_matched(self.operand(0) as usize) {
                        self.advance(1);
                    } else {
                        self.backtrack()?;
                    }
                }

                inst::LAZYBRANCH => {
                    self.track_push1(self.text_pos);
                    self.advance(1);
                }
                LAZYBRANCH_BACK => {
                    self.text_pos = self.track_pop();
                    let dest = self.operand(0) as usize;
                    self.goto_pos(dest);
                }

                inst::SETMARK => {
                    self.stack_push1(self.text_pos);
                    self.track_push();
                    self.advance(0);
                }
                inst::NULLMARK => {
                    self.stack_push1(-1);
                    self.track_push();
                    self.advance(0);
                }
                SETMARK_BACK
                | NULLMARK_BACK => {
                    self.stack_pop();
                    self.backtrack()?;
                }

                inst::GETMARK => {
                    let mark = self.stack_pop();
                    self.track_push1(mark);
                    self.text_pos = mark;
                    self.advance(0);
                }
                GETMARK_BACK => {
                    let mark = self.track_pop();
                    self.stack_push1(mark);
                    self.backtrack()?;
                }

                inst::CAPTUREMARK => {
                    let capnum = self.operand(0);
                    let uncapnum = self.operand(1);
                    if uncapnum != -1
                        && !self.state.is_matched(uncapnum as usize)
                    {
                        self.backtrack()?;
                        continue;
                    }
                    let mark = self.stack_pop();
                    if uncapnum != -1 {
                        self.transfer_capture(capnum, uncapnum, mark, self.text_pos);
                    } else {
                        self.capture(capnum, mark, self.text_pos);
                    }
                    self.track_push1(mark);
                    self.advance(2);
                }
                CAPTUREMARK_BACK => {
                    let mark = self.track_pop();
                    self.stack_push1(mark);
                    self.uncapture();
                    if self.operand(0) != -1 && self.operand(1) != -1 {
                        self.uncapture();
                    }
                    self.backtrack()?;
                }

                inst::BRANCHMARK => {
                    let mark = self.stack_pop();
                    if self.text_pos != mark {
                        // Nonempty body match: loop again.
                        self.track_push2(mark, self.text_pos);
                        self.stack_push1(self.text_pos);
                        let dest = self.operand(0) as usize;
                        self.goto_pos(dest);
                    } else {
                        // Empty body match: exit the loop now.
                        self.track2_push1(mark);
                        self.advance(1);
                    }
                }
                BRANCHMARK_BACK => {
                    let (mark, pos) = self.track_pop2();
                    self.stack_pop();
                    self.text_pos = pos;
                    self.track2_push1(mark);
                    self.advance(1);
                }
                BRANCHMARK_BACK2 => {
                    let mark = self.track_pop();
                    self.stack_push1(mark);
                    self.backtrack()?;
                }

                inst::LAZYBRANCHMARK => {
                    let old_mark = self.stack_pop();
                    if self.text_pos != old_mark {
                        // Nonempty match: looping remains possible on
                        // backtrack.
                        if old_mark != -1 {
                            self.track_push2(old_mark, self.text_pos);
                        } else {
                            self.track_push2(self.text_pos, self.text_pos);
                        }
                    } else {
                        // Empty body match: only the loop-entry undo is
                        // left, and it pops a mark.
                        self.stack_push1(old_mark);
                        self.track2_push1(old_mark);
                    }
                    self.advance(1);
                }
                LAZYBRANCHMARK_BACK => {
                    let (mark, pos) = self.track_pop2();
                    self.track2_push1(mark);
                    self.stack_push1(pos);
                    self.text_pos = pos;
                    let dest = self.operand(0) as usize;
                    self.goto_pos(dest);
                }
                LAZYBRANCHMARK_BACK2 => {
                    self.stack_pop();
                    let mark = self.track_pop();
                    self.stack_push1(mark);
                    self.backtrack()?;
                }

                inst::SETCOUNT => {
                    self.stack_push2(self.text_pos, self.operand(0));
                    self.track_push();
                    self.advance(1);
                }
                inst::NULLCOUNT => {
                    self.stack_push2(-1, self.operand(0));
                    self.track_push();
                    self.advance(1);
                }
                SETCOUNT_BACK
                | NULLCOUNT_BACK => {
                    self.stack_pop2();
                    self.backtrack()?;
                }

                inst::BRANCHCOUNT => {
                    let (mark, count) = self.stack_pop2();
                    let matched = self.text_pos - mark;
                    if count >= self.operand(1) || (matched == 0 && count >= 0) {
                        // At the limit, or an empty body match in
                        // optional territory: exit the loop.
                        self.track2_push2(mark, count);
                        self.advance(2);
                    } else {
                        self.track_push1(mark);
                        self.stack_push2(self.text_pos, count + 1);
                        let dest = self.operand(0) as usize;
                        self.goto_pos(dest);
                    }
                }
                BRANCHCOUNT_BACK => {
                    let old_mark = self.track_pop();
                    let (mark, count) = self.stack_pop2();
                    if count > 0 {
                        // Retreat one iteration and exit the loop.
                        self.text_pos = mark;
                        self.track2_push2(old_mark, count - 1);
                        self.advance(2);
                    } else {
                        self.stack_push2(old_mark, count - 1);
                        self.backtrack()?;
                    }
                }
                BRANCHCOUNT_BACK2 => {
                    let (mark, count) = self.track_pop2();
                    self.stack_push2(mark, count);
                    self.backtrack()?;
                }

                inst::LAZYBRANCHCOUNT => {
                    let (mark, count) = self.stack_pop2();
                    if count < 0 {
                        // Mandatory iterations remain: loop now.
                        self.track2_push1(mark);
                        self.stack_push2(self.text_pos, count + 1);
                        let dest = self.operand(0) as usize;
                        self.goto_pos(dest);
                    } else {
                        self.track_push3(mark, count, self.text_pos);
                        self.advance(2);
                    }
                }
                LAZYBRANCHCOUNT_BACK => {
                    let (mark, count, pos) = self.track_pop3();
                    if count < self.operand(1) && pos != mark {
                        // Under the limit and progressing: grow the loop.
                        self.text_pos = pos;
                        self.stack_push2(pos, count + 1);
                        self.track2_push1(mark);
                        let dest = self.operand(0) as usize;
                        self.goto_pos(dest);
                    } else {
                        self.stack_push2(mark, count);
                        self.backtrack()?;
                    }
                }
                LAZYBRANCHCOUNT_BACK2 => {
                    // The fully unrolled loop failed: restore the prior
                    // mark, give back one count, and keep unwinding.
                    let old_mark = self.track_pop();
                    let (_, count) = self.stack_pop2();
                    self.stack_push2(old_mark, count - 1);
                    self.backtrack()?;
                }

                inst::SETJUMP => {
                    self.stack_push2(self.track.len() as i32, self.crawl_pos());
                    self.track_push();
                    self.advance(0);
                }
                SETJUMP_BACK => {
                    self.stack_pop2();
                    self.backtrack()?;
                }
                inst::BACKJUMP => {
                    let (track_len, crawl_len) = self.stack_pop2();
                    self.track.truncate(track_len as usize);
                    while self.crawl_pos() != crawl_len {
                        self.uncapture();
                    }
                    self.backtrack()?;
                }
                inst::FOREJUMP => {
                    let (track_len, crawl_len) = self.stack_pop2();
                    self.track.truncate(track_len as usize);
                    self.track_push1(crawl_len);
                    self.advance(0);
                }
                FOREJUMP_BACK => {
                    let crawl_len = self.track_pop();
                    while self.crawl_pos() != crawl_len {
                        self.uncapture();
                    }
                    self.backtrack()?;
                }

                inst::BOL => {
                    if self.left_chars() > 0
                        && self.char_at(self.text_pos - 1) != '\n'
                    {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }
                inst::EOL => {
                    if self.right_chars() > 0
                        && self.char_at(self.text_pos) != '\n'
                    {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }
                inst::BOUNDARY => {
                    if self.is_boundary(is_word_char) {
                        self.advance(0);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::NONBOUNDARY => {
                    if !self.is_boundary(is_word_char) {
                        self.advance(0);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::ECMABOUNDARY => {
                    if self.is_boundary(is_ecma_word_char) {
                        self.advance(0);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::NONECMABOUNDARY => {
                    if !self.is_boundary(is_ecma_word_char) {
                        self.advance(0);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::BEGINNING => {
                    if self.left_chars() > 0 {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }
                inst::START => {
                    if self.text_pos != self.text_start {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }
                inst::ENDZ => {
                    if self.right_chars() > 1
                        || (self.right_chars() == 1
                            && self.char_at(self.text_pos) != '\n')
                    {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }
                inst::END => {
                    if self.right_chars() > 0 {
                        self.backtrack()?;
                    } else {
                        self.advance(0);
                    }
                }

                inst::ONE => {
                    let ch = self.operand_char(0);
                    if self.forward_chars() < 1 || self.forward_char_next() != ch
                    {
                        self.backtrack()?;
                    } else {
                        self.advance(1);
                    }
                }
                inst::NOTONE => {
                    let ch = self.operand_char(0);
                    if self.forward_chars() < 1 || self.forward_char_next() == ch
                    {
                        self.backtrack()?;
                    } else {
                        self.advance(1);
                    }
                }
                inst::SET => {
                    if self.forward_chars() < 1 {
                        self.backtrack()?;
                        continue;
                    }
                    let ch = self.forward_char_next();
                    let prog = self.prog;
                    let set = &prog.strings[self.operand(0) as usize];
                    if char_in_class(ch, set) {
                        self.advance(1);
                    } else {
                        self.backtrack()?;
                    }
                }

                inst::MULTI => {
                    if self.string_match(self.operand(0) as usize) {
                        self.advance(1);
                    } else {
                        self.backtrack()?;
                    }
                }

                inst::REF => {
                    let slot = self.operand(0) as usize;
                    if self.state.is_matched(slot) {
                        let (index, len) =
                            (self.state.index(slot), self.state.length(slot));
                        if self.ref_match(index, len) {
                            self.advance(1);
                        } else {
                            self.backtrack()?;
                        }
                    } else if self.prog.options.contains(Options::ECMASCRIPT) {
                        // An unmatched group matches emptily under ECMA
                        // rules.
                        self.advance(1);
                    } else {
                        self.backtrack()?;
                    }
                }

                inst::ONEREP => {
                    let count = self.operand(1);
                    if self.forward_chars() < count {
                        self.backtrack()?;
                        continue;
                    }
                    let ch = self.operand_char(0);
                    let mut ok = true;
                    for _ in 0..count {
                        if self.forward_char_next() != ch {
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        self.advance(2);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::NOTONEREP => {
                    let count = self.operand(1);
                    if self.forward_chars() < count {
                        self.backtrack()?;
                        continue;
                    }
                    let ch = self.operand_char(0);
                    let mut ok = true;
                    for _ in 0..count {
                        if self.forward_char_next() == ch {
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        self.advance(2);
                    } else {
                        self.backtrack()?;
                    }
                }
                inst::SETREP => {
                    let count = self.operand(1);
                    if self.forward_chars() < count {
                        self.backtrack()?;
                        continue;
                    }
                    let prog = self.prog;
                    let set = &prog.strings[self.operand(0) as usize];
                    let mut ok = true;
                    for _ in 0..count {
                        if !char_in_class(self.forward_char_next(), set) {
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        self.advance(2);
                    } else {
                        self.backtrack()?;
                    }
                }

                inst::ONELOOP | inst::NOTONELOOP => {
                    let negate = self.operator == inst::NOTONELOOP;
                    let mut c = self.operand(1);
                    let fwd = self.forward_chars();
                    if c > fwd {
                        c = fwd;
                    }
                    let ch = self.operand_char(0);
                    let mut i = c;
                    while i > 0 {
                        if (self.forward_char_next() == ch) == negate {
                            self.backward_next();
                            break;
                        }
                        i -= 1;
                    }
                    if c > i {
                        self.track_push2(c - i - 1, self.text_pos - self.bump());
                    }
                    self.advance(2);
                }
                inst::SETLOOP => {
                    let mut c = self.operand(1);
                    let fwd = self.forward_chars();
                    if c > fwd {
                        c = fwd;
                    }
                    let prog = self.prog;
                    let set = &prog.strings[self.operand(0) as usize];
                    let mut i = c;
                    while i > 0 {
                        if !char_in_class(self.forward_char_next(), set) {
                            self.backward_next();
                            break;
                        }
                        i -= 1;
                    }
                    if c > i {
                        self.track_push2(c - i - 1, self.text_pos - self.bump());
                    }
                    self.advance(2);
                }
                ONELOOP_BACK
                | NOTONELOOP_BACK
                | SETLOOP_BACK => {
                    let (i, pos) = self.track_pop2();
                    self.text_pos = pos;
                    if i > 0 {
                        self.track_push2(i - 1, pos - self.bump());
                    }
                    self.advance(2);
                }

                inst::ONELAZY | inst::NOTONELAZY | inst::SETLAZY => {
                    let mut c = self.operand(1);
                    let fwd = self.forward_chars();
                    if c > fwd {
                        c = fwd;
                    }
                    if c > 0 {
                        self.track_push2(c - 1, self.text_pos);
                    }
                    self.advance(2);
                }
                ONELAZY_BACK => {
                    let (i, pos) = self.track_pop2();
                    self.text_pos = pos;
                    let ch = self.operand_char(0);
                    if self.forward_char_next() != ch {
                        self.backtrack()?;
                        continue;
                    }
                    if i > 0 {
                        self.track_push2(i - 1, self.text_pos);
                    }
                    self.advance(2);
                }
                NOTONELAZY_BACK => {
                    let (i, pos) = self.track_pop2();
                    self.text_pos = pos;
                    let ch = self.operand_char(0);
                    if self.forward_char_next() == ch {
                        self.backtrack()?;
                        continue;
                    }
                    if i > 0 {
                        self.track_push2(i - 1, self.text_pos);
                    }
                    self.advance(2);
                }
                SETLAZY_BACK => {
                    let (i, pos) = self.track_pop2();
                    self.text_pos = pos;
                    let ch = self.forward_char_next();
                    let prog = self.prog;
                    let set = &prog.strings[self.operand(0) as usize];
                    if !char_in_class(ch, set) {
                        self.backtrack()?;
                        continue;
                    }
                    if i > 0 {
                        self.track_push2(i - 1, self.text_pos);
                    }
                    self.advance(2);
                }

                _ => return Err(Error::Internal("unrecognized opcode")),
            }
        }
    }

    fn set_operator(&mut self, op: i32) {
        self.ci = op & inst::CI != 0;
        self.rtl = op & inst::RTL != 0;
        self.operator = op & !(inst::CI | inst::RTL);
    }

    fn operand(&self, i: usize) -> i32 {
        self.prog.codes[self.code_pos + 1 + i]
    }

    /// A character operand, folded when the current operator is
    /// case-insensitive (the text side folds in `forward_char_next`).
    fn operand_char(&self, i: usize) -> char {
        let ch = char::from_u32(self.operand(i) as u32).unwrap_or('\u{0}');
        if self.ci {
            to_lower(ch)
        } else {
            ch
        }
    }

    fn advance(&mut self, operands: usize) {
        self.code_pos += operands + 1;
        let op = self.prog.codes[self.code_pos];
        self.set_operator(op);
    }

    fn goto_pos(&mut self, dest: usize) {
        // Only a backward jump can re-run code that pushes frames, so
        // this is the one place storage headroom is re-checked.
        if dest < self.code_pos {
            self.ensure_storage();
        }
        self.code_pos = dest;
        let op = self.prog.codes[dest];
        self.set_operator(op);
    }

    fn backtrack(&mut self) -> Result<(), Error> {
        let newpos = match self.track.pop() {
            Some(v) => v,
            None => return Err(Error::Internal("backtrack stack underflow")),
        };
        if newpos < 0 {
            self.code_pos = (-newpos) as usize;
            let op = self.prog.codes[self.code_pos] | BACK2;
            self.set_operator(op);
        } else {
            self.code_pos = newpos as usize;
            let op = self.prog.codes[self.code_pos] | BACK;
            self.set_operator(op);
        }
        Ok(())
    }

    fn ensure_storage(&mut self) {
        let need = 4 * self.prog.track_reserve;
        self.track.reserve(need);
        self.stack.reserve(need);
    }

    fn check_timeout(&mut self) -> Result<(), Error> {
        if let Some(deadline) = self.deadline {
            self.timeout_tick += 1;
            if self.timeout_tick % TIMEOUT_CHECK_EVERY == 0
                && Instant::now() >= deadline
            {
                debug!("search aborted: timeout expired");
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    // -------- text access --------

    fn char_at(&self, i: i32) -> char {
        self.text[i as usize]
    }

    fn bump(&self) -> i32 {
        if self.rtl {
            -1
        } else {
            1
        }
    }

    fn left_chars(&self) -> i32 {
        self.text_pos - self.text_beg
    }

    fn right_chars(&self) -> i32 {
        self.text_end - self.text_pos
    }

    /// Characters remaining in the current operator's direction.
    fn forward_chars(&self) -> i32 {
        if self.rtl {
            self.text_pos - self.text_beg
        } else {
            self.text_end - self.text_pos
        }
    }

    /// Consumes one character in the current direction, folding it when
    /// the operator is case-insensitive.
    fn forward_char_next(&mut self) -> char {
        let ch = if self.rtl {
            self.text_pos -= 1;
            self.text[self.text_pos as usize]
        } else {
            let ch = self.text[self.text_pos as usize];
            self.text_pos += 1;
            ch
        };
        if self.ci {
            to_lower(ch)
        } else {
            ch
        }
    }

    /// Gives back the character just consumed.
    fn backward_next(&mut self) {
        self.text_pos += if self.rtl { 1 } else { -1 };
    }

    fn is_boundary(&self, word: fn(char) -> bool) -> bool {
        let left = self.text_pos > self.text_beg
            && word(self.char_at(self.text_pos - 1));
        let right =
            self.text_pos < self.text_end && word(self.char_at(self.text_pos));
        left != right
    }

    /// Matches a pooled literal at the current position, advancing past
    /// it (before it, for RTL) on success.
    fn string_match(&mut self, string: usize) -> bool {
        let prog = self.prog;
        let s = &prog.strings[string];
        let len = s.len() as i32;
        let mut pos;
        if !self.rtl {
            if self.text_end - self.text_pos < len {
                return false;
            }
            pos = self.text_pos + len;
        } else {
            if self.text_pos - self.text_beg < len {
                return false;
            }
            pos = self.text_pos;
        }
        let mut c = len;
        while c != 0 {
            c -= 1;
            pos -= 1;
            let (mut th, mut ph) = (
                self.char_at(pos),
                char::from_u32(s[c as usize] as u32).unwrap_or('\u{0}'),
            );
            if self.ci {
                th = to_lower(th);
                ph = to_lower(ph);
            }
            if th != ph {
                return false;
            }
        }
        if !self.rtl {
            pos += len;
        }
        self.text_pos = pos;
        true
    }

    /// Matches the text span `[index, index+len)` again at the current
    /// position.
    fn ref_match(&mut self, index: i32, len: i32) -> bool {
        let mut pos;
        if !self.rtl {
            if self.text_end - self.text_pos < len {
                return false;
            }
            pos = self.text_pos + len;
        } else {
            if self.text_pos - self.text_beg < len {
                return false;
            }
            pos = self.text_pos;
        }
        let mut cmp_pos = index + len;
        let mut c = len;
        while c != 0 {
            c -= 1;
            cmp_pos -= 1;
            pos -= 1;
            let (mut a, mut b) = (self.char_at(cmp_pos), self.char_at(pos));
            if self.ci {
                a = to_lower(a);
                b = to_lower(b);
            }
            if a != b {
                return false;
            }
        }
        if !self.rtl {
            pos += len;
        }
        self.text_pos = pos;
        true
    }

    // -------- capture bookkeeping --------

    fn capture(&mut self, capnum: i32, start: i32, end: i32) {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        self.crawl.push(capnum);
        self.state.add(capnum as usize, start, end - start);
    }

    // A balanced-group write: slot `capnum` (if any) receives the span
    // between `uncapnum`'s capture and here, and `uncapnum` pops back to
    // its previous capture.
    fn transfer_capture(
        &mut self,
        capnum: i32,
        uncapnum: i32,
        start: i32,
        end: i32,
    ) {
        let (mut start, mut end) =
            if end < start { (end, start) } else { (start, end) };
        let start2 = self.state.index(uncapnum as usize);
        let end2 = start2 + self.state.length(uncapnum as usize);
        // The new capture is the innermost defined interval.
        if start >= end2 {
            end = start;
            start = end2;
        } else if end <= start2 {
            start = start2;
        } else {
            if end > end2 {
                end = end2;
            }
            if start2 > start {
                start = start2;
            }
        }
        self.crawl.push(uncapnum);
        self.state.balance(uncapnum as usize);
        if capnum != -1 {
            self.crawl.push(capnum);
            self.state.add(capnum as usize, start, end - start);
        }
    }

    fn uncapture(&mut self) {
        let i = self.crawl.len() - 1;
        let capnum = self.crawl[i];
        self.crawl.truncate(i);
        self.state.remove(capnum as usize);
    }

    fn crawl_pos(&self) -> i32 {
        self.crawl.len() as i32
    }

    // -------- frame stacks --------
    //
    // Multi-value pushes store their values first-argument-deepest, so a
    // pop returns them in push order.

    fn track_push(&mut self) {
        self.track.push(self.code_pos as i32);
    }

    fn track_push1(&mut self, a: i32) {
        self.track.push(a);
        self.track.push(self.code_pos as i32);
    }

    fn track_push2(&mut self, a: i32, b: i32) {
        self.track.push(a);
        self.track.push(b);
        self.track.push(self.code_pos as i32);
    }

    fn track_push3(&mut self, a: i32, b: i32, c: i32) {
        self.track.push(a);
        self.track.push(b);
        self.track.push(c);
        self.track.push(self.code_pos as i32);
    }

    /// Pushes a frame whose pop re-enters this instruction with `BACK2`.
    fn track2_push1(&mut self, a: i32) {
        self.track.push(a);
        self.track.push(-(self.code_pos as i32));
    }

    fn track2_push2(&mut self, a: i32, b: i32) {
        self.track.push(a);
        self.track.push(b);
        self.track.push(-(self.code_pos as i32));
    }

    fn track_pop(&mut self) -> i32 {
        let i = self.track.len() - 1;
        let v = self.track[i];
        self.track.truncate(i);
        v
    }

    fn track_pop2(&mut self) -> (i32, i32) {
        let b = self.track_pop();
        let a = self.track_pop();
        (a, b)
    }

    fn track_pop3(&mut self) -> (i32, i32, i32) {
        let c = self.track_pop();
        let b = self.track_pop();
        let a = self.track_pop();
        (a, b, c)
    }

    fn stack_push1(&mut self, a: i32) {
        self.stack.push(a);
    }

    fn stack_push2(&mut self, a: i32, b: i32) {
        self.stack.push(a);
        self.stack.push(b);
    }

    fn stack_pop(&mut self) -> i32 {
        let i = self.stack.len() - 1;
        let v = self.stack[i];
        self.stack.truncate(i);
        v
    }

    fn stack_pop2(&mut self) -> (i32, i32) {
        let b = self.stack_pop();
        let a = self.stack_pop();
        (a, b)
    }
}
