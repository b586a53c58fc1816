// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Character classes.
//!
//! A class is built incrementally (characters, ranges, Unicode general
//! categories, predefined word/space/digit shortcuts, case-fold expansion,
//! subtraction) and then serialized into a self-delimited blob of `i32`
//! cells that the matcher tests membership against. The blob layout:
//!
//! ```text
//! [0] flags (bit 0 = negated)
//! [1] length of the range list, in cells
//! [2] length of the category list, in cells
//! ... range list: sorted boundaries; a scalar is in the set iff the
//!     index of the first boundary greater than it is odd
//! ... category list: k means "category k-1", -k means "not category k-1",
//!     +-100 means any/none whitespace, 0 opens and closes an OR group
//! ... optional subtrahend: another blob of the same shape; members of
//!     the subtrahend are removed from the outer set
//! ```

use once_cell::sync::Lazy;
use unicode_general_category::{get_general_category, GeneralCategory};

const FLAGS: usize = 0;
const SET_LENGTH: usize = 1;
const CATEGORY_LENGTH: usize = 2;
const SET_START: usize = 3;

const NEGATED: i32 = 1;

/// Pseudo-category code for "any whitespace".
const SPACE_CODE: i32 = 100;

/// One past the largest Unicode scalar; usable as an exclusive range bound.
const SCALAR_LIMIT: u32 = 0x11_0000;
const MAX_SCALAR: u32 = 0x10_FFFF;

/// General category indices. The order matches the category list encoding:
/// the stored code for category `k` is `k + 1` (or `-(k + 1)` negated).
const CAT_LU: i32 = 0;
const CAT_LL: i32 = 1;
const CAT_LT: i32 = 2;
const CAT_LM: i32 = 3;
const CAT_LO: i32 = 4;
const CAT_MN: i32 = 5;
const CAT_ND: i32 = 8;
const CAT_PC: i32 = 18;

/// The categories making up `\w` (and the word-boundary word set).
const WORD_CATEGORIES: [i32; 8] =
    [CAT_LU, CAT_LL, CAT_LT, CAT_LM, CAT_LO, CAT_MN, CAT_ND, CAT_PC];

/// Maps a scalar to its general category index.
fn category_id(ch: char) -> i32 {
    use GeneralCategory::*;
    match get_general_category(ch) {
        UppercaseLetter => 0,
        LowercaseLetter => 1,
        TitlecaseLetter => 2,
        ModifierLetter => 3,
        OtherLetter => 4,
        NonspacingMark => 5,
        SpacingMark => 6,
        EnclosingMark => 7,
        DecimalNumber => 8,
        LetterNumber => 9,
        OtherNumber => 10,
        SpaceSeparator => 11,
        LineSeparator => 12,
        ParagraphSeparator => 13,
        Control => 14,
        Format => 15,
        Surrogate => 16,
        PrivateUse => 17,
        ConnectorPunctuation => 18,
        DashPunctuation => 19,
        OpenPunctuation => 20,
        ClosePunctuation => 21,
        InitialPunctuation => 22,
        FinalPunctuation => 23,
        OtherPunctuation => 24,
        MathSymbol => 25,
        CurrencySymbol => 26,
        ModifierSymbol => 27,
        OtherSymbol => 28,
        Unassigned => 29,
    }
}

/// The simple (one-to-one, invariant) lowercase mapping. Multi-character
/// expansions fold to the character itself.
pub fn to_lower(ch: char) -> char {
    if ch.is_ascii() {
        return ch.to_ascii_lowercase();
    }
    let mut it = ch.to_lowercase();
    match (it.next(), it.next()) {
        (Some(l), None) => l,
        _ => ch,
    }
}

/// True iff the character counts as a word character for `Boundary`.
pub fn is_word_char(ch: char) -> bool {
    if ch.is_ascii() {
        return ch.is_ascii_alphanumeric() || ch == '_';
    }
    WORD_CATEGORIES.contains(&category_id(ch))
}

/// True iff the character counts as a word character for `ECMABoundary`.
pub fn is_ecma_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// An incrementally built character class.
///
/// The range list stays canonical (sorted, non-overlapping, abutting runs
/// merged) as long as additions arrive in order; anything else clears the
/// `canonical` flag and serialization re-canonicalizes.
#[derive(Clone, Debug)]
pub struct CharClass {
    ranges: Vec<(u32, u32)>,
    categories: Vec<i32>,
    subtractor: Option<Box<CharClass>>,
    negated: bool,
    canonical: bool,
}

impl CharClass {
    pub fn new() -> CharClass {
        CharClass {
            ranges: vec![],
            categories: vec![],
            subtractor: None,
            negated: false,
            canonical: true,
        }
    }

    /// Marks the outer set as negated (or not). Negation applies before
    /// any subtraction.
    pub fn negate(&mut self, yes: bool) {
        self.negated = yes;
    }

    pub fn add_char(&mut self, ch: char) {
        self.add_range(ch, ch);
    }

    pub fn add_range(&mut self, lo: char, hi: char) {
        self.push_range(lo as u32, hi as u32);
    }

    fn push_range(&mut self, lo: u32, hi: u32) {
        if lo > hi {
            return;
        }
        if let Some(&(_, last_hi)) = self.ranges.last() {
            // In-order, non-adjacent appends keep the list canonical.
            if last_hi == MAX_SCALAR || lo <= last_hi + 1 {
                self.canonical = false;
            }
        }
        self.ranges.push((lo, hi));
    }

    /// Unions another class's ranges and categories into this one. The
    /// other class's negation and subtraction are not carried over.
    pub fn add_class(&mut self, other: &CharClass) {
        self.canonical = false;
        self.ranges.extend_from_slice(&other.ranges);
        self.categories.extend_from_slice(&other.categories);
    }

    /// Adds a single general category (by index), or its complement.
    pub fn add_category_id(&mut self, cat: i32, negate: bool) {
        let code = cat + 1;
        self.categories.push(if negate { -code } else { code });
    }

    /// Adds an OR group of categories: a member matches if it is in any
    /// of them (or, negated, in none of them).
    pub fn add_category_group(&mut self, cats: &[i32], negate: bool) {
        self.categories.push(0);
        for &cat in cats {
            let code = cat + 1;
            self.categories.push(if negate { -code } else { code });
        }
        self.categories.push(0);
    }

    /// Adds `\d` or `\D` (`[0-9]` under ECMA rules, `Nd` otherwise).
    pub fn add_digit(&mut self, ecma: bool, negate: bool) {
        if ecma {
            if negate {
                self.push_range(0, '0' as u32 - 1);
                self.push_range('9' as u32 + 1, MAX_SCALAR);
            } else {
                self.add_range('0', '9');
            }
        } else {
            self.add_category_id(CAT_ND, negate);
        }
    }

    /// Adds `\w` or `\W`.
    pub fn add_word(&mut self, ecma: bool, negate: bool) {
        if ecma {
            if negate {
                self.push_range(0, '0' as u32 - 1);
                self.push_range('9' as u32 + 1, 'A' as u32 - 1);
                self.push_range('Z' as u32 + 1, '^' as u32);
                self.push_range('`' as u32, '`' as u32);
                self.push_range('z' as u32 + 1, MAX_SCALAR);
            } else {
                self.add_range('0', '9');
                self.add_range('A', 'Z');
                self.add_char('_');
                self.add_range('a', 'z');
            }
        } else {
            self.add_category_group(&WORD_CATEGORIES, negate);
        }
    }

    /// Adds `\s` or `\S` (`[\t-\r ]` under ECMA rules, any whitespace
    /// otherwise).
    pub fn add_space(&mut self, ecma: bool, negate: bool) {
        if ecma {
            if negate {
                self.push_range(0, 0x8);
                self.push_range(0xE, 0x1F);
                self.push_range(0x21, MAX_SCALAR);
            } else {
                self.push_range(0x9, 0xD);
                self.push_range(0x20, 0x20);
            }
        } else {
            self.categories.push(if negate { -SPACE_CODE } else { SPACE_CODE });
        }
    }

    /// Installs a subtracted class: members of `sub` are removed from
    /// this set after its own negation is applied.
    pub fn add_subtraction(&mut self, sub: CharClass) {
        self.subtractor = Some(Box::new(sub));
    }

    /// Expands the set with the lowercase image of everything in it.
    /// Single-character ranges are folded exactly and in place; wider
    /// ranges go through the fold interval table.
    pub fn add_lowercase(&mut self) {
        self.canonical = false;
        let count = self.ranges.len();
        for i in 0..count {
            let (lo, hi) = self.ranges[i];
            if lo == hi {
                if let Some(ch) = char::from_u32(lo) {
                    let l = to_lower(ch) as u32;
                    self.ranges[i] = (l, l);
                }
            } else {
                self.add_lowercase_range(lo, hi);
            }
        }
    }

    fn add_lowercase_range(&mut self, lo: u32, hi: u32) {
        let table = &*FOLD_TABLE;
        // First span that can intersect [lo, hi].
        let mut i = table.partition_point(|s| s.hi < lo);
        while i < table.len() && table[i].lo <= hi {
            let span = table[i];
            let mut lo_t = span.lo.max(lo);
            let mut hi_t = span.hi.min(hi);
            match span.rule {
                FoldRule::Set(k) => {
                    lo_t = k;
                    hi_t = k;
                }
                FoldRule::Add(d) => {
                    lo_t = (lo_t as i64 + d as i64) as u32;
                    hi_t = (hi_t as i64 + d as i64) as u32;
                }
                FoldRule::Bor => {
                    lo_t |= 1;
                    hi_t |= 1;
                }
                FoldRule::Bad => {
                    lo_t += lo_t & 1;
                    hi_t += hi_t & 1;
                }
            }
            if lo_t < lo || hi_t > hi {
                self.push_range(lo_t, hi_t);
            }
            i += 1;
        }
    }

    fn canonicalize(&mut self) {
        if self.canonical {
            return;
        }
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(lo, hi) in &self.ranges {
            match merged.last_mut() {
                Some(&mut (_, ref mut last_hi))
                    if lo <= last_hi.saturating_add(1) =>
                {
                    if hi > *last_hi {
                        *last_hi = hi;
                    }
                }
                _ => merged.push((lo, hi)),
            }
        }
        self.ranges = merged;
        self.canonical = true;
    }

    /// Serializes the class into its blob form.
    pub fn into_blob(mut self) -> Vec<i32> {
        self.canonicalize();
        let mut blob = Vec::with_capacity(
            SET_START + self.ranges.len() * 2 + self.categories.len(),
        );
        blob.push(if self.negated { NEGATED } else { 0 });
        blob.push((self.ranges.len() * 2) as i32);
        blob.push(self.categories.len() as i32);
        for &(lo, hi) in &self.ranges {
            blob.push(lo as i32);
            blob.push((hi + 1).min(SCALAR_LIMIT) as i32);
        }
        blob.extend_from_slice(&self.categories);
        if let Some(sub) = self.subtractor {
            blob.extend(sub.into_blob());
        }
        blob
    }
}

/// Tests whether a scalar is a member of a serialized class.
pub fn char_in_class(ch: char, set: &[i32]) -> bool {
    char_in_class_at(ch, set, 0)
}

fn char_in_class_at(ch: char, set: &[i32], start: usize) -> bool {
    let set_len = set[start + SET_LENGTH] as usize;
    let cat_len = set[start + CATEGORY_LENGTH] as usize;
    let end = start + SET_START + set_len + cat_len;

    let ranges = &set[start + SET_START..start + SET_START + set_len];
    let v = ch as u32 as i32;
    // Index of the first boundary greater than the scalar; odd means the
    // scalar fell inside a range.
    let idx = ranges.partition_point(|&b| b <= v);
    let mut found = idx & 1 == 1;

    if !found && cat_len > 0 {
        let cats = &set[start + SET_START + set_len..end];
        found = char_in_categories(ch, cats);
    }
    if set[start + FLAGS] & NEGATED != 0 {
        found = !found;
    }
    if found && set.len() > end && char_in_class_at(ch, set, end) {
        found = false;
    }
    found
}

fn char_in_categories(ch: char, cats: &[i32]) -> bool {
    let my_cat = category_id(ch);
    let mut i = 0;
    while i < cats.len() {
        let cur = cats[i];
        if cur == 0 {
            if char_in_category_group(my_cat, cats, &mut i) {
                return true;
            }
        } else if cur > 0 {
            if cur == SPACE_CODE {
                if ch.is_whitespace() {
                    return true;
                }
            } else if my_cat == cur - 1 {
                return true;
            }
        } else {
            if cur == -SPACE_CODE {
                if !ch.is_whitespace() {
                    return true;
                }
            } else if my_cat != -1 - cur {
                return true;
            }
        }
        i += 1;
    }
    false
}

// A group is a 0-delimited run. A positive leading member means "any of
// these categories"; a negative leading member means "none of them".
fn char_in_category_group(my_cat: i32, cats: &[i32], i: &mut usize) -> bool {
    *i += 1;
    let mut cur = cats[*i];
    if cur > 0 {
        let mut answer = false;
        while cur != 0 {
            if !answer && my_cat == cur - 1 {
                answer = true;
            }
            *i += 1;
            cur = cats[*i];
        }
        answer
    } else {
        let mut answer = true;
        while cur != 0 {
            if answer && my_cat == -1 - cur {
                answer = false;
            }
            *i += 1;
            cur = cats[*i];
        }
        answer
    }
}

/// True iff the blob denotes exactly one scalar.
pub fn is_singleton(set: &[i32]) -> bool {
    set[FLAGS] == 0
        && set[SET_LENGTH] == 2
        && set[CATEGORY_LENGTH] == 0
        && set.len() == SET_START + 2
        && set[SET_START] + 1 == set[SET_START + 1]
}

/// The scalar a singleton blob denotes.
pub fn singleton_char(set: &[i32]) -> char {
    char::from_u32(set[SET_START] as u32).unwrap_or('\u{0}')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FoldRule {
    /// Everything in the span lowers to one constant.
    Set(u32),
    /// Lowercase is the scalar plus a constant offset.
    Add(i32),
    /// Lowercase is the scalar with its low bit set.
    Bor,
    /// Lowercase is the scalar rounded up to even-plus-one pairing
    /// (`x + (x & 1)`).
    Bad,
}

#[derive(Clone, Copy, Debug)]
struct FoldSpan {
    lo: u32,
    hi: u32,
    rule: FoldRule,
}

/// Intervals of the scalar space on which the simple lowercase mapping
/// follows one rule. Derived once from the standard library's case
/// tables; scalars that lower to themselves appear in a span only when
/// the span's rule happens to fix them (which is what lets alternating
/// upper/lower alphabets like Latin Extended-A form one `Bor` span).
static FOLD_TABLE: Lazy<Vec<FoldSpan>> = Lazy::new(build_fold_table);

fn rule_applies(rule: FoldRule, v: u32, low: u32) -> bool {
    match rule {
        FoldRule::Set(k) => low == k,
        FoldRule::Add(d) => low as i64 == v as i64 + d as i64,
        FoldRule::Bor => low == (v | 1),
        FoldRule::Bad => low == v + (v & 1),
    }
}

fn candidate_rules(v: u32, low: u32) -> Vec<FoldRule> {
    let mut rules = Vec::with_capacity(4);
    if low == (v | 1) {
        rules.push(FoldRule::Bor);
    }
    if low == v + (v & 1) {
        rules.push(FoldRule::Bad);
    }
    if low != v {
        rules.push(FoldRule::Add((low as i64 - v as i64) as i32));
    }
    rules.push(FoldRule::Set(low));
    rules
}

fn build_fold_table() -> Vec<FoldSpan> {
    struct Run {
        lo: u32,
        hi: u32,
        rules: Vec<FoldRule>,
    }

    fn flush(run: &mut Option<Run>, spans: &mut Vec<FoldSpan>) {
        if let Some(r) = run.take() {
            // Any surviving candidate is valid for every member; prefer
            // the parity rules so alternating alphabets stay one span.
            let rule = *r
                .rules
                .iter()
                .find(|rule| matches!(rule, FoldRule::Bor | FoldRule::Bad))
                .unwrap_or(&r.rules[0]);
            spans.push(FoldSpan { lo: r.lo, hi: r.hi, rule });
        }
    }

    let mut spans = Vec::new();
    let mut run: Option<Run> = None;
    for v in 0..=MAX_SCALAR {
        let ch = match char::from_u32(v) {
            Some(ch) => ch,
            None => {
                flush(&mut run, &mut spans);
                continue;
            }
        };
        let low = to_lower(ch) as u32;
        let mut extended = false;
        if let Some(r) = run.as_mut() {
            if r.hi + 1 == v {
                let keep: Vec<FoldRule> = r
                    .rules
                    .iter()
                    .copied()
                    .filter(|&rule| rule_applies(rule, v, low))
                    .collect();
                if !keep.is_empty() {
                    r.rules = keep;
                    r.hi = v;
                    extended = true;
                }
            }
        }
        if extended {
            continue;
        }
        flush(&mut run, &mut spans);
        if low != v {
            run = Some(Run { lo: v, hi: v, rules: candidate_rules(v, low) });
        }
    }
    flush(&mut run, &mut spans);
    spans
}
