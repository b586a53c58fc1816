// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A backtracking regular expression engine.
//!
//! This crate is the matching core only: it takes an already-parsed
//! syntax tree (`syntax::Node`), lowers it into a compact instruction
//! stream (`compile`), and executes that program against a scalar slice
//! with an explicit-stack backtracking machine (`Program::find` and
//! friends). There is no pattern parser here; a front end supplies the
//! tree, and may also supply literal-prefix/first-character/anchor scan
//! hints that accelerate the search without changing its results.
//!
//! ```
//! use retrack::syntax::{Node, UNBOUNDED};
//! use retrack::{compile, Options};
//!
//! // (a+)b
//! let tree = Node::concat(vec![
//!     Node::capture(1, Node::one_loop('a', 1, UNBOUNDED)),
//!     Node::one('b'),
//! ]);
//! let program = compile(&tree, Options::empty()).unwrap();
//!
//! let text: Vec<char> = "xxaaab".chars().collect();
//! let m = program.find(&text, 0, None).unwrap().unwrap();
//! assert_eq!(m.as_range(), 2..6);
//! assert_eq!(m.group(1).unwrap().as_range(), 2..5);
//! ```
//!
//! Searches are synchronous and single-threaded; a `Program` is
//! immutable and freely shareable across threads, with every piece of
//! mutable state private to one search.

use bitflags::bitflags;
use thiserror::Error as ThisError;

mod backtrack;
mod boyer_moore;
pub mod charclass;
mod captures;
mod compile;
mod inst;
mod program;
pub mod syntax;

pub use crate::captures::{Match, Span};
pub use crate::compile::{compile, compile_with_hints};
pub use crate::program::{Anchors, FirstChars, Hints, LiteralPrefix, Program};

bitflags! {
    /// Compile options. `IGNORE_PATTERN_WHITESPACE` only affects a
    /// parser and is carried for front-end compatibility.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Options: u32 {
        /// Fold both sides of every comparison at match time.
        const IGNORE_CASE = 1 << 0;
        /// `^`/`$` match at line boundaries (a parser concern: it picks
        /// the `Bol`/`Eol` anchors instead of `Beginning`/`EndZ`).
        const MULTILINE = 1 << 1;
        /// `.` matches newline (a parser concern: it picks the
        /// any-character class).
        const SINGLELINE = 1 << 2;
        const IGNORE_PATTERN_WHITESPACE = 1 << 3;
        /// Scan and consume right-to-left.
        const RIGHT_TO_LEFT = 1 << 4;
        /// ASCII word/digit interpretation; a backreference to an
        /// unmatched group succeeds emptily.
        const ECMASCRIPT = 1 << 5;
        /// Fold case with the invariant culture (the only culture this
        /// crate implements).
        const CULTURE_INVARIANT = 1 << 6;
    }
}

/// The error kinds a search or compilation can produce. An unsuccessful
/// search is not an error; it is a `None` match.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The caller's time budget expired mid-search.
    #[error("the match timed out")]
    Timeout,
    /// An invariant of the writer or runner was violated; indicates a
    /// bug in the engine or a malformed input tree, never match failure.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
