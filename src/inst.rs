// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The instruction set of a compiled program.
//!
//! A program is a flat `Vec<i32>`. Each instruction is one opcode word
//! followed by zero, one or two operand words; `size` gives the total
//! width for an opcode. The high bits of the opcode word carry modifier
//! flags (`RTL`, `CI`). The `BACK`/`BACK2` flags never appear in emitted
//! code: the runner ORs them in when it pops a backtrack frame, selecting
//! the undo variant of the instruction at that code position.

/// Exact repetition of a single character: `ch`, `count`.
pub const ONEREP: i32 = 0;
/// Exact repetition of anything but one character: `ch`, `count`.
pub const NOTONEREP: i32 = 1;
/// Exact repetition of a class member: `set`, `count`.
pub const SETREP: i32 = 2;
/// Greedy repetition of a single character: `ch`, `max`.
pub const ONELOOP: i32 = 3;
/// Greedy repetition of anything but one character: `ch`, `max`.
pub const NOTONELOOP: i32 = 4;
/// Greedy repetition of a class member: `set`, `max`.
pub const SETLOOP: i32 = 5;
/// Lazy repetition of a single character: `ch`, `max`.
pub const ONELAZY: i32 = 6;
/// Lazy repetition of anything but one character: `ch`, `max`.
pub const NOTONELAZY: i32 = 7;
/// Lazy repetition of a class member: `set`, `max`.
pub const SETLAZY: i32 = 8;
/// A single character: `ch`.
pub const ONE: i32 = 9;
/// Anything but a single character: `ch`.
pub const NOTONE: i32 = 10;
/// A character-class member: `set` (string pool index).
pub const SET: i32 = 11;
/// A literal run: `str` (string pool index).
pub const MULTI: i32 = 12;
/// A backreference: `slot`.
pub const REF: i32 = 13;

/// Beginning of line (or of text, without `MULTILINE`).
pub const BOL: i32 = 14;
/// End of line.
pub const EOL: i32 = 15;
/// A word boundary.
pub const BOUNDARY: i32 = 16;
/// Not a word boundary.
pub const NONBOUNDARY: i32 = 17;
/// Beginning of the text.
pub const BEGINNING: i32 = 18;
/// The position where the search started.
pub const START: i32 = 19;
/// End of the text, or just before a final newline.
pub const ENDZ: i32 = 20;
/// End of the text.
pub const END: i32 = 21;

/// Always fails.
pub const NOTHING: i32 = 22;
/// Try the next instruction first, jump to `dest` on backtrack.
pub const LAZYBRANCH: i32 = 23;
/// Greedy quantifier tail, empty-match aware: `dest`.
pub const BRANCHMARK: i32 = 24;
/// Lazy quantifier tail, empty-match aware: `dest`.
pub const LAZYBRANCHMARK: i32 = 25;
/// Open a counted-quantifier frame with no mark: `init`.
pub const NULLCOUNT: i32 = 26;
/// Open a counted-quantifier frame marking the current position: `init`.
pub const SETCOUNT: i32 = 27;
/// Counted greedy quantifier tail: `dest`, `max`.
pub const BRANCHCOUNT: i32 = 28;
/// Counted lazy quantifier tail: `dest`, `max`.
pub const LAZYBRANCHCOUNT: i32 = 29;
/// Push a null mark on the operand stack.
pub const NULLMARK: i32 = 30;
/// Push the current position on the operand stack.
pub const SETMARK: i32 = 31;
/// Record a capture (or balancing transfer): `slot`, `balance slot`.
pub const CAPTUREMARK: i32 = 32;
/// Pop a mark and rewind the position to it.
pub const GETMARK: i32 = 33;
/// Open a lookaround frame (snapshot track and capture depths).
pub const SETJUMP: i32 = 34;
/// Unwind to the lookaround frame, roll captures back, then fail.
pub const BACKJUMP: i32 = 35;
/// Unwind to the lookaround frame, keeping captures.
pub const FOREJUMP: i32 = 36;
/// Fail unless a capture slot has matched: `slot`.
pub const TESTREF: i32 = 37;
/// Unconditional jump: `dest`.
pub const GOTO: i32 = 38;
/// Halt the machine; a match was found iff slot 0 was captured.
pub const STOP: i32 = 39;
/// An ASCII-only word boundary.
pub const ECMABOUNDARY: i32 = 40;
/// Not an ASCII-only word boundary.
pub const NONECMABOUNDARY: i32 = 41;

/// Masks off the modifier flags, leaving the primary code.
pub const MASK: i32 = 63;
/// Process the character to the left of the position, not the right.
pub const RTL: i32 = 64;
/// Runner-synthesized: the first backtracking variant of an instruction.
pub const BACK: i32 = 128;
/// Runner-synthesized: the second backtracking variant.
pub const BACK2: i32 = 256;
/// Case-insensitive: fold both sides before comparing.
pub const CI: i32 = 512;

/// The operand value meaning "unbounded" in loop budgets.
pub const INFINITE: i32 = i32::MAX;

/// Returns the total width of an instruction in code words, including
/// the opcode word itself.
pub fn size(op: i32) -> usize {
    match op & MASK {
        NOTHING | BOL | EOL | BOUNDARY | NONBOUNDARY | ECMABOUNDARY
        | NONECMABOUNDARY | BEGINNING | START | ENDZ | END | NULLMARK
        | SETMARK | GETMARK | SETJUMP | BACKJUMP | FOREJUMP | STOP => 1,
        ONE | NOTONE | SET | MULTI | REF | TESTREF | GOTO | NULLCOUNT
        | SETCOUNT | LAZYBRANCH | BRANCHMARK | LAZYBRANCHMARK => 2,
        ONEREP | NOTONEREP | SETREP | ONELOOP | NOTONELOOP | SETLOOP
        | ONELAZY | NOTONELAZY | SETLAZY | CAPTUREMARK | BRANCHCOUNT
        | LAZYBRANCHCOUNT => 3,
        _ => 1,
    }
}

/// Returns true iff executing the opcode can push a backtrack frame.
/// The writer sums these to compute a program's track reservation.
pub fn backtracks(op: i32) -> bool {
    matches!(
        op & MASK,
        ONELOOP | NOTONELOOP | SETLOOP | ONELAZY | NOTONELAZY | SETLAZY
        | LAZYBRANCH | BRANCHMARK | LAZYBRANCHMARK | NULLCOUNT | SETCOUNT
        | BRANCHCOUNT | LAZYBRANCHCOUNT | NULLMARK | SETMARK | CAPTUREMARK
        | GETMARK | SETJUMP | BACKJUMP | FOREJUMP | GOTO
    )
}

/// The mnemonic for the primary code, for disassembly.
pub fn name(op: i32) -> &'static str {
    match op & MASK {
        ONEREP => "Onerep",
        NOTONEREP => "Notonerep",
        SETREP => "Setrep",
        ONELOOP => "Oneloop",
        NOTONELOOP => "Notoneloop",
        SETLOOP => "Setloop",
        ONELAZY => "Onelazy",
        NOTONELAZY => "Notonelazy",
        SETLAZY => "Setlazy",
        ONE => "One",
        NOTONE => "Notone",
        SET => "Set",
        MULTI => "Multi",
        REF => "Ref",
        BOL => "Bol",
        EOL => "Eol",
        BOUNDARY => "Boundary",
        NONBOUNDARY => "Nonboundary",
        BEGINNING => "Beginning",
        START => "Start",
        ENDZ => "EndZ",
        END => "End",
        NOTHING => "Nothing",
        LAZYBRANCH => "Lazybranch",
        BRANCHMARK => "Branchmark",
        LAZYBRANCHMARK => "Lazybranchmark",
        NULLCOUNT => "Nullcount",
        SETCOUNT => "Setcount",
        BRANCHCOUNT => "Branchcount",
        LAZYBRANCHCOUNT => "Lazybranchcount",
        NULLMARK => "Nullmark",
        SETMARK => "Setmark",
        CAPTUREMARK => "Capturemark",
        GETMARK => "Getmark",
        SETJUMP => "Setjump",
        BACKJUMP => "Backjump",
        FOREJUMP => "Forejump",
        TESTREF => "Testref",
        GOTO => "Goto",
        STOP => "Stop",
        ECMABOUNDARY => "ECMABoundary",
        NONECMABOUNDARY => "NonECMABoundary",
        _ => "?",
    }
}

/// Renders one instruction at `pos` in `codes`, e.g. `Oneloop(Ci)('a', 4)`.
pub fn describe(codes: &[i32], pos: usize, strings: &[Vec<i32>]) -> String {
    use std::fmt::Write;

    let op = codes[pos];
    let mut out = String::new();
    out.push_str(name(op));
    if op & RTL != 0 {
        out.push_str("(Rtl)");
    }
    if op & CI != 0 {
        out.push_str("(Ci)");
    }
    let render_char = |v: i32| match char::from_u32(v as u32) {
        Some(c) if !c.is_control() => format!("{:?}", c),
        _ => format!("\\u{{{:x}}}", v),
    };
    match op & MASK {
        ONE | NOTONE => {
            let _ = write!(out, "({})", render_char(codes[pos + 1]));
        }
        ONEREP | NOTONEREP | ONELOOP | NOTONELOOP | ONELAZY | NOTONELAZY => {
            let _ = write!(
                out,
                "({}, {})",
                render_char(codes[pos + 1]),
                codes[pos + 2]
            );
        }
        SET => {
            let _ = write!(out, "(set {})", codes[pos + 1]);
        }
        SETREP | SETLOOP | SETLAZY => {
            let _ = write!(out, "(set {}, {})", codes[pos + 1], codes[pos + 2]);
        }
        MULTI => {
            let lit: String = strings[codes[pos + 1] as usize]
                .iter()
                .filter_map(|&v| char::from_u32(v as u32))
                .collect();
            let _ = write!(out, "({:?})", lit);
        }
        REF | TESTREF => {
            let _ = write!(out, "(slot {})", codes[pos + 1]);
        }
        GOTO | LAZYBRANCH | BRANCHMARK | LAZYBRANCHMARK => {
            let _ = write!(out, "(addr {})", codes[pos + 1]);
        }
        NULLCOUNT | SETCOUNT => {
            let _ = write!(out, "({})", codes[pos + 1]);
        }
        BRANCHCOUNT | LAZYBRANCHCOUNT => {
            let _ = write!(out, "(addr {}, max {})", codes[pos + 1], codes[pos + 2]);
        }
        CAPTUREMARK => {
            let _ = write!(out, "(slot {}, unslot {})", codes[pos + 1], codes[pos + 2]);
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_cover_every_opcode() {
        for op in ONEREP..=NONECMABOUNDARY {
            assert!((1..=3).contains(&size(op)), "opcode {}", op);
            assert_ne!(name(op), "?", "opcode {}", op);
        }
    }

    #[test]
    fn flags_do_not_disturb_size() {
        assert_eq!(size(SETLOOP | RTL | CI), 3);
        assert_eq!(size(ONE | CI), 2);
        assert_eq!(size(STOP), 1);
    }

    #[test]
    fn marks_backtrack() {
        assert!(backtracks(SETMARK));
        assert!(backtracks(GOTO | RTL));
        assert!(!backtracks(ONE));
        assert!(!backtracks(MULTI));
        assert!(!backtracks(STOP));
    }
}
