// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The writer: lowers a syntax tree into a program.
//!
//! The same traversal runs twice. The counting pass tallies code words
//! and the track reservation while simulating code positions (so the
//! forward-jump patch stack sees the positions the emit pass will); the
//! emit pass fills an exactly sized buffer and patches jumps in place.
//! The whole tree is wrapped in capture slot 0 behind a `Lazybranch`
//! whose alternative is the final `Stop`: backtracking out of the
//! wrapper reaches `Stop` without capturing slot 0, which is how the
//! runner learns a start position cannot match.

use std::collections::HashMap;

use tracing::trace;

use crate::inst;
use crate::program::{bm_from_prefix, Hints, Program};
use crate::syntax::{Kind, Node};
use crate::{Error, Options};

/// Lowers a tree with no scan hints.
pub fn compile(tree: &Node, options: Options) -> Result<Program, Error> {
    compile_with_hints(tree, options, Hints::default())
}

/// Lowers a tree, attaching the hints an external prefix/anchor
/// analyzer derived for it.
pub fn compile_with_hints(
    tree: &Node,
    options: Options,
    hints: Hints,
) -> Result<Program, Error> {
    Writer::new(options).write(tree, hints)
}

struct Writer {
    options: Options,
    counting: bool,
    emitted: Vec<i32>,
    /// Simulated code position during the counting pass.
    count: usize,
    track_count: usize,
    /// Pending forward-jump positions awaiting their destinations.
    int_stack: Vec<usize>,
    strings: Vec<Vec<i32>>,
    string_table: HashMap<Vec<i32>, usize>,
    /// Source capture number to dense slot, when the numbering is sparse.
    caps: Option<HashMap<i32, i32>>,
    cap_count: usize,
    cap_names: Vec<Option<String>>,
}

impl Writer {
    fn new(options: Options) -> Writer {
        Writer {
            options,
            counting: true,
            emitted: Vec::new(),
            count: 0,
            track_count: 0,
            int_stack: Vec::new(),
            strings: Vec::new(),
            string_table: HashMap::new(),
            caps: None,
            cap_count: 0,
            cap_names: Vec::new(),
        }
    }

    fn write(mut self, tree: &Node, hints: Hints) -> Result<Program, Error> {
        self.assign_slots(tree)?;

        for pass in 0..2 {
            self.counting = pass == 0;
            self.count = 0;
            self.track_count = 0;
            self.int_stack.clear();

            self.emit1(inst::LAZYBRANCH, 0);
            self.emit(inst::SETMARK);
            self.traverse(tree)?;
            self.emit2(inst::CAPTUREMARK, 0, -1);
            let stop = self.cur_pos();
            self.patch_jump(0, stop);
            self.emit(inst::STOP);

            if self.counting {
                self.emitted = Vec::with_capacity(self.count);
            }
        }

        let right_to_left = self.options.contains(Options::RIGHT_TO_LEFT);
        trace!(
            code_words = self.emitted.len(),
            strings = self.strings.len(),
            track_reserve = self.track_count,
            captures = self.cap_count,
            "wrote program"
        );
        Ok(Program {
            codes: self.emitted,
            strings: self.strings,
            track_reserve: self.track_count,
            cap_count: self.cap_count,
            cap_map: self.caps,
            cap_names: self.cap_names,
            bm_prefix: hints
                .prefix
                .as_ref()
                .and_then(|p| bm_from_prefix(p, right_to_left)),
            fc_prefix: hints.first_chars,
            anchors: hints.anchors,
            right_to_left,
            options: self.options,
        })
    }

    /// Collects the capture numbers declared in the tree and assigns
    /// dense slots; a gap-free numbering needs no map.
    fn assign_slots(&mut self, tree: &Node) -> Result<(), Error> {
        let mut nums: Vec<i32> = vec![0];
        let mut names: Vec<(i32, String)> = Vec::new();
        let mut work = vec![tree];
        while let Some(node) = work.pop() {
            if let Kind::Capture { num, name, .. } = &node.kind {
                if *num >= 0 {
                    if !nums.contains(num) {
                        nums.push(*num);
                    }
                    if let Some(n) = name {
                        names.push((*num, n.clone()));
                    }
                }
            }
            for i in 0..node.child_count() {
                work.push(node.child(i));
            }
        }
        nums.sort_unstable();
        let cap_top = nums[nums.len() - 1] + 1;
        if nums.len() as i32 == cap_top {
            self.caps = None;
            self.cap_count = cap_top as usize;
        } else {
            let map: HashMap<i32, i32> = nums
                .iter()
                .enumerate()
                .map(|(slot, &num)| (num, slot as i32))
                .collect();
            self.caps = Some(map);
            self.cap_count = nums.len();
        }
        self.cap_names = vec![None; self.cap_count];
        for (num, name) in names {
            let slot = self.map_capnum(num)? as usize;
            if self.cap_names[slot].is_none() {
                self.cap_names[slot] = Some(name);
            }
        }
        Ok(())
    }

    fn map_capnum(&self, num: i32) -> Result<i32, Error> {
        if num == -1 {
            return Ok(-1);
        }
        match &self.caps {
            Some(map) => map
                .get(&num)
                .copied()
                .ok_or(Error::Internal("capture number not declared in tree")),
            None => {
                if (num as usize) < self.cap_count {
                    Ok(num)
                } else {
                    Err(Error::Internal("capture number not declared in tree"))
                }
            }
        }
    }

    /// Depth-first walk with an explicit stack; enter/exit emissions
    /// bracket every child the way the instruction shapes require.
    fn traverse(&mut self, tree: &Node) -> Result<(), Error> {
        let mut stack: Vec<(&Node, usize)> = Vec::new();
        let mut cur = tree;
        let mut child = 0;
        'walk: loop {
            let n = cur.child_count();
            if n == 0 {
                self.emit_leaf(cur)?;
            } else if child < n {
                self.emit_enter(cur, child)?;
                stack.push((cur, child));
                cur = cur.child(child);
                child = 0;
                continue 'walk;
            }
            loop {
                let (parent, idx) = match stack.pop() {
                    None => return Ok(()),
                    Some(frame) => frame,
                };
                self.emit_exit(parent, idx)?;
                if idx + 1 < parent.child_count() {
                    cur = parent;
                    child = idx + 1;
                    continue 'walk;
                }
                cur = parent;
                child = idx + 1;
            }
        }
    }

    /// The `RTL`/`CI` bits for a node: its own options plus the global
    /// compile options.
    fn bits(&self, node: &Node) -> i32 {
        let o = node.options.union(self.options);
        let mut b = 0;
        if o.contains(Options::IGNORE_CASE) {
            b |= inst::CI;
        }
        if o.contains(Options::RIGHT_TO_LEFT) {
            b |= inst::RTL;
        }
        b
    }

    fn emit_leaf(&mut self, node: &Node) -> Result<(), Error> {
        let bits = self.bits(node);
        match &node.kind {
            Kind::Empty | Kind::Concatenate(_) | Kind::Alternate(_) => {}
            Kind::Nothing => self.emit(inst::NOTHING),

            Kind::One(ch) => self.emit1(inst::ONE | bits, *ch as i32),
            Kind::Notone(ch) => self.emit1(inst::NOTONE | bits, *ch as i32),
            Kind::Set(blob) => {
                let idx = self.intern(blob.clone());
                self.emit1(inst::SET | bits, idx);
            }
            Kind::Multi(s) => {
                let idx = self.intern(s.chars().map(|c| c as i32).collect());
                self.emit1(inst::MULTI | bits, idx);
            }
            Kind::Ref(num) => {
                let slot = self.map_capnum(*num)?;
                self.emit1(inst::REF | bits, slot);
            }

            Kind::Oneloop { ch, min, max } => {
                self.char_loop(inst::ONELOOP, *ch, *min, *max, bits);
            }
            Kind::Onelazy { ch, min, max } => {
                self.char_loop(inst::ONELAZY, *ch, *min, *max, bits);
            }
            Kind::Notoneloop { ch, min, max } => {
                self.char_loop(inst::NOTONELOOP, *ch, *min, *max, bits);
            }
            Kind::Notonelazy { ch, min, max } => {
                self.char_loop(inst::NOTONELAZY, *ch, *min, *max, bits);
            }
            Kind::Setloop { set, min, max } => {
                let idx = self.intern(set.clone());
                self.set_loop(inst::SETLOOP, idx, *min, *max, bits);
            }
            Kind::Setlazy { set, min, max } => {
                let idx = self.intern(set.clone());
                self.set_loop(inst::SETLAZY, idx, *min, *max, bits);
            }

            Kind::Bol => self.emit(inst::BOL),
            Kind::Eol => self.emit(inst::EOL),
            Kind::Boundary => self.emit(inst::BOUNDARY),
            Kind::Nonboundary => self.emit(inst::NONBOUNDARY),
            Kind::EcmaBoundary => self.emit(inst::ECMABOUNDARY),
            Kind::NonEcmaBoundary => self.emit(inst::NONECMABOUNDARY),
            Kind::Beginning => self.emit(inst::BEGINNING),
            Kind::Start => self.emit(inst::START),
            Kind::EndZ => self.emit(inst::ENDZ),
            Kind::End => self.emit(inst::END),

            _ => return Err(Error::Internal("malformed tree: childless branch node")),
        }
        Ok(())
    }

    /// A bounded repetition lowers to an exact-count prefix for the
    /// mandatory part and a budgeted loop for the rest.
    fn char_loop(&mut self, op: i32, ch: char, min: i32, max: i32, bits: i32) {
        if min > 0 {
            let rep = match op {
                inst::NOTONELOOP | inst::NOTONELAZY => inst::NOTONEREP,
                _ => inst::ONEREP,
            };
            self.emit2(rep | bits, ch as i32, min);
        }
        if max > min {
            let budget =
                if max == inst::INFINITE { inst::INFINITE } else { max - min };
            self.emit2(op | bits, ch as i32, budget);
        }
    }

    fn set_loop(&mut self, op: i32, set_idx: i32, min: i32, max: i32, bits: i32) {
        if min > 0 {
            self.emit2(inst::SETREP | bits, set_idx, min);
        }
        if max > min {
            let budget =
                if max == inst::INFINITE { inst::INFINITE } else { max - min };
            self.emit2(op | bits, set_idx, budget);
        }
    }

    fn emit_enter(&mut self, node: &Node, child: usize) -> Result<(), Error> {
        match &node.kind {
            Kind::Alternate(branches) => {
                if child < branches.len() - 1 {
                    self.push_pos();
                    self.emit1(inst::LAZYBRANCH, 0);
                }
            }
            Kind::Testref { group, .. } => {
                if child == 0 {
                    let slot = self.map_capnum(*group)?;
                    self.emit(inst::SETJUMP);
                    self.push_pos();
                    self.emit1(inst::LAZYBRANCH, 0);
                    self.emit1(inst::TESTREF, slot);
                    self.emit(inst::FOREJUMP);
                }
            }
            Kind::Testgroup { .. } => {
                if child == 0 {
                    self.emit(inst::SETJUMP);
                    self.emit(inst::SETMARK);
                    self.push_pos();
                    self.emit1(inst::LAZYBRANCH, 0);
                }
            }
            Kind::Loop { min, max, .. } | Kind::Lazyloop { min, max, .. } => {
                let (min, max) = (*min, *max);
                if max < inst::INFINITE || min > 1 {
                    self.emit1(
                        if min == 0 { inst::NULLCOUNT } else { inst::SETCOUNT },
                        if min == 0 { 0 } else { 1 - min },
                    );
                } else {
                    self.emit(if min == 0 { inst::NULLMARK } else { inst::SETMARK });
                }
                if min == 0 {
                    self.push_pos();
                    self.emit1(inst::GOTO, 0);
                }
                self.push_pos();
            }
            Kind::Capture { .. } => self.emit(inst::SETMARK),
            Kind::Require(_) => {
                self.emit(inst::SETJUMP);
                self.emit(inst::SETMARK);
            }
            Kind::Prevent(_) => {
                self.emit(inst::SETJUMP);
                self.push_pos();
                self.emit1(inst::LAZYBRANCH, 0);
            }
            Kind::Greedy(_) => self.emit(inst::SETJUMP),
            _ => {}
        }
        Ok(())
    }

    fn emit_exit(&mut self, node: &Node, child: usize) -> Result<(), Error> {
        match &node.kind {
            Kind::Alternate(branches) => {
                if child < branches.len() - 1 {
                    let branch = self.pop_pos()?;
                    self.push_pos();
                    self.emit1(inst::GOTO, 0);
                    let cur = self.cur_pos();
                    self.patch_jump(branch, cur);
                } else {
                    // Route every branch's trailing Goto here.
                    for _ in 0..child {
                        let goto = self.pop_pos()?;
                        let cur = self.cur_pos();
                        self.patch_jump(goto, cur);
                    }
                }
            }
            Kind::Testref { no, .. } => {
                if child == 0 {
                    let branch = self.pop_pos()?;
                    self.push_pos();
                    self.emit1(inst::GOTO, 0);
                    let cur = self.cur_pos();
                    self.patch_jump(branch, cur);
                    self.emit(inst::FOREJUMP);
                    if no.is_none() {
                        let goto = self.pop_pos()?;
                        let cur = self.cur_pos();
                        self.patch_jump(goto, cur);
                    }
                } else {
                    let goto = self.pop_pos()?;
                    let cur = self.cur_pos();
                    self.patch_jump(goto, cur);
                }
            }
            Kind::Testgroup { no, .. } => match child {
                0 => {
                    self.emit(inst::GETMARK);
                    self.emit(inst::FOREJUMP);
                }
                1 => {
                    let branch = self.pop_pos()?;
                    self.push_pos();
                    self.emit1(inst::GOTO, 0);
                    let cur = self.cur_pos();
                    self.patch_jump(branch, cur);
                    // The failed-condition landing: restore the mark,
                    // unwind the lookaround frame, continue into "no".
                    self.emit(inst::GETMARK);
                    self.emit(inst::FOREJUMP);
                    if no.is_none() {
                        let goto = self.pop_pos()?;
                        let cur = self.cur_pos();
                        self.patch_jump(goto, cur);
                    }
                }
                _ => {
                    let goto = self.pop_pos()?;
                    let cur = self.cur_pos();
                    self.patch_jump(goto, cur);
                }
            },
            Kind::Loop { min, max, .. } | Kind::Lazyloop { min, max, .. } => {
                let lazy = matches!(node.kind, Kind::Lazyloop { .. });
                let (min, max) = (*min, *max);
                let tail_pos = self.cur_pos();
                let body = self.pop_pos()?;
                if max < inst::INFINITE || min > 1 {
                    let op = if lazy {
                        inst::LAZYBRANCHCOUNT
                    } else {
                        inst::BRANCHCOUNT
                    };
                    let budget =
                        if max == inst::INFINITE { inst::INFINITE } else { max - min };
                    self.emit2(op, body as i32, budget);
                } else {
                    let op = if lazy {
                        inst::LAZYBRANCHMARK
                    } else {
                        inst::BRANCHMARK
                    };
                    self.emit1(op, body as i32);
                }
                if min == 0 {
                    // The entry Goto skips the body straight to the tail.
                    let goto = self.pop_pos()?;
                    self.patch_jump(goto, tail_pos);
                }
            }
            Kind::Capture { num, balance, .. } => {
                let a = self.map_capnum(*num)?;
                let b = self.map_capnum(*balance)?;
                self.emit2(inst::CAPTUREMARK, a, b);
            }
            Kind::Require(_) => {
                self.emit(inst::GETMARK);
                self.emit(inst::FOREJUMP);
            }
            Kind::Prevent(_) => {
                self.emit(inst::BACKJUMP);
                let branch = self.pop_pos()?;
                let cur = self.cur_pos();
                self.patch_jump(branch, cur);
                self.emit(inst::FOREJUMP);
            }
            Kind::Greedy(_) => self.emit(inst::FOREJUMP),
            _ => {}
        }
        Ok(())
    }

    // -------- emission plumbing --------

    fn cur_pos(&self) -> usize {
        if self.counting {
            self.count
        } else {
            self.emitted.len()
        }
    }

    fn emit(&mut self, op: i32) {
        if inst::backtracks(op) {
            self.track_count += 1;
        }
        if self.counting {
            self.count += 1;
        } else {
            self.emitted.push(op);
        }
    }

    fn emit1(&mut self, op: i32, opnd: i32) {
        if inst::backtracks(op) {
            self.track_count += 1;
        }
        if self.counting {
            self.count += 2;
        } else {
            self.emitted.push(op);
            self.emitted.push(opnd);
        }
    }

    fn emit2(&mut self, op: i32, opnd1: i32, opnd2: i32) {
        if inst::backtracks(op) {
            self.track_count += 1;
        }
        if self.counting {
            self.count += 3;
        } else {
            self.emitted.push(op);
            self.emitted.push(opnd1);
            self.emitted.push(opnd2);
        }
    }

    fn patch_jump(&mut self, pos: usize, dest: usize) {
        if !self.counting {
            self.emitted[pos + 1] = dest as i32;
        }
    }

    fn push_pos(&mut self) {
        let pos = self.cur_pos();
        self.int_stack.push(pos);
    }

    fn pop_pos(&mut self) -> Result<usize, Error> {
        self.int_stack
            .pop()
            .ok_or(Error::Internal("writer jump stack underflow"))
    }

    fn intern(&mut self, data: Vec<i32>) -> i32 {
        if let Some(&idx) = self.string_table.get(&data) {
            return idx as i32;
        }
        let idx = self.strings.len();
        self.string_table.insert(data.clone(), idx);
        self.strings.push(data);
        idx as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::UNBOUNDED;
    use pretty_assertions::assert_eq;

    fn wrap(dump: &str) -> Vec<String> {
        dump.lines().map(|l| l.trim().to_owned()).collect()
    }

    #[test]
    fn single_char_program() {
        let p = compile(&Node::one('a'), Options::empty()).unwrap();
        assert_eq!(
            p.codes,
            vec![
                inst::LAZYBRANCH, 8,
                inst::SETMARK,
                inst::ONE, 'a' as i32,
                inst::CAPTUREMARK, 0, -1,
                inst::STOP,
            ]
        );
        assert_eq!(p.cap_count, 1);
    }

    #[test]
    fn recompilation_is_deterministic() {
        let tree = Node::concat(vec![
            Node::capture(1, Node::one_loop('a', 1, UNBOUNDED)),
            Node::set_loop(
                {
                    let mut c = crate::charclass::CharClass::new();
                    c.add_digit(false, false);
                    c.into_blob()
                },
                0,
                UNBOUNDED,
            ),
            Node::literal("xyz"),
        ]);
        let a = compile(&tree, Options::empty()).unwrap();
        let b = compile(&tree, Options::empty()).unwrap();
        assert_eq!(a.codes, b.codes);
        assert_eq!(a.strings, b.strings);
        assert_eq!(a.track_reserve, b.track_reserve);
    }

    #[test]
    fn alternation_shape() {
        let p = compile(
            &Node::alternate(vec![Node::one('a'), Node::one('b'), Node::one('c')]),
            Options::empty(),
        )
        .unwrap();
        let lines = wrap(&p.dump());
        assert_eq!(
            lines,
            vec![
                "0: Lazybranch(addr 20)",
                "2: Setmark",
                "3: Lazybranch(addr 9)",
                "5: One('a')",
                "7: Goto(addr 17)",
                "9: Lazybranch(addr 15)",
                "11: One('b')",
                "13: Goto(addr 17)",
                "15: One('c')",
                "17: Capturemark(slot 0, unslot -1)",
                "20: Stop",
            ]
        );
    }

    #[test]
    fn star_loop_shape() {
        // a* lowers to the marked-loop form with the entry jump into the
        // tail.
        let p = compile(
            &Node::repeat(0, UNBOUNDED, Node::one('a')),
            Options::empty(),
        )
        .unwrap();
        let lines = wrap(&p.dump());
        assert_eq!(
            lines,
            vec![
                "0: Lazybranch(addr 13)",
                "2: Setmark",
                "3: Nullmark",
                "4: Goto(addr 8)",
                "6: One('a')",
                "8: Branchmark(addr 6)",
                "10: Capturemark(slot 0, unslot -1)",
                "13: Stop",
            ]
        );
    }

    #[test]
    fn bounded_quantifier_uses_count_frames() {
        let p = compile(
            &Node::repeat(2, 5, Node::capture(1, Node::one('a'))),
            Options::empty(),
        )
        .unwrap();
        let d = p.dump();
        assert!(d.contains("Setcount(-1)"), "{}", d);
        assert!(d.contains("Branchcount"), "{}", d);
    }

    #[test]
    fn char_loop_splits_mandatory_prefix() {
        let p = compile(&Node::one_loop('a', 2, 7), Options::empty()).unwrap();
        let d = p.dump();
        assert!(d.contains("Onerep('a', 2)"), "{}", d);
        assert!(d.contains("Oneloop('a', 5)"), "{}", d);
    }

    #[test]
    fn global_options_fold_into_nodes() {
        let p = compile(&Node::one('A'), Options::IGNORE_CASE).unwrap();
        assert_eq!(p.codes[3], inst::ONE | inst::CI);
    }

    #[test]
    fn sparse_captures_get_a_map() {
        // Groups 1 and 5: sparse, so slots are renumbered densely.
        let tree = Node::concat(vec![
            Node::capture(1, Node::one('a')),
            Node::capture(5, Node::one('b')),
        ]);
        let p = compile(&tree, Options::empty()).unwrap();
        assert_eq!(p.cap_count, 3);
        let map = p.cap_map.as_ref().unwrap();
        assert_eq!(map[&1], 1);
        assert_eq!(map[&5], 2);
    }

    #[test]
    fn named_captures_resolve_to_slots() {
        let tree = Node::concat(vec![
            Node::named_capture(1, "word", Node::one_loop('w', 1, UNBOUNDED)),
            Node::named_capture(2, "tail", Node::one('t')),
        ]);
        let p = compile(&tree, Options::empty()).unwrap();
        assert_eq!(p.slot_of_name("word"), Some(1));
        assert_eq!(p.slot_of_name("tail"), Some(2));
        assert_eq!(p.slot_of_name("missing"), None);
    }

    #[test]
    fn undeclared_reference_is_rejected() {
        let tree = Node::concat(vec![
            Node::capture(1, Node::one('a')),
            Node::reference(3),
        ]);
        assert!(compile(&tree, Options::empty()).is_err());
    }

    #[test]
    fn identical_sets_share_a_pool_entry() {
        let blob = {
            let mut c = crate::charclass::CharClass::new();
            c.add_range('0', '9');
            c.into_blob()
        };
        let tree = Node::concat(vec![
            Node::set(blob.clone()),
            Node::one('-'),
            Node::set(blob),
        ]);
        let p = compile(&tree, Options::empty()).unwrap();
        assert_eq!(p.strings.len(), 1);
    }

    #[test]
    fn track_reserve_counts_backtracking_opcodes() {
        let p = compile(&Node::one('a'), Options::empty()).unwrap();
        // Lazybranch + Setmark + Capturemark.
        assert_eq!(p.track_reserve, 3);
    }
}
