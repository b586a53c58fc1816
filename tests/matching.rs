// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::time::Duration;

use retrack::charclass::CharClass;
use retrack::syntax::{Node, UNBOUNDED};
use retrack::{
    compile, compile_with_hints, Anchors, Error, Hints, LiteralPrefix, Match,
    Options, Program,
};

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn find(p: &Program, s: &str) -> Option<Match> {
    p.find(&chars(s), 0, None).unwrap()
}

fn digit_class(ecma: bool) -> Vec<i32> {
    let mut c = CharClass::new();
    c.add_digit(ecma, false);
    c.into_blob()
}

fn word_class() -> Vec<i32> {
    let mut c = CharClass::new();
    c.add_word(false, false);
    c.into_blob()
}

fn space_class() -> Vec<i32> {
    let mut c = CharClass::new();
    c.add_space(false, false);
    c.into_blob()
}

#[test]
fn plus_with_capture() {
    // (a+)b against "aaab"
    let tree = Node::concat(vec![
        Node::capture(1, Node::one_loop('a', 1, UNBOUNDED)),
        Node::one('b'),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "aaab").unwrap();
    assert_eq!(m.as_range(), 0..4);
    assert_eq!(m.group(1).unwrap().as_range(), 0..3);
}

#[test]
fn anchored_named_digits() {
    // ^(?<num>\d+)$ with the ECMA digit interpretation, against "12345"
    let tree = Node::concat(vec![
        Node::beginning(),
        Node::named_capture(1, "num", Node::set_loop(digit_class(true), 1, UNBOUNDED)),
        Node::end_z(),
    ]);
    let p = compile(&tree, Options::ECMASCRIPT).unwrap();
    let m = find(&p, "12345").unwrap();
    assert_eq!(m.as_range(), 0..5);
    let slot = p.slot_of_name("num").unwrap();
    assert_eq!(m.group(slot).unwrap().as_range(), 0..5);
    assert!(find(&p, "123a5").is_none());
}

#[test]
fn lazy_dot_stops_early() {
    // a.*?b against "a xx b yy b"
    let tree = Node::concat(vec![
        Node::one('a'),
        Node::notone_lazy('\n', 0, UNBOUNDED),
        Node::one('b'),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "a xx b yy b").unwrap();
    assert_eq!(m.as_range(), 0..6);
}

#[test]
fn lookahead_is_zero_width() {
    // (?=abc)\w+ against "abcdef"
    let tree = Node::concat(vec![
        Node::require(Node::literal("abc")),
        Node::set_loop(word_class(), 1, UNBOUNDED),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "abcdef").unwrap();
    assert_eq!(m.as_range(), 0..6);
    assert!(find(&p, "abxdef").is_none());
}

#[test]
fn backreference_repeats_capture() {
    // (\w+)\s\1 against "hello hello"
    let tree = Node::concat(vec![
        Node::capture(1, Node::set_loop(word_class(), 1, UNBOUNDED)),
        Node::set(space_class()),
        Node::reference(1),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "hello hello").unwrap();
    assert_eq!(m.as_range(), 0..11);
    assert_eq!(m.group(1).unwrap().as_range(), 0..5);
    assert!(find(&p, "hello world").is_none());
}

#[test]
fn empty_match_then_progress() {
    // a* against "": one empty match, then the chain ends.
    let p = compile(&Node::one_loop('a', 0, UNBOUNDED), Options::empty()).unwrap();
    let text = chars("");
    let m = p.find(&text, 0, None).unwrap().unwrap();
    assert_eq!(m.as_range(), 0..0);
    assert!(p.find_next(&text, &m, None).unwrap().is_none());
}

#[test]
fn chained_matches_always_advance() {
    let p = compile(&Node::one_loop('a', 0, UNBOUNDED), Options::empty()).unwrap();
    let text = chars("aabxa");
    let mut ranges = Vec::new();
    let mut m = p.find(&text, 0, None).unwrap();
    while let Some(cur) = m {
        ranges.push(cur.as_range());
        m = p.find_next(&text, &cur, None).unwrap();
    }
    assert_eq!(ranges, vec![0..2, 2..2, 3..3, 4..5, 5..5]);
}

#[test]
fn empty_pattern_on_empty_input() {
    let p = compile(&Node::empty(), Options::empty()).unwrap();
    let m = find(&p, "").unwrap();
    assert_eq!(m.as_range(), 0..0);
}

#[test]
fn beginning_anchor_fails_fast_with_hints() {
    let tree = Node::concat(vec![Node::beginning(), Node::literal("ab")]);
    let hints = Hints { anchors: Anchors::BEGINNING, ..Hints::default() };
    let p = compile_with_hints(&tree, Options::empty(), hints).unwrap();

    let text = chars("xxab");
    assert!(p.find(&text, 2, None).unwrap().is_none());
    let m = find(&p, "abxx").unwrap();
    assert_eq!(m.as_range(), 0..2);
}

#[test]
fn right_to_left_on_empty_input() {
    let p = compile(&Node::one_loop('a', 0, UNBOUNDED), Options::RIGHT_TO_LEFT)
        .unwrap();
    let m = find(&p, "").unwrap();
    assert_eq!(m.as_range(), 0..0);
}

#[test]
fn right_to_left_finds_rightmost_first() {
    let p = compile(&Node::literal("ab"), Options::RIGHT_TO_LEFT).unwrap();
    let text = chars("ab ab");
    let m = p.find(&text, text.len(), None).unwrap().unwrap();
    assert_eq!(m.as_range(), 3..5);
    let m2 = p.find_next(&text, &m, None).unwrap().unwrap();
    assert_eq!(m2.as_range(), 0..2);
    assert!(p.find_next(&text, &m2, None).unwrap().is_none());
}

#[test]
fn nested_star_over_empty_body_terminates() {
    // (a*)* against "aaa": must terminate and match everything.
    let tree = Node::repeat(
        0,
        UNBOUNDED,
        Node::capture(1, Node::one_loop('a', 0, UNBOUNDED)),
    );
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "aaa").unwrap();
    assert_eq!(m.as_range(), 0..3);
    // The body matched "aaa", then once more emptily.
    assert_eq!(m.captures(1).len(), 2);
    assert_eq!(m.captures(1)[0].as_range(), 0..3);
    assert_eq!(m.group(1).unwrap().as_range(), 3..3);
}

#[test]
fn balancing_needs_a_matched_group() {
    // (a)?(?<-1>c): the balancing mark fails when group 1 never matched.
    let tree = Node::concat(vec![
        Node::repeat(0, 1, Node::capture(1, Node::one('a'))),
        Node::balance_capture(-1, 1, Node::one('c')),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    assert!(find(&p, "c").is_none());
    let m = find(&p, "ac").unwrap();
    assert_eq!(m.as_range(), 0..2);
    // The balance consumed group 1's capture.
    assert_eq!(m.group(1), None);
}

#[test]
fn balanced_transfer_records_between_span() {
    // (o)(?<2-1>c) against "oc": slot 2 gets the span between the end of
    // group 1 and the start of the balancing body.
    let tree = Node::concat(vec![
        Node::capture(1, Node::one('o')),
        Node::balance_capture(2, 1, Node::one('c')),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "oc").unwrap();
    assert_eq!(m.as_range(), 0..2);
    assert_eq!(m.group(1), None);
    let g2 = m.group(2).unwrap();
    assert_eq!((g2.start, g2.len), (1, 0));
}

#[test]
fn lookbehind_via_rtl_body() {
    // (?<=ab)c against "abc": the lookaround body consumes leftward.
    let tree = Node::concat(vec![
        Node::require(Node::literal("ab").with_options(Options::RIGHT_TO_LEFT)),
        Node::one('c'),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "abc").unwrap();
    assert_eq!(m.as_range(), 2..3);
    assert!(find(&p, "xbc").is_none());
}

#[test]
fn negative_lookahead() {
    // a(?!b) against "ab ac"
    let tree = Node::concat(vec![Node::one('a'), Node::prevent(Node::one('b'))]);
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "ab ac").unwrap();
    assert_eq!(m.as_range(), 3..4);
}

#[test]
fn atomic_group_commits() {
    // a(?>b*)b can never match: the atomic group will not give a 'b' back.
    let atomic = Node::concat(vec![
        Node::one('a'),
        Node::atomic(Node::one_loop('b', 0, UNBOUNDED)),
        Node::one('b'),
    ]);
    let p = compile(&atomic, Options::empty()).unwrap();
    assert!(find(&p, "abbb").is_none());

    // The non-atomic version backtracks one 'b' out of the loop.
    let plain = Node::concat(vec![
        Node::one('a'),
        Node::one_loop('b', 0, UNBOUNDED),
        Node::one('b'),
    ]);
    let p = compile(&plain, Options::empty()).unwrap();
    assert_eq!(find(&p, "abbb").unwrap().as_range(), 0..4);
}

#[test]
fn conditional_on_capture() {
    // (a)?(?(1)b|c)
    let tree = Node::concat(vec![
        Node::repeat(0, 1, Node::capture(1, Node::one('a'))),
        Node::testref(1, Node::one('b'), Some(Node::one('c'))),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    assert_eq!(find(&p, "ab").unwrap().as_range(), 0..2);
    assert_eq!(find(&p, "c").unwrap().as_range(), 0..1);
    assert!(find(&p, "b").is_none());
}

#[test]
fn conditional_on_expression() {
    // (?(\d)\d+|\w+): digit-led inputs take the digit branch.
    let tree = Node::testgroup(
        Node::set(digit_class(false)),
        Node::set_loop(digit_class(false), 1, UNBOUNDED),
        Some(Node::set_loop(word_class(), 1, UNBOUNDED)),
    );
    let p = compile(&tree, Options::empty()).unwrap();
    assert_eq!(find(&p, "123abc").unwrap().as_range(), 0..3);
    assert_eq!(find(&p, "abc123").unwrap().as_range(), 0..6);
}

#[test]
fn unmatched_backreference_is_ecma_dependent() {
    // (a)?\1b
    let tree = Node::concat(vec![
        Node::repeat(0, 1, Node::capture(1, Node::one('a'))),
        Node::reference(1),
        Node::one('b'),
    ]);
    let ecma = compile(&tree, Options::ECMASCRIPT).unwrap();
    assert_eq!(find(&ecma, "b").unwrap().as_range(), 0..1);
    let strict = compile(&tree, Options::empty()).unwrap();
    assert!(find(&strict, "b").is_none());
    // With the group matched, both behave alike.
    assert_eq!(find(&ecma, "aab").unwrap().as_range(), 0..3);
    assert_eq!(find(&strict, "aab").unwrap().as_range(), 0..3);
}

#[test]
fn case_insensitive_compare_folds_both_sides() {
    let p = compile(&Node::literal("AbC"), Options::IGNORE_CASE).unwrap();
    assert_eq!(find(&p, "xxaBcx").unwrap().as_range(), 2..5);
    assert_eq!(find(&p, "ABC").unwrap().as_range(), 0..3);
    assert!(find(&p, "ab").is_none());

    let sigma = compile(&Node::one('\u{3a3}'), Options::IGNORE_CASE).unwrap();
    assert_eq!(find(&sigma, "\u{3c3}").unwrap().as_range(), 0..1);
}

#[test]
fn word_boundaries() {
    let tree = Node::concat(vec![
        Node::boundary(),
        Node::literal("cat"),
        Node::boundary(),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    assert_eq!(find(&p, "the cat sat").unwrap().as_range(), 4..7);
    assert!(find(&p, "concatenate").is_none());
}

#[test]
fn line_anchors() {
    let tree = Node::concat(vec![Node::bol(), Node::one('b')]);
    let p = compile(&tree, Options::empty()).unwrap();
    assert_eq!(find(&p, "a\nb").unwrap().as_range(), 2..3);

    let endz = Node::concat(vec![Node::literal("ab"), Node::end_z()]);
    let p = compile(&endz, Options::empty()).unwrap();
    // EndZ tolerates exactly one trailing newline.
    assert_eq!(find(&p, "ab\n").unwrap().as_range(), 0..2);
    assert!(find(&p, "ab\nx").is_none());

    let end = Node::concat(vec![Node::literal("ab"), Node::end()]);
    let p = compile(&end, Options::empty()).unwrap();
    assert!(find(&p, "ab\n").is_none());
    assert_eq!(find(&p, "ab").unwrap().as_range(), 0..2);
}

#[test]
fn hints_only_accelerate() {
    let tree = Node::concat(vec![
        Node::literal("needle"),
        Node::set_loop(digit_class(false), 0, UNBOUNDED),
    ]);
    let plain = compile(&tree, Options::empty()).unwrap();
    let hinted = compile_with_hints(
        &tree,
        Options::empty(),
        Hints {
            prefix: Some(LiteralPrefix {
                text: "needle".to_owned(),
                case_insensitive: false,
            }),
            ..Hints::default()
        },
    )
    .unwrap();
    for text in ["hay needle42 hay", "no match here", "needle", "xneedle9"] {
        let a = find(&plain, text).map(|m| m.as_range());
        let b = find(&hinted, text).map(|m| m.as_range());
        assert_eq!(a, b, "{:?}", text);
    }
}

#[test]
fn first_chars_hint_matches_plain_results() {
    let mut fc = CharClass::new();
    fc.add_char('a');
    fc.add_char('b');
    let tree = Node::alternate(vec![Node::literal("ax"), Node::literal("bx")]);
    let plain = compile(&tree, Options::empty()).unwrap();
    let hinted = compile_with_hints(
        &tree,
        Options::empty(),
        Hints {
            first_chars: Some(retrack::FirstChars {
                set: fc.into_blob(),
                case_insensitive: false,
            }),
            ..Hints::default()
        },
    )
    .unwrap();
    for text in ["zzax", "zzbx", "zzcx", "", "bx"] {
        let a = find(&plain, text).map(|m| m.as_range());
        let b = find(&hinted, text).map(|m| m.as_range());
        assert_eq!(a, b, "{:?}", text);
    }
}

#[test]
fn search_window_is_respected() {
    let p = compile(&Node::literal("ab"), Options::empty()).unwrap();
    let text = chars("abab");
    let m = p.find_within(&text, 1, 4, 1, None).unwrap().unwrap();
    assert_eq!(m.as_range(), 2..4);
    assert!(p.find_within(&text, 1, 3, 1, None).unwrap().is_none());
}

#[test]
fn catastrophic_backtracking_times_out() {
    // (a+)+b over a long run of 'a' with no 'b'.
    let tree = Node::concat(vec![
        Node::repeat(
            1,
            UNBOUNDED,
            Node::capture(1, Node::one_loop('a', 1, UNBOUNDED)),
        ),
        Node::one('b'),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    let text = chars(&"a".repeat(40));
    let err = p.find(&text, 0, Some(Duration::from_millis(30))).unwrap_err();
    assert_eq!(err, Error::Timeout);
}

#[test]
fn repeated_group_reports_every_capture() {
    // (ab)+ against "ababab"
    let tree = Node::repeat(1, UNBOUNDED, Node::capture(1, Node::literal("ab")));
    let p = compile(&tree, Options::empty()).unwrap();
    let m = find(&p, "ababab").unwrap();
    assert_eq!(m.as_range(), 0..6);
    let spans: Vec<_> = m.captures(1).iter().map(|s| s.as_range()).collect();
    assert_eq!(spans, vec![0..2, 2..4, 4..6]);
}

#[test]
fn counted_lazy_loop_unrolls_and_backs_off() {
    // (?:ab){1,3}?c: lazy counted loop grows only as needed, and the
    // full unroll can still back off when the tail fails.
    let tree = Node::concat(vec![
        Node::repeat_lazy(1, 3, Node::group(Node::literal("ab"))),
        Node::one('c'),
    ]);
    let p = compile(&tree, Options::empty()).unwrap();
    assert_eq!(find(&p, "abc").unwrap().as_range(), 0..3);
    assert_eq!(find(&p, "ababc").unwrap().as_range(), 0..5);
    assert_eq!(find(&p, "abababc").unwrap().as_range(), 0..7);
    // Four repetitions exceed the budget.
    assert_eq!(find(&p, "ababababc").unwrap().as_range(), 2..9);
}

#[test]
fn counted_greedy_loop_honors_bounds() {
    // a{2,4} against runs of various lengths.
    let tree = Node::repeat(2, 4, Node::group(Node::one('a')));
    let p = compile(&tree, Options::empty()).unwrap();
    assert!(find(&p, "a").is_none());
    assert_eq!(find(&p, "aa").unwrap().as_range(), 0..2);
    assert_eq!(find(&p, "aaaaaa").unwrap().as_range(), 0..4);
}

#[test]
fn random_texts_uphold_the_progress_guarantee() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let p = compile(&Node::one_loop('a', 0, UNBOUNDED), Options::empty()).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..64 {
        let len = rng.gen_range(0..40);
        let text: Vec<char> =
            (0..len).map(|_| if rng.gen_bool(0.5) { 'a' } else { 'b' }).collect();
        let mut starts: Vec<usize> = Vec::new();
        let mut m = p.find(&text, 0, None).unwrap();
        let mut guard = 0;
        while let Some(cur) = m {
            starts.push(cur.start());
            guard += 1;
            assert!(guard <= len + 1, "no progress on {:?}", text);
            m = p.find_next(&text, &cur, None).unwrap();
        }
        for pair in starts.windows(2) {
            assert!(pair[0] < pair[1], "starts regressed: {:?}", starts);
        }
    }
}
