//! Property-based tests for the compiler.
//!
//! Tests the following properties:
//! - constant pool deduplication
//! - variable slot stability
//! - loop iteration counts agree with direct evaluation
//! - arithmetic agrees with direct evaluation
//! - every jump lands inside the code

mod common;

use std::collections::HashMap;

use common::{compile, jump_targets, operands, run};
use phpc::bytecode::OpCode;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_small_int() -> impl Strategy<Value = i64> {
    -100i64..100i64
}

fn arb_var_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"])
}

/// Format an integer literal; negatives go through unary minus.
fn lit(n: i64) -> String {
    if n < 0 {
        format!("(-{})", -n)
    } else {
        n.to_string()
    }
}

// =============================================================================
// Constant pool and slots
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Equal literals share one pool entry and one index.
    #[test]
    fn constant_pool_has_one_entry_per_distinct_literal(
        values in prop::collection::vec(0i64..20, 1..15)
    ) {
        let src: String = values.iter().map(|v| format!("echo {v};")).collect();
        let chunk = compile(&src);

        let mut first_seen: Vec<i64> = Vec::new();
        for v in &values {
            if !first_seen.contains(v) {
                first_seen.push(*v);
            }
        }
        prop_assert_eq!(chunk.constants.len(), first_seen.len());

        let expected: Vec<u8> = values
            .iter()
            .map(|v| first_seen.iter().position(|s| s == v).unwrap() as u8)
            .collect();
        prop_assert_eq!(operands(&chunk, OpCode::LoadConst), expected);
    }

    /// A name keeps the slot it got at its first appearance.
    #[test]
    fn variable_slots_follow_first_use(
        names in prop::collection::vec(arb_var_name(), 1..20)
    ) {
        let src: String = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("${name} = {i};"))
            .collect();
        let chunk = compile(&src);

        let mut slots: HashMap<&str, u8> = HashMap::new();
        let expected: Vec<u8> = names
            .iter()
            .map(|name| {
                let next = slots.len() as u8;
                *slots.entry(*name).or_insert(next)
            })
            .collect();
        prop_assert_eq!(operands(&chunk, OpCode::StoreVar), expected);
    }
}

// =============================================================================
// Execution against direct evaluation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A counted `for` loop runs as many times as the same loop in Rust.
    #[test]
    fn for_loop_iteration_count(start in -20i64..20, end in -20i64..40, step in 1i64..6) {
        let src = format!(
            "$n = 0; for ($i = {}; $i < {}; $i += {}) {{ $n++; }} echo $n;",
            lit(start), lit(end), step
        );
        let mut expected = 0;
        let mut i = start;
        while i < end {
            expected += 1;
            i += step;
        }
        prop_assert_eq!(run(&src), expected.to_string());
    }

    /// A `while` loop exited through `break` from a nested `if`.
    #[test]
    fn while_break_iteration_count(limit in 0i64..30, stop in 0i64..30) {
        let src = format!(
            "$n = 0; while ($n < {limit}) {{ if ($n == {stop}) {{ break; }} $n++; }} echo $n;"
        );
        let expected = limit.min(stop);
        prop_assert_eq!(run(&src), expected.to_string());
    }

    /// Nested loops: `break` in the inner loop never ends the outer one.
    #[test]
    fn nested_loop_iteration_count(outer in 0i64..8, inner in 0i64..8) {
        let src = format!(
            "$n = 0; for ($i = 0; $i < {outer}; $i++) {{ \
                $j = 0; while (1) {{ if ($j >= {inner}) {{ break; }} $j++; $n++; }} \
             }} echo $n;"
        );
        prop_assert_eq!(run(&src), (outer * inner).to_string());
    }

    #[test]
    fn arithmetic_matches_direct_evaluation(
        a in arb_small_int(),
        b in arb_small_int(),
        c in arb_small_int(),
        d in arb_small_int(),
    ) {
        let src = format!("echo {} + {} * {} - {};", lit(a), lit(b), lit(c), lit(d));
        prop_assert_eq!(run(&src), (a + b * c - d).to_string());
    }

    /// `%` and `/` truncate toward zero.
    #[test]
    fn division_matches_direct_evaluation(a in arb_small_int(), b in 1i64..50) {
        let src = format!("echo {} / {}, \",\", {} % {};", lit(a), b, lit(a), b);
        prop_assert_eq!(run(&src), format!("{},{}", a / b, a % b));
    }

    /// Every jump in a compiled `if` chain lands inside the code.
    #[test]
    fn jumps_stay_in_bounds(conditions in prop::collection::vec(any::<bool>(), 1..6)) {
        let mut src = String::new();
        for (i, cond) in conditions.iter().enumerate() {
            if i > 0 {
                src.push_str(" else");
            }
            src.push_str(&format!(" if ({cond}) {{ echo {i}; }}"));
        }
        src.push_str(" else { echo \"none\"; }");

        let chunk = compile(&src);
        for target in jump_targets(&chunk) {
            prop_assert!(target >= 0 && (target as usize) < chunk.code.len());
        }

        let expected = conditions
            .iter()
            .position(|c| *c)
            .map(|i| i.to_string())
            .unwrap_or_else(|| "none".to_string());
        prop_assert_eq!(run(&src), expected);
    }
}
