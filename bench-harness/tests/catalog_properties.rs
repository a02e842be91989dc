//! Property-based tests for catalog assembly using proptest

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

use bench_harness::cases::{normalized_name, TestCase, ToolDefinition};
use bench_harness::catalog::validate::duplicate_names;
use bench_harness::catalog::{apply_floor, CatalogAssembler, ToolLibrary};
use bench_harness::config::{CatalogConfig, SizeRule, SizeRuleKind};

fn named(prefix: &str, n: usize) -> Vec<ToolDefinition> {
    (0..n).map(|i| ToolDefinition::new(format!("{}_{}", prefix, i), "")).collect()
}

/// Tool names drawn from a small alphabet so that `.` and `_` spellings clash
fn arb_tools(max: usize) -> impl Strategy<Value = Vec<ToolDefinition>> {
    prop::collection::vec("[a-c]{1,2}[._][0-9]{1,2}", 0..max)
        .prop_map(|names| names.into_iter().map(|n| ToolDefinition::new(n, "")).collect())
}

fn cap_config(cap: usize) -> CatalogConfig {
    CatalogConfig {
        size_rules: vec![SizeRule {
            marker: "_128tools".to_string(),
            kind: SizeRuleKind::Cap,
            size: cap,
        }],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn cap_bounds_size_and_keeps_originals(
        n_orig in 1usize..20,
        n_noise in 0usize..300,
        cap in 1usize..160,
        seed in any::<u64>(),
    ) {
        let mut collections = HashMap::new();
        collections.insert("Orig".to_string(), named("orig", n_orig));
        collections.insert("Noise".to_string(), named("noise", n_noise));
        let library = ToolLibrary::new(collections, Vec::new());
        let config = cap_config(cap);

        let mut case = TestCase::new("multi_turn_base_128tools_0", "q")
            .with_involved_classes(["Noise", "Orig"]);
        case.involved_classes_original = vec!["Orig".to_string()];

        let out = CatalogAssembler::new(&library, &config)
            .assemble(&case, &mut StdRng::seed_from_u64(seed))
            .unwrap();

        prop_assert!(out.function.len() <= cap.max(n_orig));
        if n_orig <= cap {
            prop_assert_eq!(out.function.len(), cap.min(n_orig + n_noise));
        }
        let names: HashSet<&str> = out.function.iter().map(|t| t.name.as_str()).collect();
        for i in 0..n_orig {
            let orig = format!("orig_{}", i);
            prop_assert!(names.contains(orig.as_str()));
        }
        prop_assert!(duplicate_names(&out.function).is_empty());
    }

    #[test]
    fn floor_is_exact_and_unique(
        base in arb_tools(60),
        pool in arb_tools(200),
        target in 1usize..80,
        seed in any::<u64>(),
    ) {
        let available: HashSet<String> = base
            .iter()
            .chain(pool.iter())
            .map(|t| normalized_name(&t.name))
            .collect();

        let mut tools = base.clone();
        apply_floor(&mut tools, target, &pool, &mut StdRng::seed_from_u64(seed));

        prop_assert!(duplicate_names(&tools).is_empty());
        let base_unique: HashSet<String> = base.iter().map(|t| normalized_name(&t.name)).collect();
        if base_unique.len() >= target {
            prop_assert_eq!(tools.len(), target);
        } else {
            prop_assert_eq!(tools.len(), target.min(available.len()));
        }
    }

    #[test]
    fn assembly_never_mutates_the_corpus_record(seed in any::<u64>()) {
        let mut collections = HashMap::new();
        collections.insert("Noise".to_string(), named("noise", 40));
        let library = ToolLibrary::new(collections, Vec::new());
        let config = cap_config(10);

        let case = TestCase::new("multi_turn_base_128tools_0", "q").with_involved_classes(["Noise"]);
        let before = case.clone();
        let out = CatalogAssembler::new(&library, &config)
            .assemble(&case, &mut StdRng::seed_from_u64(seed))
            .unwrap();

        prop_assert_eq!(&case, &before);
        prop_assert_eq!(out.function.len(), 10);
    }
}
