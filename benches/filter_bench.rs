//! 过滤引擎性能基准测试
//!
//! 测试覆盖：
//! - 单条规则求值
//! - 不同宽度的 AND/OR 分组（短路效果）
//! - 不同数据量下的集合过滤
//! - 存储变更（整树复制发布）

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use filter_engine::{
    evaluate_ast, Combinator, EvaluationConfig, Evaluator, FilterAst, FilterGroup, FilterStore,
    GroupDraft, RuleDraft, RulePatch,
};
use serde_json::{json, Value};
use std::hint::black_box;

fn create_item(i: usize) -> Value {
    json!({
        "id": i,
        "name": format!("beer-{}", i),
        "abv": (i % 12) as f64 + 0.5,
        "style": (["ipa", "stout", "lager", "sour"][i % 4]),
        "tags": { "primary": if i % 3 == 0 { "Pale Ale" } else { "Porter" } },
        "brewed_at": format!("2024-{:02}-01", i % 12 + 1)
    })
}

fn create_items(count: usize) -> Vec<Value> {
    (0..count).map(create_item).collect()
}

/// 宽度为 n 的分组，每条规则都对 abv 做比较
fn create_wide_group(combinator: Combinator, n: usize) -> FilterAst {
    (0..n).fold(FilterGroup::new(combinator), |group, i| {
        group.with_child(
            RuleDraft::new("abv", "gte", "number")
                .value(i as f64)
                .into_rule(),
        )
    })
}

fn create_realistic_ast() -> FilterAst {
    let mut store = FilterStore::new();
    store
        .add_rule(
            RuleDraft::new("style", "in", "multiselect").value(json!(["ipa", "sour"])),
            None,
        )
        .unwrap();
    store
        .add_group(
            GroupDraft::new(Combinator::Or)
                .child(RuleDraft::new("abv", "gt", "number").value(7))
                .child(RuleDraft::new("tags.primary", "contains", "text").value("ale"))
                .child(RuleDraft::new("brewed_at", "gte", "date").value("2024-06-01")),
            None,
        )
        .unwrap();
    FilterAst::clone(&store.snapshot())
}

fn bench_single_rule(c: &mut Criterion) {
    let config = EvaluationConfig::default();
    let item = create_item(3);
    let ast = FilterAst::default().with_child(
        RuleDraft::new("tags.primary", "contains", "text")
            .value("ale")
            .into_rule(),
    );

    c.bench_function("single_contains_rule", |b| {
        b.iter(|| evaluate_ast(black_box(&item), black_box(&ast), &config))
    });
}

fn bench_group_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_width");
    let config = EvaluationConfig::default();
    let item = create_item(5);

    for width in [1, 10, 50, 100] {
        let and = create_wide_group(Combinator::And, width);
        let or = create_wide_group(Combinator::Or, width);

        group.bench_with_input(BenchmarkId::new("and", width), &and, |b, ast| {
            b.iter(|| evaluate_ast(black_box(&item), ast, &config))
        });
        group.bench_with_input(BenchmarkId::new("or", width), &or, |b, ast| {
            b.iter(|| evaluate_ast(black_box(&item), ast, &config))
        });
    }

    group.finish();
}

fn bench_filter_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_collection");
    let evaluator = Evaluator::default();
    let ast = create_realistic_ast();

    for size in [100, 1_000, 10_000] {
        let items = create_items(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| evaluator.filter(black_box(items), &ast))
        });
    }

    group.finish();
}

fn bench_store_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_mutation");

    for rules in [10, 100, 1_000] {
        let mut store = FilterStore::new();
        let mut last = String::new();
        for i in 0..rules {
            last = store
                .add_rule(RuleDraft::new("abv", "gt", "number").value(i), None)
                .unwrap();
        }

        let mut value = 0_i64;
        group.bench_function(BenchmarkId::new("update_rule", rules), |b| {
            b.iter(|| {
                value += 1;
                store.update_rule(black_box(&last), RulePatch::default().value(value))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_rule,
    bench_group_width,
    bench_filter_collection,
    bench_store_mutation
);
criterion_main!(benches);
