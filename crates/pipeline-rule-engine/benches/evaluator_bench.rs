//! 规则评估性能基准测试
//!
//! 针对操作符、条件树评估和批量评分进行细粒度的性能测试。

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rule_engine::{
    BusinessRulesEngine, ConditionEvaluator, ConditionNode, Deal, EvaluationContext, Operator,
    RuleCatalog,
};
use serde_json::json;
use std::hint::black_box;

fn fixed_context() -> EvaluationContext {
    EvaluationContext::new(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap())
}

fn sample_deal(i: usize) -> Deal {
    let stages = ["Prospecting", "Discovery", "Proposal", "Negotiation", "Closed Won"];
    let name = if i % 7 == 0 { String::new() } else { format!("Deal {i}") };
    let close_date = if i % 3 == 0 { "2024-01-10" } else { "2024-09-30" };
    let account = if i % 4 == 0 { "" } else { "Acme" };
    let forecast = if i % 2 == 0 { "Commit" } else { "Pipeline" };
    let next_steps = if i % 6 == 0 { "" } else { "Follow up" };

    Deal::from_value(json!({
        "deal_id": format!("D-{i}"),
        "name": name,
        "amount": (i % 5) * 40_000,
        "probability": (i % 10) * 10,
        "stage": stages[i % stages.len()],
        "close_date": close_date,
        "last_activity_date": "2024-05-01",
        "owner_name": "Alex",
        "account_name": account,
        "forecast_category": forecast,
        "next_steps": next_steps,
    }))
    .unwrap()
}

/// 单个操作符基准
fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");
    let now = fixed_context().now();

    let amount = json!(150_000);
    let threshold = json!(100_000);
    group.bench_function("greater_than", |b| {
        b.iter(|| {
            Operator::GreaterThan.evaluate(
                black_box(Some(&amount)),
                black_box(Some(&threshold)),
                now,
            )
        })
    });

    let date = json!("2024-01-10T08:30:00Z");
    group.bench_function("is_past", |b| {
        b.iter(|| Operator::IsPast.evaluate(black_box(Some(&date)), None, now))
    });

    let days = json!(30);
    group.bench_function("older_than_days", |b| {
        b.iter(|| Operator::OlderThanDays.evaluate(black_box(Some(&date)), Some(&days), now))
    });

    let category = json!("  best case ");
    let allowed = json!(["Commit", "Best Case"]);
    group.bench_function("in", |b| {
        b.iter(|| Operator::In.evaluate(black_box(Some(&category)), Some(&allowed), now))
    });

    group.finish();
}

/// 嵌套条件树基准
fn bench_condition_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_tree");
    let ctx = fixed_context();
    let deal = sample_deal(3);

    let nested = ConditionNode::Any(vec![
        ConditionNode::All(vec![
            ConditionNode::leaf_with_value("amount", Operator::GreaterThan, 100_000),
            ConditionNode::leaf_with_value("probability", Operator::LessThan, 20),
        ]),
        ConditionNode::All(vec![
            ConditionNode::leaf_with_value(
                "forecast_category",
                Operator::In,
                json!(["Commit", "Best Case"]),
            ),
            ConditionNode::leaf("close_date", Operator::IsPast),
        ]),
    ]);

    group.bench_function("nested_any_all", |b| {
        b.iter(|| ConditionEvaluator::evaluate(black_box(&nested), black_box(&deal), &ctx))
    });

    group.finish();
}

/// 批量评分基准（内置规则目录）
fn bench_analyze_deals(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze_deals");
    let rules = RuleCatalog::builtin().unwrap().into_rules();
    let engine = BusinessRulesEngine::new(rules).unwrap();
    let now = fixed_context().now();

    for size in [10usize, 100, 1_000] {
        let deals: Vec<Deal> = (0..size).map(sample_deal).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &deals, |b, deals| {
            b.iter(|| engine.analyze_deals_at(black_box(deals), now))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_operators,
    bench_condition_tree,
    bench_analyze_deals
);
criterion_main!(benches);
