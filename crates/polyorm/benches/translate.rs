use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use polyorm::paginate::plan_count;
use polyorm::{Dialect, Value, translate};

/// SELECT col0, col1, ... FROM t WHERE col0 = ? AND note <> 'a?b' AND col1 = ? ...
fn build_select(n: usize) -> (String, Vec<Value>) {
    let columns: Vec<String> = (0..n).map(|i| format!("col{i}")).collect();
    let filters: Vec<String> = (0..n).map(|i| format!("col{i} = ?")).collect();
    let sql = format!(
        "SELECT {} FROM t WHERE note <> 'a?b' AND {} ORDER BY col0",
        columns.join(", "),
        filters.join(" AND ")
    );
    let args = (0..n as i64).map(Value::Int).collect();
    (sql, args)
}

fn bench_translate(c: &mut Criterion) {
    for dialect in [Dialect::MySql, Dialect::Postgres, Dialect::SqlServer, Dialect::Oracle] {
        let mut group = c.benchmark_group(format!("translate/{dialect}"));
        for n in [1, 10, 100] {
            let (sql, args) = build_select(n);
            group.bench_with_input(BenchmarkId::from_parameter(n), &(sql, args), |b, (sql, args)| {
                b.iter(|| black_box(translate(dialect, sql, args.clone())));
            });
        }
        group.finish();
    }
}

fn bench_count_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("paginate/plan_count");
    let (simple, args) = build_select(10);
    group.bench_function("simple", |b| {
        b.iter(|| black_box(plan_count(Dialect::Postgres, &simple, args.clone())));
    });
    let distinct = "SELECT DISTINCT col0 FROM t WHERE col1 = ? ORDER BY col0";
    group.bench_function("wrapped", |b| {
        b.iter(|| black_box(plan_count(Dialect::Postgres, distinct, vec![Value::Int(1)])));
    });
    group.finish();
}

criterion_group!(benches, bench_translate, bench_count_rewrite);
criterion_main!(benches);
