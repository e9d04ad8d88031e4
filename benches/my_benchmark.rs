use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use quartz::codec::{self, Encode};
use quartz::{Database, Value};
use std::hint::black_box;

fn setup_populated_db(n: usize) -> Database {
    let mut db = Database::new();
    db.execute(
        "CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT NOT NULL, age INT, active BOOL)",
    )
    .unwrap();

    let table = db.get_table_mut("users").unwrap();
    for i in 0..n {
        table
            .insert(vec![
                Value::Int(i as i64 + 1),
                Value::text(format!("user{i}")),
                Value::Int((i % 100) as i64),
                Value::Bool(i % 2 == 0),
            ])
            .unwrap();
    }
    db
}

fn bench_insert_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("Insert_SQL_Pipeline");
    group.bench_function("insert_single_row_sql", |b| {
        let mut db = Database::new();
        db.execute("CREATE TABLE tests (id SERIAL PRIMARY KEY, label TEXT)")
            .unwrap();
        b.iter(|| {
            db.execute(black_box("INSERT INTO tests (label) VALUES ('x')"))
                .unwrap();
        });
    });
    group.finish();
}

fn bench_select_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("Select_Where_Performance");

    for n in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let db = setup_populated_db(n);
            b.iter(|| {
                let res = db.query("SELECT * FROM users WHERE age = 42").unwrap();
                black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_group_by(c: &mut Criterion) {
    let mut group = c.benchmark_group("Group_By_Performance");

    for n in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let db = setup_populated_db(n);
            b.iter(|| {
                let res = db
                    .query("SELECT age, COUNT(*) AS n FROM users GROUP BY age HAVING COUNT(*) > 5 ORDER BY n DESC")
                    .unwrap();
                black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_update_performance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Update_Performance");

    for n in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter_with_setup(
                || setup_populated_db(n),
                |mut db| {
                    db.execute("UPDATE users SET age = 99 WHERE active = TRUE")
                        .unwrap();
                    black_box(db);
                },
            );
        });
    }
    group.finish();
}

fn bench_delete_performance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Delete_Performance");

    for n in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter_with_setup(
                || setup_populated_db(n),
                |mut db| {
                    db.execute("DELETE FROM users WHERE age > 90").unwrap();
                    black_box(db);
                },
            );
        });
    }
    group.finish();
}

fn bench_encode_database(c: &mut Criterion) {
    let mut group = c.benchmark_group("Encode_Performance");

    for n in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let db = setup_populated_db(n);
            b.iter(|| {
                let bytes = codec::to_bytes(&db.serialize()).unwrap();
                black_box(bytes);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_insert_sql,
    bench_select_scaling,
    bench_group_by,
    bench_update_performance,
    bench_delete_performance,
    bench_encode_database
);
criterion_main!(benches);
