use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use km_survival::export::to_xlsx_bytes;
use km_survival::logrank::logrank_test;
use km_survival::{report, run, AnalysisConfig, CoxModel, Dataset, KaplanMeier, Observation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn generate_synthetic_data(n_per_arm: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(42);
    let mut rows = Vec::with_capacity(2 * n_per_arm);

    for (group, rate) in [("A", 0.08), ("B", 0.05)] {
        for _ in 0..n_per_arm {
            let time = -rng.r#gen::<f64>().ln() / rate;
            let censoring_time = rng.gen_range(3.0..36.0);
            if time < censoring_time {
                rows.push(Observation::new(group, time, true));
            } else {
                rows.push(Observation::new(group, censoring_time, false));
            }
        }
    }

    Dataset::new(rows).unwrap()
}

fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let config = AnalysisConfig::default();

    for &n in [50, 200, 1000].iter() {
        let data = generate_synthetic_data(n);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{}_per_arm", n)), &data, |b, data| {
            b.iter(|| run(black_box(&config), data.clone()).unwrap());
        });
    }
    group.finish();
}

fn benchmark_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimators");

    let data = generate_synthetic_data(500);
    let (ta, ea) = data.group_arms("A");
    let (tb, eb) = data.group_arms("B");
    let survival_data = data.encode_groups(&["A".to_string(), "B".to_string()]).unwrap();

    group.bench_function("kaplan_meier", |b| {
        b.iter(|| KaplanMeier::fit("A", black_box(&ta), black_box(&ea)).unwrap());
    });

    group.bench_function("logrank", |b| {
        b.iter(|| logrank_test(black_box(&ta), black_box(&ea), black_box(&tb), black_box(&eb)).unwrap());
    });

    group.bench_function("cox_efron", |b| {
        b.iter(|| {
            let mut model = CoxModel::new();
            model.fit(black_box(&survival_data)).unwrap();
        });
    });

    group.finish();
}

fn benchmark_presenter(c: &mut Criterion) {
    let mut group = c.benchmark_group("presenter");

    let result = run(&AnalysisConfig::default(), generate_synthetic_data(300)).unwrap();

    group.bench_function("render_svg", |b| {
        b.iter(|| report::render_svg(black_box(&result)));
    });

    group.bench_function("xlsx_export", |b| {
        b.iter(|| to_xlsx_bytes(black_box(&result.export_rows)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, benchmark_pipeline, benchmark_estimators, benchmark_presenter);
criterion_main!(benches);
