//! Benchmarks for expression compilation, evaluation and stepping

use std::collections::HashMap;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use hybrid_pn::config::SimulationConfig;
use hybrid_pn::engine::Simulation;
use hybrid_pn::expr::CompiledExpr;
use hybrid_pn::net::{Arc, Net, Place, Transition};

const RATE: &str = "k1 * hill(S, km, 2) - k2 * michaelis_menten(P, vmax, km) + min(t, 5) ** 0.5";

fn bindings() -> HashMap<String, f64> {
    [
        ("k1", 0.8),
        ("k2", 0.1),
        ("km", 2.5),
        ("vmax", 4.0),
        ("S", 12.0),
        ("P", 3.0),
        ("t", 1.5),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("expr_compile", |b| {
        b.iter(|| CompiledExpr::compile(black_box(RATE)))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let expr = CompiledExpr::compile(RATE).unwrap();
    let scope = bindings();

    c.bench_function("expr_evaluate", |b| {
        b.iter(|| expr.evaluate_number(black_box(&scope)))
    });
}

fn bench_guard(c: &mut Criterion) {
    let guard = CompiledExpr::compile("S >= 10 and not (P > 5 or t < 1)").unwrap();
    let scope = bindings();

    c.bench_function("guard_evaluate", |b| {
        b.iter(|| guard.evaluate_bool(black_box(&scope)))
    });
}

fn bench_step(c: &mut Criterion) {
    let mut net = Net::empty();
    let s = net.add_place(Place::continuous("S", 1e9)).unwrap();
    let p = net.add_place(Place::continuous("P", 0.0)).unwrap();
    let t = net
        .add_transition(Transition::continuous("Convert", "michaelis_menten(S, 4, 2.5)"))
        .unwrap();
    net.add_arc(Arc::input(s, t, 1.0)).unwrap();
    net.add_arc(Arc::output(p, t, 1.0)).unwrap();

    let config = SimulationConfig {
        dt: 0.01,
        max_steps: None,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(net, config).unwrap();

    c.bench_function("simulation_step", |b| b.iter(|| black_box(sim.step())));
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_guard, bench_step);
criterion_main!(benches);
