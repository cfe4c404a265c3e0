use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dspchain::nodes::{Gain, Mixer, Sine};
use dspchain::{Chain, DeviceSettings};

/// `voices` sines, each through a gain, summed by one mixer.
fn voices(voices: usize, in_place: bool) -> Chain {
    let mut chain = Chain::new(DeviceSettings::new(48_000, 64));
    let mixer = chain.add(Mixer::new(voices)).unwrap().id();
    for v in 0..voices {
        let sine = chain.add(Sine::new(110.0 * (v + 1) as f32)).unwrap().id();
        let gain = chain.add(Gain::new(0.1)).unwrap().id();
        chain.set_in_place(gain, in_place).unwrap();
        chain.connect(sine, 0, gain, 0).unwrap();
        chain.connect(gain, 0, mixer, v).unwrap();
    }
    chain.start().unwrap();
    chain
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Chain.tick()");
    for n in [1, 8, 32] {
        for in_place in [true, false] {
            let label = if in_place { "in_place" } else { "copied" };
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                let mut chain = voices(n, in_place);
                b.iter(|| {
                    chain.tick();
                    black_box(chain.blocks_processed())
                })
            });
        }
    }
    group.finish();

    c.bench_function("Chain.suspend()+resume()", |b| {
        let mut chain = voices(8, true);
        b.iter(|| {
            let prior = chain.suspend().unwrap();
            chain.resume(black_box(prior)).unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
