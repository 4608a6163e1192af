/* Interrupt-side cost of draining a full transmit FIFO: one transmit-complete per byte,
then the turnaround. Setup queues the burst outside the timed section. */
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use servo_link::{ChannelConfig, ChannelId, ChannelRegistry, MockLine};

use std::{hint::black_box, sync::Arc, time::Duration};

const BURST: usize = 32;

fn isr_drain_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("isr_drain");
    group.measurement_time(Duration::from_secs(2));

    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());
    let config = ChannelConfig::default_for(ChannelId::Ch1).with_capacities(BURST, 16);
    let transport = registry.bring_up(ChannelId::Ch1, config, hw.clone()).unwrap();

    group.bench_function("drain_32_and_turnaround", |b| {
        b.iter_batched(
            || {
                for i in 0..=BURST {
                    transport.send_byte(i as u8).unwrap();
                }
                hw.clear_calls();
            },
            |_| black_box(hw.complete_all()),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("echo_discard", |b| {
        transport.send_byte(0x01).unwrap();
        b.iter(|| hw.receive(black_box(0x01)));
        hw.complete_all();
    });

    group.finish();
}

criterion_group!(benches, isr_drain_bench);
criterion_main!(benches);
