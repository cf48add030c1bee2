use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realm_protocol::update::{
    Animation, Appearance, Direction, Entity, Position, Snapshot, TickEncoder, UpdateLimits, Viewer,
};

/// `count` players packed into a small area, each viewing the others.
#[allow(clippy::unwrap_used)]
fn crowd(count: u16) -> (Snapshot, Vec<Viewer>) {
    let mut snapshot = Snapshot::new();
    let mut viewers = Vec::with_capacity(count as usize);
    for slot in 1..=count {
        let position = Position::new(3200 + slot % 20, 3200 + (slot / 20) % 20, 0);
        snapshot
            .players
            .insert(Entity::player(slot, position, Appearance::new(slot as u64)))
            .unwrap();
        viewers.push(Viewer::new(slot, position));
    }
    for slot in 0..count {
        let position = Position::new(3195 + slot % 30, 3195 + (slot / 30) % 30, 0);
        snapshot.npcs.insert(Entity::npc(slot, 1, position)).unwrap();
    }
    (snapshot, viewers)
}

/// Dirty a share of the crowd the way a busy tick would.
#[allow(clippy::unwrap_used)]
fn churn(snapshot: &mut Snapshot, seed: u16) {
    let slots: Vec<u16> = snapshot.players.iter().map(|e| e.slot).collect();
    for slot in slots {
        let player = snapshot.players.get_mut(slot).unwrap();
        match (slot + seed) % 4 {
            0 => player.step(Direction::ALL[(slot % 8) as usize]),
            1 => player.attributes.set_animation(Animation { id: 866, delay: 0 }),
            _ => {}
        }
    }
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(20);

    for &count in &[50u16, 200, 400] {
        for &workers in &[1usize, 4] {
            group.throughput(Throughput::Elements(count as u64));
            group.bench_function(format!("players_{count}_workers_{workers}"), |b| {
                let tick = TickEncoder::new(UpdateLimits::default(), workers);
                let (mut snapshot, mut viewers) = crowd(count);
                // Fill every tracked set before measuring steady-state ticks.
                for _ in 0..count.div_ceil(15) + 1 {
                    tick.encode_tick(&mut viewers, &mut snapshot);
                }
                let mut seed = 0u16;
                b.iter_batched(
                    || {
                        seed = seed.wrapping_add(1);
                        seed
                    },
                    |seed| {
                        churn(&mut snapshot, seed);
                        tick.encode_tick(&mut viewers, &mut snapshot)
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
