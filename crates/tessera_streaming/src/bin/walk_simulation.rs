//! # Walk Simulation
//!
//! Observers wander across a small wrap-around planet populated with
//! dogs while the cache streams regions in and out of an in-memory
//! store.
//!
//! This binary runs a complete simulation and outputs statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera_core::{
    BlockIndex, ColumnIndex, Coordinate, Entity, EntityId, EntityIdAllocator, Planet, PlanetId,
    COLUMN_SIZE,
};
use tessera_streaming::{
    ActivationTracker, EntityCache, MemoryStore, StreamingConfig, StreamingEvent,
};

const OBSERVERS: usize = 8;
const TICKS: usize = 400;
const PLANET_COLUMNS: i32 = 24;
const DOGS_PER_REGION: i32 = 2;
const MAX_STEP_BLOCKS: f32 = 4.0;

#[derive(Default)]
struct EventTally {
    loaded: u64,
    unloaded: u64,
    cancelled: u64,
    orphans: u64,
    failures: u64,
    faults: u64,
}

impl EventTally {
    fn record(&mut self, event: &StreamingEvent) {
        match event {
            StreamingEvent::Loaded { .. } => self.loaded += 1,
            StreamingEvent::Unloaded { .. } => self.unloaded += 1,
            StreamingEvent::UnloadCancelled { .. } => self.cancelled += 1,
            StreamingEvent::OrphansSaved { .. } => self.orphans += 1,
            StreamingEvent::LoadFailed { .. } | StreamingEvent::SaveFailed { .. } => {
                self.failures += 1;
            }
            StreamingEvent::Fault { .. } => self.faults += 1,
        }
    }
}

fn seed_dogs(store: &MemoryStore, planet: &Planet, ids: &EntityIdAllocator) -> u64 {
    let mut seeded = 0;
    for y in 0..PLANET_COLUMNS {
        for x in 0..PLANET_COLUMNS {
            let column = ColumnIndex::new(x, y);
            let dogs = (0..DOGS_PER_REGION)
                .map(|k| {
                    let block = BlockIndex::new(
                        x * COLUMN_SIZE + 2 + k * 5,
                        y * COLUMN_SIZE + 3 + k * 4,
                        64,
                    );
                    Entity::dog(ids.allocate(), Coordinate::at_block(planet.id(), block))
                })
                .collect::<Vec<_>>();
            seeded += dogs.len() as u64;
            store.seed(planet.region_key(column), dogs);
        }
    }
    seeded
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let planet = Planet::new(PlanetId(1), ColumnIndex::new(PLANET_COLUMNS, PLANET_COLUMNS))?;
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_micros(200));

    let ids = EntityIdAllocator::starting_at(1);
    let dogs = seed_dogs(&store, &planet, &ids);

    let config = StreamingConfig {
        idle_backoff_ms: 5,
        ..StreamingConfig::production()
    };
    let cache = EntityCache::with_config(store.clone(), config)?;
    let events = cache.events();
    let mut tally = EventTally::default();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    println!("┌─ CONFIGURATION ─────────────────────────────────────────┐");
    println!("│ Planet:        {PLANET_COLUMNS}x{PLANET_COLUMNS} columns");
    println!("│ Observers:     {OBSERVERS}");
    println!("│ Ticks:         {TICKS}");
    println!("│ Seeded dogs:   {dogs}");
    println!("└─────────────────────────────────────────────────────────┘");
    println!();

    let mut observers: Vec<(EntityId, ActivationTracker)> = Vec::with_capacity(OBSERVERS);
    for _ in 0..OBSERVERS {
        let block = BlockIndex::new(
            rng.gen_range(0..PLANET_COLUMNS * COLUMN_SIZE),
            rng.gen_range(0..PLANET_COLUMNS * COLUMN_SIZE),
            64,
        );
        let player = Entity::player(ids.allocate(), Coordinate::at_block(planet.id(), block));
        if let Some(tracker) = ActivationTracker::for_entity(&cache, planet, &player)? {
            observers.push((player.id, tracker));
        }
        cache.spawn_entity(&planet, player)?;
    }

    let start = Instant::now();
    let mut relocations = 0_u64;
    let mut peak_resident = 0_usize;

    for _ in 0..TICKS {
        for (id, tracker) in &mut observers {
            let Some(current) = cache.entity(*id) else {
                continue;
            };
            let delta = [
                rng.gen_range(-MAX_STEP_BLOCKS..MAX_STEP_BLOCKS),
                rng.gen_range(-MAX_STEP_BLOCKS..MAX_STEP_BLOCKS),
                0.0,
            ];
            let next = current.position.translate(delta);
            let moved = cache.update_entity(&planet, *id, |entity| entity.move_to(next))?;
            if let Some((_, Some(_))) = moved {
                if tracker.relocate(&cache, planet, &next)? {
                    relocations += 1;
                }
            }
        }

        peak_resident = peak_resident.max(cache.len());
        for event in events.try_iter() {
            tally.record(&event);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let settled_during_walk = cache.wait_until_settled(Duration::from_secs(30));
    let walk_time = start.elapsed();

    for (_, tracker) in observers {
        tracker.detach(&cache)?;
    }
    let settled_after_detach = cache.wait_until_settled(Duration::from_secs(30));
    cache.shutdown();
    for event in events.try_iter() {
        tally.record(&event);
    }

    let stats = cache.stats();
    println!("┌─ RESULTS ───────────────────────────────────────────────┐");
    println!("│ Walk time:            {walk_time:?}");
    println!("│ Relocations:          {relocations}");
    println!("│ Peak resident:        {peak_resident} entities");
    println!("│ Loads / saves:        {} / {}", stats.loads, stats.saves);
    println!("│ Entities loaded:      {}", stats.entities_loaded);
    println!("│ Entities evicted:     {}", stats.entities_evicted);
    println!("│ Unloads cancelled:    {}", stats.unloads_cancelled);
    println!("│ Unloads re-saved:     {}", stats.unloads_resaved);
    println!("│ Orphan regions saved: {}", stats.orphans_saved);
    println!("│ Failures:             {} load / {} save", stats.load_failures, stats.save_failures);
    println!("│ Events seen:          {} loaded, {} unloaded, {} cancelled, {} orphaned, {} failed",
        tally.loaded, tally.unloaded, tally.cancelled, tally.orphans, tally.failures);
    println!("│ Events dropped:       {}", stats.events_dropped);
    println!("│ Ledger after detach:  {} regions", cache.ledger_len());
    println!("│ Resident after:       {} entities", cache.len());
    println!("│ Store regions:        {}", store.region_count());
    println!("└─────────────────────────────────────────────────────────┘");

    let healthy = settled_during_walk && settled_after_detach && tally.faults == 0 && cache.is_empty();
    println!();
    println!("Status: {}", if healthy { "PASS ✓" } else { "FAIL ✗" });
    Ok(())
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          TESSERA - WALK SIMULATION                       ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run() {
        eprintln!("simulation failed: {e}");
        std::process::exit(1);
    }
}
