// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    thread,
    time::{Duration, Instant, SystemTime},
};

use serial_test::serial;

use super::*;
use crate::{
    config::SampleBits,
    flags::FlagSet,
    packet::{PacketSource, VecSource},
    tests::*,
};

fn assembler(config: RunConfig) -> (BlockAssembler, BufferPool<SampleBlock>, Arc<AssemblerStats>) {
    let config = Arc::new(config);
    let pool = block_pool(&config, 0);
    let stats = Arc::new(AssemblerStats::default());
    let assembler = BlockAssembler::new(
        config,
        0,
        pool.clone(),
        stats.clone(),
        Arc::new(AtomicCell::new(false)),
    )
    .unwrap();
    (assembler, pool, stats)
}

fn readers(
    config: &RunConfig,
    sources: Vec<Box<dyn PacketSource>>,
    stats: &Arc<AssemblerStats>,
) -> Vec<PacketReader> {
    sources
        .into_iter()
        .enumerate()
        .map(|(board, source)| {
            PacketReader::new(
                board,
                SampleBits::Sixteen,
                config.num_slots_per_board,
                source,
                stats.clone(),
            )
        })
        .collect()
}

/// Take every block from `pool` until the sentinel.
fn drain(pool: &BufferPool<SampleBlock>) -> Vec<(u64, Vec<FlagSet>)> {
    let mut blocks = vec![];
    while let Some(block) = pool.consume() {
        blocks.push((block.id.seq, block.flags.clone()));
        pool.release(block);
    }
    blocks
}

#[test]
fn test_packet_spanning_two_blocks() {
    // 2 boards with 2 subbands each; every board has a spare third slot.
    let (mut a, _pool, stats) = assembler(test_config(1, 2, 2, 64, AssemblyMode::Batch));
    assert!(a.open());

    let packet = test_packet(1, 3, 56);
    assert_eq!(a.write_packet(&packet), WriteOutcome::Written);

    let current = a.ring[0].as_ref().unwrap();
    let next = a.ring[1].as_ref().unwrap();
    assert_eq!(current.flags[0], FlagSet::new());
    assert_eq!(current.flags[1], FlagSet::new());
    assert_eq!(current.flags[2].ranges(), &[56..64]);
    assert_eq!(current.flags[3].ranges(), &[56..64]);
    assert_eq!(next.flags[2].ranges(), &[0..8]);
    assert_eq!(next.flags[3].ranges(), &[0..8]);
    assert_eq!(next.flags[0], FlagSet::new());

    assert_eq!(current.samples[(2, 56, 0)], test_sample(1, 0, 56, 0));
    assert_eq!(current.samples[(3, 63, 1)], test_sample(1, 1, 63, 1));
    assert_eq!(next.samples[(3, 0, 1)], test_sample(1, 1, 64, 1));
    assert_eq!(next.samples[(2, 7, 0)], test_sample(1, 0, 71, 0));

    // The spare slot is dropped.
    let counts = stats.counts();
    assert_eq!(counts.packets_written, 1);
    assert_eq!(counts.samples_copied, 2 * 16);
}

#[test]
fn test_writes_only_touch_the_copied_range() {
    let (mut a, _pool, _) = assembler(test_config(1, 1, 1, 128, AssemblyMode::Batch));
    assert!(a.open());
    for t in [32, 16, 96, 48] {
        a.write_packet(&test_packet(0, 1, t));
    }
    let current = a.ring[0].as_ref().unwrap();
    assert_eq!(current.flags[0].ranges(), &[16..64, 96..112]);
    assert_eq!(current.num_present(), 64);
    assert!(current.flags[0].count() <= current.len());
    assert!(a.ring[1].as_ref().unwrap().is_empty());
}

#[test]
fn test_late_and_future_packets() {
    let (mut a, pool, stats) = assembler(test_config(1, 1, 1, 64, AssemblyMode::Batch));
    assert!(a.open());
    assert!(a.advance());
    assert!(a.advance());
    assert_eq!(a.current_seq(), 2);

    // Two blocks in the past.
    assert_eq!(a.write_packet(&test_packet(0, 1, 0)), WriteOutcome::Late);
    assert_eq!(stats.counts().late_packets, 1);
    // Ends exactly where the window starts.
    assert_eq!(a.write_packet(&test_packet(0, 1, 112)), WriteOutcome::Late);
    assert_eq!(stats.counts().late_packets, 2);
    // Starts exactly where the window ends.
    assert_eq!(a.write_packet(&test_packet(0, 1, 256)), WriteOutcome::Future);
    assert_eq!(stats.counts().future_packets, 1);

    for block in a.ring.iter().flatten() {
        assert!(block.is_empty());
    }
    assert_eq!(stats.counts().packets_written, 0);

    // Only the two advanced blocks were emitted.
    assert_eq!(pool.num_filled(), 2);
    assert_eq!(stats.counts().blocks_emitted, 2);
}

#[test]
fn test_packets_after_stop_are_dropped_silently() {
    let mut config = test_config(1, 1, 1, 64, AssemblyMode::Batch);
    config.stop_sample = Some(100);
    let (mut a, _pool, stats) = assembler(config);
    assert!(a.open());

    assert_eq!(a.write_packet(&test_packet(0, 1, 100)), WriteOutcome::AfterStop);
    // Straddles the stop.
    assert_eq!(a.write_packet(&test_packet(0, 1, 96)), WriteOutcome::Written);
    assert_eq!(a.ring[1].as_ref().unwrap().flags[0].ranges(), &[32..36]);

    let counts = stats.counts();
    assert_eq!(counts.future_packets, 0);
    assert_eq!(counts.late_packets, 0);
    assert_eq!(counts.samples_copied, 4);
}

#[test]
fn test_finish_emits_up_to_the_last_block_with_data() {
    let (mut a, pool, _) = assembler(test_config(1, 1, 1, 64, AssemblyMode::Batch));
    assert!(a.open());
    a.write_packet(&test_packet(0, 1, 64));
    a.finish();
    let blocks = drain(&pool);
    // Block 0 has no data but precedes one that does.
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].0, 0);
    assert!(blocks[0].1[0].is_empty());
    assert_eq!(blocks[1].1[0].ranges(), &[0..16]);

    let (mut a, pool, _) = assembler(test_config(1, 1, 1, 64, AssemblyMode::Batch));
    assert!(a.open());
    a.finish();
    assert!(drain(&pool).is_empty());
}

#[test]
fn test_batch_interleaved_boards() {
    let mut config = test_config(1, 2, 1, 64, AssemblyMode::Batch);
    config.stop_sample = Some(320);
    let (a, pool, stats) = assembler(config.clone());

    // Board 1 is offset by half a packet.
    let sources: Vec<Box<dyn PacketSource>> = vec![
        Box::new(VecSource::new(&test_packets(0, 2, 0, 320))),
        Box::new(VecSource::new(&test_packets(1, 2, 8, 328))),
    ];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();

    let seqs: Vec<u64> = blocks.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(blocks[0].1[0].ranges(), &[0..64]);
    assert_eq!(blocks[0].1[1].ranges(), &[8..64]);
    for (_, flags) in &blocks[1..] {
        assert_eq!(flags[0].ranges(), &[0..64]);
        assert_eq!(flags[1].ranges(), &[0..64]);
    }
    assert_eq!(counts.blocks_emitted, 5);
    assert_eq!(counts.late_packets, 0);
    assert_eq!(counts.future_packets, 0);
    assert_eq!(counts.packets_written, 40);
}

#[test]
fn test_batch_gap_still_emits_empty_blocks() {
    let config = test_config(1, 1, 1, 64, AssemblyMode::Batch);
    let (a, pool, stats) = assembler(config.clone());
    let mut packets = test_packets(0, 1, 0, 64);
    packets.extend(test_packets(0, 1, 192, 256));
    let readers = readers(&config, vec![Box::new(VecSource::new(&packets))], &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    handle.join().unwrap();

    let seqs: Vec<u64> = blocks.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    assert!(blocks[1].1[0].is_empty());
    assert!(blocks[2].1[0].is_empty());
    assert_eq!(blocks[3].1[0].ranges(), &[0..64]);
}

#[test]
fn test_batch_silent_board() {
    let mut config = test_config(1, 2, 1, 64, AssemblyMode::Batch);
    config.stop_sample = Some(64);
    let (a, pool, stats) = assembler(config.clone());
    let sources: Vec<Box<dyn PacketSource>> = vec![
        Box::new(VecSource::new(&test_packets(0, 2, 0, 64))),
        Box::new(VecSource::default()),
    ];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    handle.join().unwrap();

    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].1[0].ranges(), &[0..64]);
    assert!(blocks[0].1[1].is_empty());
}

#[test]
fn test_batch_stop_keeps_packets_already_read() {
    let config = Arc::new(test_config(1, 2, 1, 64, AssemblyMode::Batch));
    let pool = block_pool(&config, 0);
    let stats = Arc::new(AssemblerStats::default());
    let stop = Arc::new(AtomicCell::new(false));
    let a = BlockAssembler::new(config.clone(), 0, pool.clone(), stats.clone(), stop.clone())
        .unwrap();
    // Board 0 stalls after its last packet while board 1's last packet is
    // still waiting to be written.
    let sources: Vec<Box<dyn PacketSource>> = vec![
        Box::new(VecSource::new(&test_packets(0, 2, 0, 48)).stall_at_end()),
        Box::new(VecSource::new(&test_packets(1, 2, 0, 48)).stall_at_end()),
    ];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));

    thread::sleep(Duration::from_millis(200));
    stop.store(true);
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].1[0].ranges(), &[0..48]);
    assert_eq!(blocks[0].1[1].ranges(), &[0..48]);
    assert_eq!(counts.packets_written, 6);
}

#[test]
#[serial]
fn test_real_time_deadline_with_missing_packets() {
    let mut config = test_config(1, 2, 1, 100, AssemblyMode::RealTime);
    config.stop_sample = Some(100);
    let (a, pool, stats) = assembler(config.clone());
    // Block 0 ends 100 ms from now.
    let a = a.with_clock(SampleClock::with_origin(1_000.0, SystemTime::now()));

    // Board 1 only ever delivers the first half of the block, then goes quiet.
    let sources: Vec<Box<dyn PacketSource>> = vec![
        Box::new(VecSource::new(&test_packets(0, 2, 0, 100))),
        Box::new(VecSource::new(&test_packets(1, 2, 0, 48)).stall_at_end()),
    ];
    let readers = readers(&config, sources, &stats);
    let start = Instant::now();
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].1[0].ranges(), &[0..100]);
    assert_eq!(blocks[0].1[1].ranges(), &[0..48]);
    assert_eq!(counts.deadline_misses, 1);
    assert_eq!(counts.blocks_emitted, 1);
}

#[test]
#[serial]
fn test_real_time_emits_early_when_every_board_has_moved_on() {
    let config = test_config(1, 2, 1, 1000, AssemblyMode::RealTime);
    let (a, pool, stats) = assembler(config.clone());
    // No deadline will pass during this test.
    let a = a.with_clock(SampleClock::with_origin(
        1_000.0,
        SystemTime::now() + Duration::from_secs(3600),
    ));
    // Paced, so that neither board gets a whole block ahead of the other.
    let sources: Vec<Box<dyn PacketSource>> = vec![
        Box::new(
            VecSource::new(&test_packets(0, 2, 0, 3004)).with_interval(Duration::from_millis(1)),
        ),
        Box::new(
            VecSource::new(&test_packets(1, 2, 0, 3004)).with_interval(Duration::from_millis(1)),
        ),
    ];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();

    let seqs: Vec<u64> = blocks.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    for (_, flags) in &blocks[..3] {
        assert_eq!(flags[0].ranges(), &[0..1000]);
        assert_eq!(flags[1].ranges(), &[0..1000]);
    }
    assert_eq!(blocks[3].1[0].ranges(), &[0..8]);
    assert_eq!(counts.deadline_misses, 0);
    assert_eq!(counts.future_packets, 0);
}

#[test]
#[serial]
fn test_real_time_stray_packets_dont_close_blocks() {
    let mut config = test_config(1, 1, 1, 96, AssemblyMode::RealTime);
    let (a, pool, stats) = assembler(config.clone());
    let a = a.with_clock(SampleClock::with_origin(
        1_000.0,
        SystemTime::now() + Duration::from_secs(3600),
    ));
    // One packet far beyond the open blocks in the middle of the stream.
    let packets: Vec<Packet> = test_packets(0, 2, 0, 48)
        .into_iter()
        .chain([test_packet(0, 2, 1000)])
        .chain(test_packets(0, 2, 48, 192))
        .collect();
    let sources: Vec<Box<dyn PacketSource>> = vec![Box::new(VecSource::new(&packets))];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].1[0].ranges(), &[0..96]);
    assert_eq!(blocks[1].1[0].ranges(), &[0..96]);
    assert_eq!(counts.future_packets, 1);
    assert_eq!(counts.late_packets, 0);
    assert_eq!(counts.deadline_misses, 0);

    // A packet after the stop doesn't close the block before it either.
    config.stop_sample = Some(192);
    let (a, pool, stats) = assembler(config.clone());
    let a = a.with_clock(SampleClock::with_origin(
        1_000.0,
        SystemTime::now() + Duration::from_secs(3600),
    ));
    let sources: Vec<Box<dyn PacketSource>> = vec![Box::new(VecSource::new(&packets))];
    let readers = self::readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));
    let blocks = drain(&pool);
    let counts = handle.join().unwrap();

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].1[0].ranges(), &[0..96]);
    assert_eq!(blocks[1].1[0].ranges(), &[0..96]);
    assert_eq!(counts.late_packets, 0);
}

#[test]
#[serial]
fn test_real_time_stop() {
    let config = test_config(1, 1, 1, 100, AssemblyMode::RealTime);
    let config = Arc::new(config);
    let pool = block_pool(&config, 0);
    let stats = Arc::new(AssemblerStats::default());
    let stop = Arc::new(AtomicCell::new(false));
    let a = BlockAssembler::new(config.clone(), 0, pool.clone(), stats.clone(), stop.clone())
        .unwrap()
        .with_clock(SampleClock::with_origin(
            1_000.0,
            SystemTime::now() + Duration::from_secs(3600),
        ));
    let sources: Vec<Box<dyn PacketSource>> =
        vec![Box::new(VecSource::new(&test_packets(0, 2, 0, 32)).stall_at_end())];
    let readers = readers(&config, sources, &stats);
    let handle = thread::spawn(move || a.run(readers));

    thread::sleep(Duration::from_millis(200));
    stop.store(true);
    let blocks = drain(&pool);
    handle.join().unwrap();
    // The partial block is still delivered.
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].1[0].ranges(), &[0..32]);
}

#[test]
fn test_sample_clock() {
    let origin = SystemTime::now();
    let clock = SampleClock::with_origin(1_000.0, origin);
    assert_eq!(
        clock.system_time_of(1500),
        origin + Duration::from_millis(1500)
    );
    let soon = clock.instant_of(500);
    let expected = Instant::now() + Duration::from_millis(500);
    let diff = if soon > expected {
        soon - expected
    } else {
        expected - soon
    };
    assert!(diff < Duration::from_millis(50), "{diff:?}");
    // Samples long gone are in the past, not a panic.
    let clock = SampleClock::new(1_000.0);
    assert!(clock.instant_of(0) <= Instant::now());
    assert!(clock.now() > 0);
}
