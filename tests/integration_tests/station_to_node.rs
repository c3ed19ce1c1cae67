// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Whole station and node pipelines, connected in process.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use approx::assert_abs_diff_eq;

use hypercorr::{
    packet::VecSource, LocalTransport, NodePipeline, Outbox, PacketSource, StationPipeline,
};

use crate::{collect, packets, two_stations};

#[test]
fn test_blocks_flow_from_stations_to_nodes() {
    let config = two_stations();
    let transport = Arc::new(LocalTransport::for_config(&config));
    let outbox = Outbox::new(transport.clone());

    let nodes = (0..2)
        .map(|node| NodePipeline::start(config.clone(), node, transport.clone(), None).unwrap())
        .collect::<Vec<_>>();
    let collectors = nodes.iter().map(collect).collect::<Vec<_>>();

    // Station 1's board 1 (subbands 2 and 3) says nothing during block 1.
    let stations = (0..2)
        .map(|station| {
            let sources: Vec<Box<dyn PacketSource>> = (0..2)
                .map(|board| {
                    let skip = if station == 1 && board == 1 {
                        64..128
                    } else {
                        0..0
                    };
                    Box::new(VecSource::new(&packets(board, 0, 192, skip)))
                        as Box<dyn PacketSource>
                })
                .collect();
            StationPipeline::start(config.clone(), station, sources, None, outbox.clone())
                .unwrap()
        })
        .collect::<Vec<_>>();

    for station in stations {
        let report = station.join();
        assert_eq!(report.counts.blocks_emitted, 3);
        assert_eq!(report.blocks_sent, 3);
        assert_eq!(report.counts.late_packets, 0);
    }
    let outputs = collectors
        .into_iter()
        .map(|c| c.join().unwrap())
        .collect::<Vec<_>>();
    for node in nodes {
        let report = node.join();
        assert_eq!(report.blocks_received, 3);
        assert_eq!(report.blocks_correlated, 3);
    }

    let w = hypercorr::constants::WEIGHT_NORMALISATION;
    for (node, blocks) in outputs.iter().enumerate() {
        assert_eq!(blocks.len(), 3);
        for (seq, block) in blocks.iter().enumerate() {
            assert_eq!(block.id.seq, seq as u64);
            assert_eq!(block.id.begin, 64 * seq as u64);
            assert!(!block.failed);
            assert!(block.substituted.is_empty());
            for (i, sb) in block.subbands.iter().enumerate() {
                assert_eq!(sb.subband, node * 2 + i);
                // Station 0's auto-correlation is always complete.
                assert_eq!(sb.valid_samples[(0, 0)], 64);
                assert_abs_diff_eq!(sb.visibilities[(0, 0)][0].re, w, epsilon = 1e-12);

                let silent = node == 1 && seq == 1;
                for baseline in [1, 2] {
                    if silent {
                        assert_eq!(sb.valid_samples[(baseline, 0)], 0);
                        assert_eq!(sb.weights[(baseline, 0)], 0.0);
                        assert_eq!(sb.visibilities[(baseline, 0)][0].re, 0.0);
                    } else {
                        assert_eq!(sb.valid_samples[(baseline, 0)], 64);
                        // XY of 1 and conj(i).
                        assert_abs_diff_eq!(
                            sb.visibilities[(baseline, 0)][1].im,
                            -w,
                            epsilon = 1e-12
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_stop_drains_what_was_assembled() {
    let mut config = (*two_stations()).clone();
    config.stop_sample = None;
    let config = Arc::new(config);
    let transport = Arc::new(LocalTransport::for_config(&config));
    let outbox = Outbox::new(transport.clone());

    let nodes = (0..2)
        .map(|node| NodePipeline::start(config.clone(), node, transport.clone(), None).unwrap())
        .collect::<Vec<_>>();
    let collectors = nodes.iter().map(collect).collect::<Vec<_>>();

    // The boards go quiet after 2.5 blocks, without ending.
    let stations = (0..2)
        .map(|station| {
            let sources: Vec<Box<dyn PacketSource>> = (0..2)
                .map(|board| {
                    Box::new(VecSource::new(&packets(board, 0, 160, 0..0)).stall_at_end())
                        as Box<dyn PacketSource>
                })
                .collect();
            StationPipeline::start(config.clone(), station, sources, None, outbox.clone())
                .unwrap()
        })
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(300));
    let start = Instant::now();
    stations.iter().for_each(StationPipeline::stop);
    for station in stations {
        let report = station.join();
        assert_eq!(report.counts.blocks_emitted, 3);
    }
    assert!(start.elapsed() < Duration::from_secs(2));

    for (c, node) in collectors.into_iter().zip(nodes) {
        let blocks = c.join().unwrap();
        assert_eq!(blocks.len(), 3);
        // The last block is only half there.
        let last = &blocks[2].subbands[0];
        assert_eq!(last.valid_samples[(0, 0)], 32);
        assert_eq!(node.join().blocks_correlated, 3);
    }
}

#[test]
fn test_bad_indices() {
    let config = two_stations();
    let transport = Arc::new(LocalTransport::for_config(&config));
    let result = StationPipeline::start(
        config.clone(),
        2,
        vec![],
        None,
        Outbox::new(transport.clone()),
    );
    assert!(matches!(
        result,
        Err(hypercorr::PipelineError::StationOutOfRange { station: 2, .. })
    ));

    let result = NodePipeline::start(config, 5, transport, None);
    assert!(matches!(
        result,
        Err(hypercorr::PipelineError::NodeOutOfRange { node: 5, .. })
    ));
}

#[test]
fn test_wrong_number_of_sources() {
    let config = two_stations();
    let transport = Arc::new(LocalTransport::for_config(&config));
    let sources: Vec<Box<dyn PacketSource>> = vec![Box::new(VecSource::default())];
    let result = StationPipeline::start(config, 0, sources, None, Outbox::new(transport));
    assert!(matches!(
        result,
        Err(hypercorr::PipelineError::SourceCount {
            num_boards: 2,
            num_sources: 1,
            ..
        })
    ));
}
