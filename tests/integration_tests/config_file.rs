// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Run configurations read from disk.

use std::io::Write;

use tempfile::NamedTempFile;

use hypercorr::{config::ConfigError, AssemblyMode, RunConfig};

use crate::TWO_STATIONS;

#[test]
fn test_read_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(TWO_STATIONS.as_bytes()).unwrap();
    let config = RunConfig::read_file(file.path()).unwrap();

    assert_eq!(config.mode, AssemblyMode::Batch);
    assert_eq!(config.num_stations(), 2);
    assert_eq!(config.num_subbands(), 4);
    assert_eq!(config.num_baselines(), 3);
    assert_eq!(config.num_blocks(), Some(3));
    assert_eq!(config.node_subbands(1), vec![2, 3]);
    assert_eq!(config.stations[1].name, "CS002");
}

#[test]
fn test_bad_config_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    let contents = TWO_STATIONS.replace("subbands = [2, 3]", "subbands = [1, 2, 3]");
    file.write_all(contents.as_bytes()).unwrap();
    let result = RunConfig::read_file(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::SubbandAssignedTwice { subband: 1, .. })
    ));
}
