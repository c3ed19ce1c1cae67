// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Wiring of the stages into running pipelines.

A [`StationPipeline`] reads a station's boards, assembles blocks and sends
them to the nodes. A [`NodePipeline`] receives every station's blocks for its
subbands and correlates them. Both run on their own named threads and stop
once their input ends, or when [`StationPipeline::stop`] /
[`NodePipeline::stop`] is called.
 */

mod node;
mod station;

pub use node::{NodePipeline, NodeReport};
pub use station::{StationPipeline, StationReport};

use std::{sync::Arc, thread::JoinHandle};

use log::error;

use crate::{config::RunConfig, error::PipelineError};

fn check_config(config: &RunConfig) -> Result<(), PipelineError> {
    config.validate()?;
    Ok(())
}

/// Wait for a pipeline thread. A panicked thread is logged and counts as
/// having produced nothing.
fn join_thread<T: Default>(handle: Option<JoinHandle<T>>, what: &str) -> T {
    match handle.map(JoinHandle::join) {
        Some(Ok(t)) => t,
        Some(Err(_)) => {
            error!("The {what} thread panicked");
            T::default()
        }
        None => T::default(),
    }
}

/// Shared by every thread of one pipeline.
type StopFlag = Arc<crossbeam_utils::atomic::AtomicCell<bool>>;
