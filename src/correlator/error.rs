// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from a compute unit. These only ever invalidate one block.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("{what} has shape {got:?}, but {expected:?} was expected")]
    Shape {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Compute device '{device}' failed: {msg}")]
    Device { device: String, msg: String },
}
