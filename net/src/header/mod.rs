// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Headers which prefix packets exchanged with user space (they never appear on a wire).

pub mod pi;
pub mod vnet;
