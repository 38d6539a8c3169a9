// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use super::{FlowCache, FlowEntry};
use std::fmt::Display;

struct Heading(String);
const LINE_WIDTH: usize = 81;
impl Display for Heading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = (LINE_WIDTH - (self.0.len() + 2)) / 2;
        write!(f, " {0:─<width$}", "─", width = len)?;
        write!(f, " {} ", self.0)?;
        writeln!(f, " {0:─<width$}", "─", width = len)
    }
}

impl Display for FlowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ hash: {:#010x}, queue: {}, rps: {:#010x}, updated: {:?} }}",
            self.hash(),
            self.queue_index(),
            self.rps_rxhash(),
            self.updated()
        )
    }
}

impl Display for FlowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries();
        Heading(format!("Flow Cache ({})", entries.len())).fmt(f)?;
        for entry in entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
