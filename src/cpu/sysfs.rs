// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words sysfs cpulist

//! sysfs readers and the cpulist grammar.
//!
//! The kernel publishes CPU presence and NUMA membership as *cpulists*:
//! comma-separated ranges like `0-3,8,10-11`. Everything here is plain file
//! reading; the topology assembly lives in [`super::topology`].

use std::path::Path;

/// Parses a kernel cpulist (`0-3,8,10-11`) into ascending CPU ids.
///
/// Returns `None` when any element of the list fails to parse; an empty
/// (whitespace-only) list is valid and yields no ids.
pub(super) fn parse_cpu_list(list: &str) -> Option<Vec<usize>> {
    let mut cpus = Vec::new();
    for element in list.trim().split(',') {
        if element.is_empty() {
            continue;
        }
        match element.split_once('-') {
            Some((first, last)) => {
                let first: usize = first.trim().parse().ok()?;
                let last: usize = last.trim().parse().ok()?;
                if last < first {
                    return None;
                }
                cpus.extend(first..=last);
            }
            None => cpus.push(element.trim().parse().ok()?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Some(cpus)
}

/// Reads and parses a cpulist file (e.g. `cpu/present`, `node0/cpulist`).
pub(super) fn read_cpu_list(path: &Path) -> Option<Vec<usize>> {
    parse_cpu_list(&std::fs::read_to_string(path).ok()?)
}

/// Reads a single decimal value (e.g. `topology/core_id`).
pub(super) fn read_value(path: &Path) -> Option<usize> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
