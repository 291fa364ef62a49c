// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words sysfs cpulist affinitized

//! Logical CPU / physical core / NUMA node view of the host. See
//! [`CpuTopology`].

use super::sysfs;
use smallvec::SmallVec;
use std::{collections::BTreeMap, fmt, path::Path, sync::OnceLock};

/// Where the kernel roots the CPU and node descriptors.
const SYSFS_SYSTEM_ROOT: &str = "/sys/devices/system";

/// One hardware thread, with the physical package and core it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalCpu {
    id: usize,
    package_id: usize,
    core_id: usize,
}

impl LogicalCpu {
    #[must_use]
    pub fn id(&self) -> usize { self.id }

    #[must_use]
    pub fn package_id(&self) -> usize { self.package_id }

    #[must_use]
    pub fn core_id(&self) -> usize { self.core_id }
}

/// A physical core: the set of SMT siblings sharing one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalCore {
    package_id: usize,
    core_id: usize,
    cpus: SmallVec<[usize; 8]>,
}

impl PhysicalCore {
    #[must_use]
    pub fn package_id(&self) -> usize { self.package_id }

    #[must_use]
    pub fn core_id(&self) -> usize { self.core_id }

    /// Logical CPU ids sharing this core, ascending.
    #[must_use]
    pub fn cpus(&self) -> &[usize] { &self.cpus }

    /// The core's designated primary thread: its lowest-numbered SMT
    /// sibling. Reactor dispatch threads pin here.
    #[must_use]
    pub fn primary_thread(&self) -> usize {
        // cpus is non-empty and ascending by construction.
        self.cpus[0]
    }
}

/// One NUMA node and the logical CPUs local to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    id: usize,
    cpus: Vec<usize>,
}

impl NumaNode {
    #[must_use]
    pub fn id(&self) -> usize { self.id }

    #[must_use]
    pub fn cpus(&self) -> &[usize] { &self.cpus }
}

/// Snapshot of the host topology, read from sysfs once at first use.
///
/// Guarantees at least one core and one node: when sysfs is unreadable (as
/// in minimal containers) a single-core single-node view covering the host's
/// logical CPUs is synthesized instead.
///
/// [`instance`] is the lazy process-wide singleton every other component
/// uses; [`detect`] stays public so tests can build throwaway views.
///
/// [`detect`]: Self::detect
/// [`instance`]: Self::instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    cpus: Vec<LogicalCpu>,
    cores: Vec<PhysicalCore>,
    nodes: Vec<NumaNode>,
}

impl CpuTopology {
    /// The process-wide topology, read on first call.
    #[must_use]
    pub fn instance() -> &'static CpuTopology {
        static INSTANCE: OnceLock<CpuTopology> = OnceLock::new();
        INSTANCE.get_or_init(Self::detect)
    }

    /// Reads the host topology from sysfs.
    #[must_use]
    pub fn detect() -> Self { Self::detect_at(Path::new(SYSFS_SYSTEM_ROOT)) }

    /// Reads a topology rooted at `root` (the `/sys/devices/system`
    /// equivalent), falling back to the synthesized view when the CPU
    /// presence list is unreadable.
    #[must_use]
    pub fn detect_at(root: &Path) -> Self {
        let Some(present) = sysfs::read_cpu_list(&root.join("cpu/present")) else {
            return Self::synthesized();
        };
        if present.is_empty() {
            return Self::synthesized();
        }

        let cpus: Vec<LogicalCpu> = present
            .iter()
            .map(|&id| {
                let topology_dir = root.join(format!("cpu/cpu{id}/topology"));
                LogicalCpu {
                    id,
                    package_id: sysfs::read_value(&topology_dir.join("physical_package_id"))
                        .unwrap_or(0),
                    // A CPU with no readable core id stands alone as its own
                    // core rather than invalidating the whole view.
                    core_id: sysfs::read_value(&topology_dir.join("core_id")).unwrap_or(id),
                }
            })
            .collect();

        let mut grouped: BTreeMap<(usize, usize), SmallVec<[usize; 8]>> = BTreeMap::new();
        for cpu in &cpus {
            grouped
                .entry((cpu.package_id, cpu.core_id))
                .or_default()
                .push(cpu.id);
        }
        let cores = grouped
            .into_iter()
            .map(|((package_id, core_id), mut siblings)| {
                siblings.sort_unstable();
                PhysicalCore {
                    package_id,
                    core_id,
                    cpus: siblings,
                }
            })
            .collect();

        let nodes = Self::detect_nodes(root, &cpus);
        Self { cpus, cores, nodes }
    }

    /// Enumerates `node<k>/cpulist` entries; a host without a node directory
    /// is treated as one node spanning every CPU.
    fn detect_nodes(root: &Path, cpus: &[LogicalCpu]) -> Vec<NumaNode> {
        let mut nodes = Vec::new();
        if let Ok(entries) = std::fs::read_dir(root.join("node")) {
            let mut ids: Vec<usize> = entries
                .flatten()
                .filter_map(|entry| {
                    entry
                        .file_name()
                        .to_str()?
                        .strip_prefix("node")?
                        .parse()
                        .ok()
                })
                .collect();
            ids.sort_unstable();
            for id in ids {
                if let Some(node_cpus) =
                    sysfs::read_cpu_list(&root.join(format!("node/node{id}/cpulist")))
                {
                    // Nodes are non-empty; memory-only nodes are skipped.
                    if !node_cpus.is_empty() {
                        nodes.push(NumaNode { id, cpus: node_cpus });
                    }
                }
            }
        }
        if nodes.is_empty() {
            nodes.push(NumaNode {
                id: 0,
                cpus: cpus.iter().map(LogicalCpu::id).collect(),
            });
        }
        nodes
    }

    /// Single-core single-node view over the host's logical CPUs, used when
    /// sysfs gives us nothing to read.
    fn synthesized() -> Self {
        let cpu_count = num_cpus::get().max(1);
        let cpus: Vec<LogicalCpu> = (0..cpu_count)
            .map(|id| LogicalCpu {
                id,
                package_id: 0,
                core_id: 0,
            })
            .collect();
        Self {
            cores: vec![PhysicalCore {
                package_id: 0,
                core_id: 0,
                cpus: cpus.iter().map(LogicalCpu::id).collect(),
            }],
            nodes: vec![NumaNode {
                id: 0,
                cpus: cpus.iter().map(LogicalCpu::id).collect(),
            }],
            cpus,
        }
    }

    /// Logical CPUs, ascending by id.
    #[must_use]
    pub fn cpus(&self) -> &[LogicalCpu] { &self.cpus }

    /// Physical cores; never empty.
    #[must_use]
    pub fn cores(&self) -> &[PhysicalCore] { &self.cores }

    /// NUMA nodes; never empty.
    #[must_use]
    pub fn nodes(&self) -> &[NumaNode] { &self.nodes }

    /// Emits the topology at debug level for field diagnostics.
    pub fn dump(&self) { tracing::debug!("host topology\n{self}"); }
}

impl fmt::Display for CpuTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "logical cpus: {}", self.cpus.len())?;
        for core in &self.cores {
            writeln!(
                f,
                "package {} core {:>3}: cpus {:?} (primary {})",
                core.package_id(),
                core.core_id(),
                core.cpus(),
                core.primary_thread()
            )?;
        }
        for node in &self.nodes {
            writeln!(f, "numa node {}: cpus {:?}", node.id(), node.cpus())?;
        }
        Ok(())
    }
}
