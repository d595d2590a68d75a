//! Sum-reductions across the partitions of a distributed discretization.
//!
//! Every partition numbers its degrees of freedom independently. Values that belong to the same
//! geometric degree of freedom are matched across partitions by a partition-independent [`Tag`].
//! All operations are collective: every participant must call them in the same order.
use crate::assembly::local::Entity;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Barrier};

/// Partition-independent identifier of a reduced value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub entity: Entity,
    pub slot: usize,
}

impl Tag {
    pub fn new(entity: Entity, slot: usize) -> Self {
        Self { entity, slot }
    }
}

pub trait Communicator: Send + Sync + fmt::Debug {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replaces every value by the sum of all values carrying the same tag, over all participants.
    ///
    /// Duplicate tags within one participant are summed as well.
    fn sum_by_tag(&self, tags: &[Tag], values: &mut [f64]);

    /// Element-wise sum of `values` over all participants.
    fn sum_all(&self, values: &mut [f64]);
}

fn accumulate_by_tag(totals: &mut FxHashMap<Tag, f64>, tags: &[Tag], values: &[f64]) {
    for (tag, value) in tags.iter().zip(values) {
        *totals.entry(*tag).or_insert(0.0) += *value;
    }
}

fn scatter_totals(totals: &FxHashMap<Tag, f64>, tags: &[Tag], values: &mut [f64]) {
    for (tag, value) in tags.iter().zip(values.iter_mut()) {
        if let Some(total) = totals.get(tag) {
            *value = *total;
        }
    }
}

/// Single participant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_by_tag(&self, tags: &[Tag], values: &mut [f64]) {
        assert_eq!(tags.len(), values.len(), "Every value must have a tag.");
        let mut totals = FxHashMap::default();
        accumulate_by_tag(&mut totals, tags, values);
        scatter_totals(&totals, tags, values);
    }

    fn sum_all(&self, _values: &mut [f64]) {}
}

const MISMATCHED_OPERATIONS: &str = "participants called different collective operations";

#[derive(Debug)]
enum Deposit {
    Tagged { tags: Vec<Tag>, values: Vec<f64> },
    Dense(Vec<f64>),
}

struct GroupShared {
    size: usize,
    barrier: Barrier,
    deposits: Mutex<Vec<Option<Deposit>>>,
}

/// A group of in-process participants, each driven by its own thread.
///
/// This simulates a distributed run with one mesh partition per thread. Sums are always
/// accumulated in rank order, so every participant obtains bitwise identical results.
pub struct ThreadGroup {
    shared: Arc<GroupShared>,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "A thread group needs at least one participant.");
        Self {
            shared: Arc::new(GroupShared {
                size,
                barrier: Barrier::new(size),
                deposits: Mutex::new((0..size).map(|_| None).collect()),
            }),
        }
    }

    /// One communicator per rank. Each must be moved to a different thread.
    pub fn into_communicators(self) -> Vec<GroupComm> {
        (0..self.shared.size)
            .map(|rank| GroupComm {
                rank,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct GroupComm {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl fmt::Debug for GroupComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl GroupComm {
    /// Deposits this rank's contribution, waits for everybody, lets `reduce` read all deposits
    /// and waits again so that no deposit is overwritten while others are still reading.
    ///
    /// Every rank reads the same deposits, so a mismatch found by `reduce` is found by all ranks.
    /// It is raised only after the second barrier, which every rank has then passed.
    fn exchange(&self, deposit: Deposit, reduce: impl FnOnce(&[Option<Deposit>]) -> Result<(), String>) {
        self.shared.deposits.lock()[self.rank] = Some(deposit);
        self.shared.barrier.wait();
        let result = {
            let deposits = self.shared.deposits.lock();
            reduce(&deposits)
        };
        self.shared.barrier.wait();
        if let Err(message) = result {
            panic!("Collective operation failed on rank {}: {message}", self.rank);
        }
    }
}

impl Communicator for GroupComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn sum_by_tag(&self, tags: &[Tag], values: &mut [f64]) {
        assert_eq!(tags.len(), values.len(), "Every value must have a tag.");
        let deposit = Deposit::Tagged {
            tags: tags.to_vec(),
            values: values.to_vec(),
        };
        self.exchange(deposit, |deposits| {
            let mut totals = FxHashMap::default();
            for deposit in deposits.iter().flatten() {
                match deposit {
                    Deposit::Tagged { tags, values } => accumulate_by_tag(&mut totals, tags, values),
                    Deposit::Dense(_) => return Err(MISMATCHED_OPERATIONS.to_string()),
                }
            }
            scatter_totals(&totals, tags, values);
            Ok(())
        });
    }

    fn sum_all(&self, values: &mut [f64]) {
        let deposit = Deposit::Dense(values.to_vec());
        self.exchange(deposit, |deposits| {
            let mut totals = vec![0.0; values.len()];
            for deposit in deposits.iter().flatten() {
                match deposit {
                    Deposit::Dense(contribution) if contribution.len() == totals.len() => {
                        for (total, value) in totals.iter_mut().zip(contribution) {
                            *total += *value;
                        }
                    }
                    Deposit::Dense(contribution) => {
                        return Err(format!(
                            "sum_all called with lengths {} and {}",
                            totals.len(),
                            contribution.len()
                        ))
                    }
                    Deposit::Tagged { .. } => return Err(MISMATCHED_OPERATIONS.to_string()),
                }
            }
            values.copy_from_slice(&totals);
            Ok(())
        });
    }
}
