//! Partition balancing policies.
//!
//! A balancer is fixed per factory and shared by every publisher the
//! factory creates, so any load accounting it keeps spans all of them.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::types::Message;

/// Strategy choosing the partition that receives a message.
pub trait Balancer: Send + Sync + fmt::Debug {
    /// Pick one of `partitions` for `msg`.
    ///
    /// Returns `None` only when `partitions` is empty.
    fn balance(&self, msg: &Message, partitions: &[i32]) -> Option<i32>;
}

/// Sends each message to the partition that has received the fewest bytes.
///
/// Counters are reset whenever the partition set handed in changes. Ties
/// go to the partition listed first.
#[derive(Debug, Default)]
pub struct LeastBytes {
    counters: Mutex<Vec<PartitionLoad>>,
}

#[derive(Debug, Clone, Copy)]
struct PartitionLoad {
    partition: i32,
    bytes: u64,
}

impl LeastBytes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for LeastBytes {
    fn balance(&self, msg: &Message, partitions: &[i32]) -> Option<i32> {
        if partitions.is_empty() {
            return None;
        }

        let mut counters = self.counters.lock();

        let unchanged = counters.len() == partitions.len()
            && counters
                .iter()
                .zip(partitions)
                .all(|(load, p)| load.partition == *p);

        if !unchanged {
            *counters = partitions
                .iter()
                .map(|&partition| PartitionLoad { partition, bytes: 0 })
                .collect();
        }

        let least = counters.iter_mut().min_by_key(|load| load.bytes)?;
        least.bytes += msg.size() as u64;
        Some(least.partition)
    }
}

/// Cycles through partitions in order, ignoring message size.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn balance(&self, _msg: &Message, partitions: &[i32]) -> Option<i32> {
        if partitions.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Some(partitions[n % partitions.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(len: usize) -> Message {
        Message::unkeyed(vec![b'x'; len])
    }

    #[test]
    fn test_least_bytes_prefers_lightest_partition() {
        let balancer = LeastBytes::new();
        let partitions = [0, 1, 2];

        assert_eq!(balancer.balance(&msg(100), &partitions), Some(0));
        assert_eq!(balancer.balance(&msg(10), &partitions), Some(1));
        assert_eq!(balancer.balance(&msg(10), &partitions), Some(2));
        // 0 has 100 bytes, 1 and 2 have 10 each
        assert_eq!(balancer.balance(&msg(5), &partitions), Some(1));
        assert_eq!(balancer.balance(&msg(5), &partitions), Some(2));
        assert_eq!(balancer.balance(&msg(200), &partitions), Some(1));
        assert_eq!(balancer.balance(&msg(1), &partitions), Some(2));
    }

    #[test]
    fn test_least_bytes_counts_key_bytes() {
        let balancer = LeastBytes::new();
        let partitions = [0, 1];

        assert_eq!(
            balancer.balance(&Message::new(vec![b'k'; 50], "v"), &partitions),
            Some(0)
        );
        assert_eq!(balancer.balance(&msg(40), &partitions), Some(1));
        // 0 carries 51 bytes, 1 carries 40
        assert_eq!(balancer.balance(&msg(1), &partitions), Some(1));
    }

    #[test]
    fn test_least_bytes_resets_when_partitions_change() {
        let balancer = LeastBytes::new();

        assert_eq!(balancer.balance(&msg(100), &[0, 1]), Some(0));
        assert_eq!(balancer.balance(&msg(1), &[0, 1]), Some(1));

        // New partition set starts from zero, first partition wins the tie
        assert_eq!(balancer.balance(&msg(1), &[3, 4, 5]), Some(3));
        assert_eq!(balancer.balance(&msg(1), &[3, 4, 5]), Some(4));
    }

    #[test]
    fn test_least_bytes_empty_partitions() {
        assert_eq!(LeastBytes::new().balance(&msg(1), &[]), None);
    }

    #[test]
    fn test_round_robin_cycles() {
        let balancer = RoundRobin::new();
        let partitions = [7, 8, 9];

        let picks: Vec<_> = (0..5)
            .map(|_| balancer.balance(&msg(1), &partitions))
            .collect();

        assert_eq!(picks, vec![Some(7), Some(8), Some(9), Some(7), Some(8)]);
        assert_eq!(balancer.balance(&msg(1), &[]), None);
    }
}
