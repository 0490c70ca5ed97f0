//! Bounded queue that hands items out in index order regardless of the
//! order (or thread) they were pushed from.

use crate::error::CatResult;
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeMap;
use std::iter::FusedIterator;

pub(crate) struct OrdQueue<T> {
    sender: Sender<(usize, T)>,
}

impl<T> Clone for OrdQueue<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

pub(crate) struct OrdQueueIter<T> {
    receiver: Receiver<(usize, T)>,
    next_index: usize,
    /// Out-of-order arrivals parked until their turn comes up.
    pending: BTreeMap<usize, T>,
}

pub(crate) fn new<T>(depth: usize) -> (OrdQueue<T>, OrdQueueIter<T>) {
    let (sender, receiver) = crossbeam_channel::bounded(depth);
    (
        OrdQueue { sender },
        OrdQueueIter { receiver, next_index: 0, pending: BTreeMap::new() },
    )
}

impl<T: Send + 'static> OrdQueue<T> {
    /// Blocks when the queue is `depth` items ahead of the consumer.
    #[inline]
    pub fn push(&self, index: usize, item: T) -> CatResult<()> {
        self.sender.send((index, item))?;
        Ok(())
    }
}

impl<T> FusedIterator for OrdQueueIter<T> {}

impl<T> Iterator for OrdQueueIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.pending.remove(&self.next_index) {
                self.next_index += 1;
                return Some(item);
            }
            match self.receiver.recv() {
                Ok((index, item)) => {
                    self.pending.insert(index, item);
                }
                Err(_) => {
                    // Sender gone; drain whatever is parked, gaps included.
                    let (index, item) = self.pending.pop_first()?;
                    self.next_index = index + 1;
                    return Some(item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorders_out_of_order_pushes() {
        let (queue, iter) = new(8);
        for i in [3usize, 0, 2, 1] {
            queue.push(i, i * 10).unwrap();
        }
        drop(queue);
        assert_eq!(iter.collect::<Vec<_>>(), [0, 10, 20, 30]);
    }

    #[test]
    fn drains_past_gaps_once_sender_is_gone() {
        let (queue, iter) = new(8);
        queue.push(0, 'a').unwrap();
        queue.push(5, 'b').unwrap();
        drop(queue);
        assert_eq!(iter.collect::<Vec<_>>(), ['a', 'b']);
    }
}
