//! Requests for space and the handles their requesters wait on.

use crate::magnitude::Magnitude;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    ops::{Index, IndexMut, SubAssign},
    pin::pin,
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;

/// Traffic direction of the objects a requisition is for.
///
/// Each direction has its own budgets and its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Inbound => 0,
            Direction::Outbound => 1,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        })
    }
}

/// Storage media objects can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    /// Space in files.
    File,
    /// Space in bulk storage.
    Bulk,
    /// Space in the storage heap itself.
    Heap,
}

impl Medium {
    pub const ALL: [Medium; 3] = [Medium::File, Medium::Bulk, Medium::Heap];

    pub(crate) fn index(self) -> usize {
        match self {
            Medium::File => 0,
            Medium::Bulk => 1,
            Medium::Heap => 2,
        }
    }
}

impl Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Medium::File => "file",
            Medium::Bulk => "bulk",
            Medium::Heap => "heap",
        })
    }
}

/// One magnitude per [Medium].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space([Magnitude; 3]);

impl Space {
    pub const ZERO: Self = Self([Magnitude::ZERO; 3]);

    pub const fn new(file: Magnitude, bulk: Magnitude, heap: Magnitude) -> Self {
        Self([file, bulk, heap])
    }

    /// Space on a single medium.
    pub fn of(medium: Medium, amount: Magnitude) -> Self {
        let mut space = Self::ZERO;
        space[medium] = amount;
        space
    }

    pub fn is_valid(&self) -> bool {
        self.0.iter().all(Magnitude::is_valid)
    }

    /// Whether every amount fits in `budget`, with invalid budgets counting as zero.
    pub fn fits_within(&self, budget: &Space) -> bool {
        self.0
            .iter()
            .zip(budget.0.iter())
            .all(|(needed, available)| *needed <= available.or_zero())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Medium, Magnitude)> + '_ {
        Medium::ALL.into_iter().zip(self.0.iter().copied())
    }
}

impl Index<Medium> for Space {
    type Output = Magnitude;

    fn index(&self, medium: Medium) -> &Magnitude {
        &self.0[medium.index()]
    }
}

impl IndexMut<Medium> for Space {
    fn index_mut(&mut self, medium: Medium) -> &mut Magnitude {
        &mut self.0[medium.index()]
    }
}

impl SubAssign<&Space> for Space {
    fn sub_assign(&mut self, other: &Space) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            *mine -= theirs;
        }
    }
}

impl Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [file, bulk, heap] = &self.0;
        write!(f, "file={file}, bulk={bulk}, heap={heap}")
    }
}

/// Two-level ordering key, the coarse level first.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Priority {
    pub coarse: u8,
    pub fine: u8,
}

impl Priority {
    pub const fn new(coarse: u8, fine: u8) -> Self {
        Self { coarse, fine }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.coarse, self.fine)
    }
}

#[derive(Debug, Default)]
struct Signal {
    given: bool,
    ended: bool,
}

#[derive(Debug, Default)]
struct AttendantInner {
    signal: Mutex<Signal>,
    notify: Notify,
}

/// The wait handle of a blocking requester: a binary semaphore that can be ended.
///
/// Cloning yields another handle to the same semaphore.
#[derive(Debug, Clone, Default)]
pub struct Attendant {
    inner: Arc<AttendantInner>,
}

/// The semaphore was ended while, or before, waiting on it.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("attendant ended")]
pub struct Ended;

impl Attendant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the semaphore. Signaling an already signaled semaphore is a no-op.
    pub fn give(&self) {
        self.inner.signal.lock().expect("poisoned").given = true;
        self.inner.notify.notify_waiters();
    }

    /// Waits until the semaphore is signaled, consuming the signal.
    ///
    /// Fails as soon as the semaphore is ended.
    pub async fn take(&self) -> Result<(), Ended> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();

            {
                let mut signal = self.inner.signal.lock().expect("poisoned");
                if signal.ended {
                    return Err(Ended);
                }
                if signal.given {
                    signal.given = false;
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Consumes a pending signal without waiting.
    pub(crate) fn reset(&self) {
        self.inner.signal.lock().expect("poisoned").given = false;
    }

    /// Ends the semaphore: current and future waits fail until [Attendant::resume].
    pub fn pause(&self) {
        self.inner.signal.lock().expect("poisoned").ended = true;
        self.inner.notify.notify_waiters();
    }

    /// Clears the ended state along with any stale signal.
    pub fn resume(&self) {
        let mut signal = self.inner.signal.lock().expect("poisoned");
        signal.ended = false;
        signal.given = false;
    }

    /// Whether the semaphore is ended. Any number of observers see the same answer.
    pub fn is_ended(&self) -> bool {
        self.inner.signal.lock().expect("poisoned").ended
    }
}

/// A pending or serviced request for space.
#[derive(Debug)]
pub(crate) struct Requisition {
    pub(crate) needed: Space,
    pub(crate) priority: Priority,
    pub(crate) attendant: Option<Attendant>,
    pub(crate) serviced: bool,
}

impl Requisition {
    pub(crate) fn new(needed: Space, priority: Priority, attendant: Option<Attendant>) -> Self {
        Self {
            needed,
            priority,
            attendant,
            serviced: false,
        }
    }

    /// Blocking requesters wait on an attendant and draw from the restricted budget.
    pub(crate) fn is_blocking(&self) -> bool {
        self.attendant.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn priority_order() {
        assert!(Priority::new(2, 0) > Priority::new(1, 9));
        assert!(Priority::new(1, 3) > Priority::new(1, 2));
        assert_eq!(Priority::new(4, 4), Priority::new(4, 4));
    }

    #[test]
    fn space_fits() {
        let budget = Space::new(Magnitude::new(10), Magnitude::new(10), Magnitude::new(10));
        assert!(Space::of(Medium::Bulk, Magnitude::new(10)).fits_within(&budget));
        assert!(!Space::new(Magnitude::new(5), Magnitude::new(11), Magnitude::ZERO)
            .fits_within(&budget));

        let mut exhausted = budget;
        exhausted -= &Space::of(Medium::File, Magnitude::new(20));
        assert!(!exhausted[Medium::File].is_valid());
        assert!(Space::of(Medium::Heap, Magnitude::new(1)).fits_within(&exhausted));
        assert!(!Space::of(Medium::File, Magnitude::new(1)).fits_within(&exhausted));
        assert!(Space::ZERO.fits_within(&exhausted));
    }

    #[tokio::test]
    async fn signal_before_take() {
        let attendant = Attendant::new();
        attendant.give();
        attendant.give();
        assert_eq!(attendant.take().await, Ok(()));
        assert!(timeout(Duration::from_millis(20), attendant.take())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn signal_wakes_waiter() {
        let attendant = Attendant::new();
        let waiter = tokio::spawn({
            let attendant = attendant.clone();
            async move { attendant.take().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        attendant.give();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let attendant = Attendant::new();
        let waiter = tokio::spawn({
            let attendant = attendant.clone();
            async move { attendant.take().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        attendant.pause();
        assert_eq!(waiter.await.unwrap(), Err(Ended));
        assert!(attendant.is_ended());
        assert!(attendant.is_ended());
        assert_eq!(attendant.take().await, Err(Ended));

        attendant.resume();
        assert!(!attendant.is_ended());
        attendant.give();
        assert_eq!(attendant.take().await, Ok(()));
    }
}
