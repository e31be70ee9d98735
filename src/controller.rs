//! Admission control over the space of a [Heap].
//!
//! Requesters ask for space on the three media at once. Their requisitions are kept
//! in one priority-ordered queue per direction and serviced by [scans](AdmissionController::scan):
//! a single pass from head to tail that grants every requisition that fits in what is
//! left after all the ones before it.
//!
//! Requesters that wait (blocking, with an [Attendant]) may only use half of each
//! capacity, so they can never starve requesters that cannot wait.
//!
//! Every queue mutation happens while holding the ledger lock, which is the atomic
//! update region of the controller.
//! Whoever frees space in the heap must call [AdmissionController::scan] afterwards,
//! otherwise waiting requesters stay parked although space is available.

use crate::{
    api::{MediumUsage, QueueEntry, QueueSnapshot},
    heap::{Heap, HeapError, Location, NewObject, ObjectId, ObjectSource, Reservation},
    magnitude::Magnitude,
    queue::{RequisitionQueue, SlotId, Slots},
    requisition::{Attendant, Direction, Medium, Priority, Requisition, Space},
};
use std::{
    fmt::{self, Debug, Display},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Errors that can be returned by the controller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("all {limit} requisition slots are in use")]
    ResourceExhausted { limit: usize },
    #[error("heap error: {0}")]
    Heap(#[from] HeapError),
}

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of requisitions that can exist at the same time, in both directions.
    pub max_requisitions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_requisitions: 1024,
        }
    }
}

/// Something that happened to a requisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Queued {
        direction: Direction,
        slot: SlotId,
        priority: Priority,
        needed: Space,
    },
    Serviced {
        direction: Direction,
        slot: SlotId,
    },
    NotServiceable {
        direction: Direction,
        slot: SlotId,
    },
    Shredded {
        direction: Direction,
        slot: SlotId,
    },
    Interrupted {
        direction: Direction,
        slot: SlotId,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Queued {
                direction,
                slot,
                priority,
                needed,
            } => write!(f, "{direction} {slot} queued at {priority} for {needed}"),
            Event::Serviced { direction, slot } => write!(f, "{direction} {slot} serviced"),
            Event::NotServiceable { direction, slot } => {
                write!(f, "{direction} {slot} not serviceable")
            }
            Event::Shredded { direction, slot } => write!(f, "{direction} {slot} shredded"),
            Event::Interrupted { direction, slot } => {
                write!(f, "{direction} {slot} interrupted")
            }
        }
    }
}

/// Hook notified of every requisition [Event], supplied by the embedding application.
///
/// Usually called with the ledger locked: implementations must not call back into the
/// controller.
pub trait Watcher: Send + Sync + 'static {
    fn notice(&self, event: &Event);
}

/// Forwards events to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWatcher;

impl Watcher for LogWatcher {
    fn notice(&self, event: &Event) {
        log::debug!("{event}");
    }
}

/// Result of [AdmissionController::request].
#[derive(Debug)]
pub enum Admission<H: Heap> {
    /// The space was granted immediately and the requisition already shredded.
    Granted,
    /// A non-blocking request that cannot be met now. Nothing was left queued.
    NotServiceable,
    /// A blocking request that has to wait on its ticket.
    Pending(Ticket<H>),
}

/// How a wait on a [Ticket] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Serviced,
    /// The attendant was ended while waiting.
    Cancelled,
    TimedOut,
}

/// Result of [AdmissionController::create_object].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created(ObjectId),
    /// A non-blocking request that could not be met.
    NotCreated,
    /// The wait for space was cancelled.
    Interrupted,
}

#[derive(Debug)]
struct Ledger {
    slots: Slots,
    queues: [RequisitionQueue; 2],
}

struct Inner<H> {
    heap: H,
    ledger: Mutex<Ledger>,
    watcher: Box<dyn Watcher>,
}

/// Admission controller, cheaply cloneable.
pub struct AdmissionController<H: Heap> {
    inner: Arc<Inner<H>>,
}

impl<H: Heap> Clone for AdmissionController<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: Heap> Debug for AdmissionController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("ledger", &self.inner.ledger)
            .finish_non_exhaustive()
    }
}

impl<H: Heap> AdmissionController<H> {
    pub fn new(heap: H, config: Config) -> Self {
        Self::with_watcher(heap, config, LogWatcher)
    }

    pub fn with_watcher(heap: H, config: Config, watcher: impl Watcher) -> Self {
        log::info!(
            "admission controller with {} requisition slots",
            config.max_requisitions
        );
        Self {
            inner: Arc::new(Inner {
                heap,
                ledger: Mutex::new(Ledger {
                    slots: Slots::new(config.max_requisitions),
                    queues: Default::default(),
                }),
                watcher: Box::new(watcher),
            }),
        }
    }

    pub fn heap(&self) -> &H {
        &self.inner.heap
    }

    /// Requests `needed` space for `direction` and runs a scan.
    ///
    /// With an `attendant` the request stays queued until a later scan services it,
    /// and the returned [Ticket] is how the requester waits for that.
    /// Without one, a request that cannot be met right away is dropped.
    pub fn request(
        &self,
        direction: Direction,
        needed: Space,
        priority: Priority,
        attendant: Option<&Attendant>,
    ) -> Result<Admission<H>, Error> {
        self.submit(direction, needed, priority, attendant, false)
    }

    /// Queues a requisition and scans.
    ///
    /// With `hold` set an immediately serviced requisition is returned as a ticket
    /// instead of being shredded, so its space stays reserved until the ticket drops.
    fn submit(
        &self,
        direction: Direction,
        needed: Space,
        priority: Priority,
        attendant: Option<&Attendant>,
        hold: bool,
    ) -> Result<Admission<H>, Error> {
        if !needed.is_valid() {
            return Err(Error::InvalidArgument("needed space must not be negative"));
        }

        let mut ledger = self.inner.ledger.lock().expect("poisoned");
        if let Some(attendant) = attendant {
            attendant.reset();
        }

        let limit = ledger.slots.limit();
        let slot = ledger
            .slots
            .alloc(Requisition::new(needed, priority, attendant.cloned()))
            .map_err(|_| {
                log::error!("{direction} request at {priority} for {needed}: no free slot");
                Error::ResourceExhausted { limit }
            })?;
        log::trace!("{} of {limit} slots in use", ledger.slots.in_use());

        let Ledger { slots, queues } = &mut *ledger;
        queues[direction.index()].insert(slots, slot, priority);
        self.inner.watcher.notice(&Event::Queued {
            direction,
            slot,
            priority,
            needed,
        });

        if let Err(error) = self.locked_scan(&mut ledger, direction) {
            log::error!("{direction} scan failed: {error}");
            self.locked_shred(&mut ledger, direction, slot);
            return Err(error);
        }

        let serviced = ledger.slots.get(slot).is_some_and(|r| r.serviced);
        if serviced && !hold {
            self.locked_shred(&mut ledger, direction, slot);
            if let Some(attendant) = attendant {
                attendant.reset();
            }
            return Ok(Admission::Granted);
        }

        if !serviced && attendant.is_none() {
            self.inner
                .watcher
                .notice(&Event::NotServiceable { direction, slot });
            self.locked_shred(&mut ledger, direction, slot);
            return Ok(Admission::NotServiceable);
        }

        Ok(Admission::Pending(Ticket {
            controller: self.clone(),
            direction,
            slot,
            attendant: attendant.cloned(),
            shredded: false,
        }))
    }

    /// Services every requisition of `direction` that fits, returning how many were
    /// newly serviced.
    ///
    /// Must be called whenever the heap's occupancy for `direction` decreases.
    pub fn scan(&self, direction: Direction) -> Result<usize, Error> {
        let mut ledger = self.inner.ledger.lock().expect("poisoned");
        self.locked_scan(&mut ledger, direction)
    }

    fn locked_scan(&self, ledger: &mut Ledger, direction: Direction) -> Result<usize, Error> {
        let mut total = Space::ZERO;
        let mut restricted = Space::ZERO;
        for medium in Medium::ALL {
            let max = self.inner.heap.max_occupancy(direction, medium)?;
            let current = self.inner.heap.occupancy(direction, medium)?;

            total[medium] = max;
            total[medium] -= current;

            restricted[medium] = max;
            restricted[medium].halve();
            restricted[medium] -= current;
        }

        let Ledger { slots, queues } = ledger;
        let queue = &queues[direction.index()];
        log::trace!("{direction} scan over {} requisitions", queue.len());

        let mut serviced = 0;
        for slot in queue.iter() {
            let Some(requisition) = slots.get_mut(slot) else {
                continue;
            };

            if !requisition.serviced {
                let budget = if requisition.is_blocking() {
                    &restricted
                } else {
                    &total
                };
                if !requisition.needed.fits_within(budget) {
                    continue;
                }

                requisition.serviced = true;
                serviced += 1;
                if let Some(attendant) = &requisition.attendant {
                    attendant.give();
                }
                self.inner
                    .watcher
                    .notice(&Event::Serviced { direction, slot });
            }

            // Serviced space is reserved for its requester.
            total -= &requisition.needed;
            restricted -= &requisition.needed;
        }

        Ok(serviced)
    }

    fn locked_shred(
        &self,
        ledger: &mut Ledger,
        direction: Direction,
        slot: SlotId,
    ) -> Option<Requisition> {
        ledger.queues[direction.index()].remove(slot);
        let requisition = ledger.slots.free(slot)?;
        self.inner
            .watcher
            .notice(&Event::Shredded { direction, slot });
        Some(requisition)
    }

    /// Shreds a ticket's requisition, handing any space it held to the rest of the queue.
    fn shred(&self, direction: Direction, slot: SlotId) {
        let mut ledger = self.inner.ledger.lock().expect("poisoned");
        let released = self
            .locked_shred(&mut ledger, direction, slot)
            .is_some_and(|requisition| requisition.serviced);
        if released {
            if let Err(error) = self.locked_scan(&mut ledger, direction) {
                log::error!("{direction} scan after releasing {slot} failed: {error}");
            }
        }
    }

    fn is_serviced(&self, slot: SlotId) -> bool {
        let ledger = self.inner.ledger.lock().expect("poisoned");
        ledger.slots.get(slot).is_some_and(|r| r.serviced)
    }

    /// Creates an object after securing space for its initial extent.
    ///
    /// An object with no initial extent is created right away.
    /// With an `attendant` this waits until the space is granted or the attendant is
    /// paused.
    pub async fn create_object(
        &self,
        direction: Direction,
        source: ObjectSource,
        priority: Priority,
        attendant: Option<&Attendant>,
    ) -> Result<Creation, Error> {
        let heap = &self.inner.heap;
        let provisional = direction == Direction::Inbound && attendant.is_none();
        let Some(location) = source.location else {
            let id = heap.create_object(NewObject {
                direction,
                source,
                reservation: Reservation::Unreserved,
                provisional,
            })?;
            return Ok(Creation::Created(id));
        };

        if source.length == 0 {
            return Err(Error::InvalidArgument("initial extent must not be empty"));
        }

        let length = Magnitude::from(source.length);
        let needed = match location {
            Location::File(_) => Space::of(Medium::File, length),
            Location::Bulk(_) => Space::of(Medium::Bulk, length),
            Location::Heap(_) => Space::of(Medium::Heap, length),
            Location::Object(id) => heap.aggregate_length(id, source.offset, source.length)?,
        };

        let ticket = match self.submit(direction, needed, priority, attendant, true)? {
            Admission::Pending(ticket) => ticket,
            Admission::Granted | Admission::NotServiceable => return Ok(Creation::NotCreated),
        };
        if ticket.wait().await != WaitOutcome::Serviced {
            log::warn!("{direction} object creation interrupted");
            self.inner.watcher.notice(&Event::Interrupted {
                direction,
                slot: ticket.slot,
            });
            return Ok(Creation::Interrupted);
        }

        let id = heap
            .create_object(NewObject {
                direction,
                source,
                reservation: Reservation::Reserved,
                provisional,
            })
            .inspect_err(|e| log::error!("{direction} object creation failed: {e}"))?;

        // The object now accounts for the space, release the reservation.
        drop(ticket);
        Ok(Creation::Created(id))
    }

    /// Destroys an object and rescans the direction whose space it freed.
    pub fn destroy_object(&self, id: ObjectId) -> Result<Direction, Error> {
        let direction = self.inner.heap.destroy_object(id)?;
        let serviced = self.scan(direction)?;
        log::debug!("{id} destroyed, {serviced} {direction} requisitions serviced");
        Ok(direction)
    }

    /// Current state of the queue of `direction`.
    pub fn snapshot(&self, direction: Direction) -> Result<QueueSnapshot, Error> {
        let ledger = self.inner.ledger.lock().expect("poisoned");
        let media: Vec<MediumUsage> = Medium::ALL
            .into_iter()
            .map(|medium| -> Result<_, HeapError> {
                Ok(MediumUsage {
                    medium,
                    max: self.inner.heap.max_occupancy(direction, medium)?,
                    occupancy: self.inner.heap.occupancy(direction, medium)?,
                })
            })
            .collect::<Result<_, _>>()?;

        let entries = ledger.queues[direction.index()]
            .iter()
            .filter_map(|slot| {
                ledger.slots.get(slot).map(|r| QueueEntry {
                    slot,
                    priority: r.priority,
                    needed: r.needed,
                    blocking: r.is_blocking(),
                    serviced: r.serviced,
                })
            })
            .collect();

        Ok(QueueSnapshot {
            direction,
            media,
            entries,
        })
    }
}

/// A queued requisition.
///
/// Dropping the ticket shreds the requisition, releasing any space it was granted.
pub struct Ticket<H: Heap> {
    controller: AdmissionController<H>,
    direction: Direction,
    slot: SlotId,
    attendant: Option<Attendant>,
    shredded: bool,
}

impl<H: Heap> Debug for Ticket<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("direction", &self.direction)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<H: Heap> Ticket<H> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn is_serviced(&self) -> bool {
        self.controller.is_serviced(self.slot)
    }

    /// Waits until the requisition is serviced or the attendant is ended.
    ///
    /// An ended attendant wins over servicing.
    pub async fn wait(&self) -> WaitOutcome {
        loop {
            if self.attendant.as_ref().is_some_and(Attendant::is_ended) {
                return WaitOutcome::Cancelled;
            }
            if self.is_serviced() {
                if let Some(attendant) = &self.attendant {
                    attendant.reset();
                }
                return WaitOutcome::Serviced;
            }

            let Some(attendant) = &self.attendant else {
                return WaitOutcome::Cancelled;
            };
            if attendant.take().await.is_err() {
                return WaitOutcome::Cancelled;
            }
            log::debug!("{} {} woken", self.direction, self.slot);
        }
    }

    /// Like [Ticket::wait], giving up after `duration`.
    ///
    /// The requisition stays queued when the wait times out.
    pub async fn wait_timeout(&self, duration: Duration) -> WaitOutcome {
        tokio::time::timeout(duration, self.wait())
            .await
            .unwrap_or(WaitOutcome::TimedOut)
    }

    /// Removes the requisition from its queue.
    pub fn shred(mut self) {
        self.shred_once();
    }

    fn shred_once(&mut self) {
        if !self.shredded {
            self.shredded = true;
            self.controller.shred(self.direction, self.slot);
        }
    }
}

impl<H: Heap> Drop for Ticket<H> {
    fn drop(&mut self) {
        self.shred_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::MemoryHeap;

    const P: Priority = Priority::new(1, 0);

    fn file(amount: i64) -> Space {
        Space::of(Medium::File, Magnitude::new(amount))
    }

    fn limited(file: i64, bulk: i64, heap: i64) -> MemoryHeap {
        let memory = MemoryHeap::new();
        for direction in Direction::ALL {
            memory.set_max_occupancy(direction, Medium::File, Magnitude::new(file));
            memory.set_max_occupancy(direction, Medium::Bulk, Magnitude::new(bulk));
            memory.set_max_occupancy(direction, Medium::Heap, Magnitude::new(heap));
        }
        memory
    }

    fn controller(max: i64) -> AdmissionController<MemoryHeap> {
        AdmissionController::new(limited(max, max, max), Config::default())
    }

    /// Queues a requisition and scans, leaving it in place even when serviced.
    fn enqueue(
        controller: &AdmissionController<MemoryHeap>,
        needed: Space,
        priority: Priority,
        attendant: Option<&Attendant>,
    ) -> SlotId {
        let mut ledger = controller.inner.ledger.lock().unwrap();
        let slot = ledger
            .slots
            .alloc(Requisition::new(needed, priority, attendant.cloned()))
            .unwrap();
        let Ledger { slots, queues } = &mut *ledger;
        queues[Direction::Outbound.index()].insert(slots, slot, priority);
        controller
            .locked_scan(&mut ledger, Direction::Outbound)
            .unwrap();
        slot
    }

    fn entries(controller: &AdmissionController<MemoryHeap>) -> Vec<(SlotId, bool, bool)> {
        controller
            .snapshot(Direction::Outbound)
            .unwrap()
            .entries
            .iter()
            .map(|entry| (entry.slot, entry.blocking, entry.serviced))
            .collect()
    }

    fn in_use(controller: &AdmissionController<MemoryHeap>) -> usize {
        controller.inner.ledger.lock().unwrap().slots.in_use()
    }

    fn file_source(length: u64) -> ObjectSource {
        ObjectSource::new(Location::File(1), 0, length)
    }

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<Event>>>);

    impl Watcher for Recorder {
        fn notice(&self, event: &Event) {
            self.0.lock().unwrap().push(*event);
        }
    }

    #[test]
    fn blocking_requests_leave_half_for_non_blocking() {
        let controller = controller(1000);
        let (a, b) = (Attendant::new(), Attendant::new());

        let first = enqueue(&controller, file(400), Priority::new(5, 0), Some(&a));
        let second = enqueue(&controller, file(200), Priority::new(5, 0), Some(&b));
        let third = enqueue(&controller, file(550), Priority::new(1, 0), None);

        assert_eq!(
            entries(&controller),
            [(first, true, true), (second, true, false), (third, false, true)]
        );

        // Rescanning never revisits serviced entries.
        assert_eq!(controller.scan(Direction::Outbound).unwrap(), 0);
        assert_eq!(entries(&controller)[1], (second, true, false));
    }

    #[test]
    fn lower_priority_entries_are_not_blocked() {
        let controller = controller(1000);
        let big = enqueue(&controller, file(2000), Priority::new(9, 0), None);
        let small = enqueue(&controller, file(10), Priority::new(0, 0), None);
        assert_eq!(
            entries(&controller),
            [(big, false, false), (small, false, true)]
        );
    }

    #[test]
    fn all_media_must_fit() {
        let controller = AdmissionController::new(limited(1000, 100, 1000), Config::default());
        let attendant = Attendant::new();

        let needed = Space::new(Magnitude::new(100), Magnitude::new(60), Magnitude::ZERO);
        let slot = enqueue(&controller, needed, P, Some(&attendant));
        assert_eq!(entries(&controller), [(slot, true, false)]);

        let needed = Space::new(Magnitude::new(500), Magnitude::new(200), Magnitude::ZERO);
        assert!(matches!(
            controller.request(Direction::Outbound, needed, P, None),
            Ok(Admission::NotServiceable)
        ));

        let needed = Space::new(Magnitude::new(100), Magnitude::new(50), Magnitude::ZERO);
        assert!(matches!(
            controller.request(Direction::Outbound, needed, P, Some(&Attendant::new())),
            Ok(Admission::Granted)
        ));
        assert_eq!(entries(&controller), [(slot, true, false)]);
    }

    #[test]
    fn immediate_grants_are_shredded() {
        let recorder = Recorder::default();
        let controller =
            AdmissionController::with_watcher(limited(100, 0, 0), Config::default(), recorder.clone());

        assert!(matches!(
            controller.request(Direction::Outbound, file(100), P, None),
            Ok(Admission::Granted)
        ));
        assert!(entries(&controller).is_empty());
        assert_eq!(in_use(&controller), 0);

        let events = recorder.0.lock().unwrap();
        assert!(matches!(
            events[..],
            [
                Event::Queued { .. },
                Event::Serviced { .. },
                Event::Shredded { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn rejection_leaves_no_residue() {
        let controller = controller(100);
        let creation = controller
            .create_object(Direction::Outbound, file_source(500), P, None)
            .await
            .unwrap();
        assert_eq!(creation, Creation::NotCreated);
        assert!(entries(&controller).is_empty());
        assert_eq!(in_use(&controller), 0);
        assert!(controller.heap().is_empty());
    }

    #[tokio::test]
    async fn waiter_woken_by_release() {
        let controller = controller(1000);
        let Creation::Created(first) = controller
            .create_object(Direction::Outbound, file_source(900), P, None)
            .await
            .unwrap()
        else {
            panic!("first object not created");
        };

        let attendant = Attendant::new();
        let waiter = tokio::spawn({
            let controller = controller.clone();
            let attendant = attendant.clone();
            async move {
                controller
                    .create_object(Direction::Outbound, file_source(300), P, Some(&attendant))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(entries(&controller).len(), 1);

        assert_eq!(controller.destroy_object(first).unwrap(), Direction::Outbound);
        let Creation::Created(second) = waiter.await.unwrap().unwrap() else {
            panic!("second object not created");
        };

        assert_eq!(controller.heap().object(second).unwrap().0, [(Medium::File, 300)]);
        assert!(entries(&controller).is_empty());
        assert_eq!(in_use(&controller), 0);
    }

    #[tokio::test]
    async fn serviced_tickets_hold_their_space() {
        let controller = controller(100);
        let Creation::Created(filler) = controller
            .create_object(Direction::Outbound, file_source(80), P, None)
            .await
            .unwrap()
        else {
            panic!("filler not created");
        };

        let attendant = Attendant::new();
        let Ok(Admission::Pending(ticket)) =
            controller.request(Direction::Outbound, file(40), P, Some(&attendant))
        else {
            panic!("expected a pending ticket");
        };
        assert!(!ticket.is_serviced());

        controller.destroy_object(filler).unwrap();
        assert!(ticket.is_serviced());

        assert!(matches!(
            controller.request(Direction::Outbound, file(70), P, None),
            Ok(Admission::NotServiceable)
        ));
        assert!(matches!(
            controller.request(Direction::Outbound, file(60), P, None),
            Ok(Admission::Granted)
        ));

        assert_eq!(ticket.wait().await, WaitOutcome::Serviced);
        ticket.shred();
        assert_eq!(in_use(&controller), 0);
    }

    #[tokio::test]
    async fn paused_attendant_interrupts_creation() {
        let recorder = Recorder::default();
        let controller =
            AdmissionController::with_watcher(limited(100, 0, 0), Config::default(), recorder.clone());

        let attendant = Attendant::new();
        let waiter = tokio::spawn({
            let controller = controller.clone();
            let attendant = attendant.clone();
            async move {
                controller
                    .create_object(Direction::Outbound, file_source(80), P, Some(&attendant))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        attendant.pause();
        assert_eq!(waiter.await.unwrap().unwrap(), Creation::Interrupted);
        assert!(entries(&controller).is_empty());
        assert!(controller.heap().is_empty());

        let events = recorder.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::Interrupted { .. })));
        assert!(matches!(events.last(), Some(Event::Shredded { .. })));
    }

    #[tokio::test]
    async fn wait_with_deadline() {
        let controller = controller(100);
        let attendant = Attendant::new();
        let Ok(Admission::Pending(ticket)) =
            controller.request(Direction::Outbound, file(80), P, Some(&attendant))
        else {
            panic!("expected a pending ticket");
        };

        assert_eq!(
            ticket.wait_timeout(Duration::from_millis(20)).await,
            WaitOutcome::TimedOut
        );
        assert_eq!(entries(&controller), [(ticket.slot(), true, false)]);

        drop(ticket);
        assert!(entries(&controller).is_empty());
    }

    #[test]
    fn slots_run_out() {
        let controller = AdmissionController::new(
            limited(100, 100, 100),
            Config {
                max_requisitions: 1,
            },
        );
        let attendant = Attendant::new();
        let Ok(Admission::Pending(ticket)) =
            controller.request(Direction::Inbound, file(80), P, Some(&attendant))
        else {
            panic!("expected a pending ticket");
        };

        assert!(matches!(
            controller.request(Direction::Outbound, file(1), P, None),
            Err(Error::ResourceExhausted { limit: 1 })
        ));

        drop(ticket);
        assert!(matches!(
            controller.request(Direction::Outbound, file(1), P, None),
            Ok(Admission::Granted)
        ));
    }

    #[tokio::test]
    async fn invalid_arguments() {
        let controller = controller(100);
        let mut negative = Magnitude::ZERO;
        negative.reduce(1);
        assert!(matches!(
            controller.request(Direction::Outbound, Space::of(Medium::Heap, negative), P, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            controller
                .create_object(Direction::Outbound, file_source(0), P, None)
                .await,
            Err(Error::InvalidArgument(_))
        ));

        let missing = ObjectId::generate();
        assert!(matches!(
            controller.destroy_object(missing),
            Err(Error::Heap(HeapError::NotFound(id))) if id == missing
        ));
        assert_eq!(in_use(&controller), 0);
    }

    #[tokio::test]
    async fn empty_and_provisional_objects() {
        let full = controller(0);
        let Ok(Creation::Created(empty)) = full
            .create_object(Direction::Inbound, ObjectSource::empty(), P, None)
            .await
        else {
            panic!("empty object not created");
        };
        assert_eq!(full.heap().object(empty), Some((vec![], true)));

        let roomy = controller(100);
        let attendant = Attendant::new();
        let Ok(Creation::Created(attended)) = roomy
            .create_object(Direction::Inbound, file_source(10), P, Some(&attendant))
            .await
        else {
            panic!("attended object not created");
        };
        assert!(!roomy.heap().object(attended).unwrap().1);

        let Ok(Creation::Created(unattended)) = roomy
            .create_object(Direction::Inbound, file_source(10), P, None)
            .await
        else {
            panic!("unattended object not created");
        };
        assert!(roomy.heap().object(unattended).unwrap().1);
    }

    #[tokio::test]
    async fn composite_sources_count_every_medium() {
        let controller = controller(100);
        let Ok(Creation::Created(original)) = controller
            .create_object(Direction::Outbound, file_source(40), P, None)
            .await
        else {
            panic!("original not created");
        };

        let copy = ObjectSource::new(Location::Object(original), 0, 40);
        assert!(matches!(
            controller
                .create_object(Direction::Outbound, copy, P, None)
                .await,
            Ok(Creation::Created(_))
        ));
        assert_eq!(
            controller
                .create_object(Direction::Outbound, copy, P, None)
                .await
                .unwrap(),
            Creation::NotCreated
        );
    }

    #[tokio::test]
    async fn released_reservation_wakes_waiters() {
        let controller = controller(1000);
        let Ok(Creation::Created(filler)) = controller
            .create_object(Direction::Outbound, file_source(400), P, None)
            .await
        else {
            panic!("filler not created");
        };

        let attendant = Attendant::new();
        let Ok(Admission::Pending(waiter)) =
            controller.request(Direction::Outbound, file(200), P, Some(&attendant))
        else {
            panic!("expected a pending waiter");
        };

        // A creation between its grant and the release of its reservation.
        let Ok(Admission::Pending(held)) =
            controller.submit(Direction::Outbound, file(300), Priority::new(9, 0), None, true)
        else {
            panic!("expected a held grant");
        };
        assert!(held.is_serviced());
        controller
            .heap()
            .create_object(NewObject {
                direction: Direction::Outbound,
                source: file_source(300),
                reservation: Reservation::Reserved,
                provisional: false,
            })
            .unwrap();

        // The reservation and the new object count twice for now.
        controller.destroy_object(filler).unwrap();
        assert!(!waiter.is_serviced());

        drop(held);
        assert!(waiter.is_serviced());
        assert_eq!(
            waiter.wait_timeout(Duration::from_millis(100)).await,
            WaitOutcome::Serviced
        );
    }

    #[tokio::test]
    async fn ended_attendant_wins_over_servicing() {
        let controller = controller(100);
        let attendant = Attendant::new();
        let Ok(Admission::Pending(ticket)) =
            controller.submit(Direction::Outbound, file(10), P, Some(&attendant), true)
        else {
            panic!("expected a held grant");
        };
        assert!(ticket.is_serviced());

        attendant.pause();
        assert_eq!(ticket.wait().await, WaitOutcome::Cancelled);

        drop(ticket);
        assert_eq!(in_use(&controller), 0);
    }
}
