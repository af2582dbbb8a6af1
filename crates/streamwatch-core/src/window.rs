// ── Open window ──
//
// Per-service admission control for new item requests. `in_flight` counts
// requests transmitted but not yet refresh-complete; anything beyond the
// advertised capacity waits in FIFO order.

use std::collections::{HashMap, VecDeque};

use streamwatch_api::StreamId;

/// Result of asking to transmit a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Deferred,
}

#[derive(Debug, Default)]
struct ServiceWindow {
    /// `None` when the service advertises no window.
    capacity: Option<u32>,
    in_flight: u32,
    queue: VecDeque<StreamId>,
}

impl ServiceWindow {
    fn has_room(&self) -> bool {
        self.capacity.is_none_or(|cap| self.in_flight < cap)
    }
}

/// Open-window counters for every service of one connection.
#[derive(Debug)]
pub struct OpenWindow {
    obey: bool,
    services: HashMap<u16, ServiceWindow>,
}

impl OpenWindow {
    /// With `obey == false` every request is admitted and nothing is counted.
    pub fn new(obey: bool) -> Self {
        Self {
            obey,
            services: HashMap::new(),
        }
    }

    /// Admit `stream` on `service_id` or queue it behind earlier requests.
    pub fn try_admit(&mut self, service_id: u16, stream: StreamId) -> Admission {
        if !self.obey {
            return Admission::Admitted;
        }
        let window = self.services.entry(service_id).or_default();
        if window.queue.is_empty() && window.has_room() {
            window.in_flight += 1;
            Admission::Admitted
        } else {
            window.queue.push_back(stream);
            Admission::Deferred
        }
    }

    /// Free one in-flight slot on `service_id`.
    pub fn release(&mut self, service_id: u16) {
        if !self.obey {
            return;
        }
        if let Some(window) = self.services.get_mut(&service_id) {
            window.in_flight = window.in_flight.saturating_sub(1);
        }
    }

    pub fn set_capacity(&mut self, service_id: u16, capacity: Option<u32>) {
        if !self.obey {
            return;
        }
        self.services.entry(service_id).or_default().capacity = capacity;
    }

    /// Drop a request that was queued but never transmitted.
    pub fn remove_queued(&mut self, service_id: u16, stream: StreamId) -> bool {
        let Some(window) = self.services.get_mut(&service_id) else {
            return false;
        };
        let before = window.queue.len();
        window.queue.retain(|s| *s != stream);
        window.queue.len() != before
    }

    /// Admit queued requests while there is room, oldest first.
    pub fn drain(&mut self, service_id: u16) -> Vec<StreamId> {
        let mut admitted = Vec::new();
        if let Some(window) = self.services.get_mut(&service_id) {
            while window.has_room() {
                let Some(stream) = window.queue.pop_front() else {
                    break;
                };
                window.in_flight += 1;
                admitted.push(stream);
            }
        }
        admitted
    }

    /// Forget a service entirely. Returns the streams that were queued on it.
    pub fn remove_service(&mut self, service_id: u16) -> Vec<StreamId> {
        self.services
            .remove(&service_id)
            .map(|w| w.queue.into_iter().collect())
            .unwrap_or_default()
    }

    /// Reset every counter and queue, keeping nothing.
    pub fn clear(&mut self) {
        self.services.clear();
    }

    pub fn in_flight(&self, service_id: u16) -> u32 {
        self.services.get(&service_id).map_or(0, |w| w.in_flight)
    }

    pub fn queued(&self, service_id: u16) -> usize {
        self.services.get(&service_id).map_or(0, |w| w.queue.len())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unbounded_without_capacity() {
        let mut window = OpenWindow::new(true);
        for stream in 3..10 {
            assert_eq!(window.try_admit(1, stream), Admission::Admitted);
        }
        assert_eq!(window.in_flight(1), 7);
    }

    #[test]
    fn queues_beyond_capacity_and_drains_fifo() {
        let mut window = OpenWindow::new(true);
        window.set_capacity(1, Some(2));
        assert_eq!(window.try_admit(1, 3), Admission::Admitted);
        assert_eq!(window.try_admit(1, 4), Admission::Admitted);
        assert_eq!(window.try_admit(1, 5), Admission::Deferred);
        assert_eq!(window.try_admit(1, 6), Admission::Deferred);
        assert_eq!(window.queued(1), 2);

        window.release(1);
        assert_eq!(window.drain(1), vec![5]);
        assert_eq!(window.in_flight(1), 2);
        assert!(window.drain(1).is_empty());

        window.release(1);
        window.release(1);
        assert_eq!(window.drain(1), vec![6]);
        assert_eq!(window.in_flight(1), 1);
    }

    #[test]
    fn removing_queued_request_leaves_in_flight_alone() {
        let mut window = OpenWindow::new(true);
        window.set_capacity(1, Some(1));
        window.try_admit(1, 3);
        window.try_admit(1, 4);
        assert!(window.remove_queued(1, 4));
        assert!(!window.remove_queued(1, 4));
        assert_eq!(window.in_flight(1), 1);
        window.release(1);
        assert!(window.drain(1).is_empty());
    }

    #[test]
    fn widening_capacity_admits_queued() {
        let mut window = OpenWindow::new(true);
        window.set_capacity(1, Some(1));
        window.try_admit(1, 3);
        window.try_admit(1, 4);
        window.try_admit(1, 5);
        window.set_capacity(1, None);
        assert_eq!(window.drain(1), vec![4, 5]);
    }

    #[test]
    fn disobeyed_window_admits_everything() {
        let mut window = OpenWindow::new(false);
        window.set_capacity(1, Some(0));
        assert_eq!(window.try_admit(1, 3), Admission::Admitted);
        assert_eq!(window.in_flight(1), 0);
    }
}
