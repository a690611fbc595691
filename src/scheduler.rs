//! Single-slot redraw scheduling
//!
//! Invalidations arriving in a burst (camera drags, slider edits) collapse into
//! one pending redraw. The host drains the slot from its display-refresh
//! callback. The pending ticket carries the generation of the newest
//! invalidation it covers.

/// Handle for one scheduled redraw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedrawTicket {
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct RedrawScheduler {
    pending: Option<RedrawTicket>,
    generation: u64,
}

impl RedrawScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invalidation. Returns true if this armed a new redraw, false
    /// if one was already pending (the pending one now covers this request).
    pub fn request(&mut self) -> bool {
        self.generation += 1;
        match &mut self.pending {
            Some(ticket) => {
                ticket.generation = self.generation;
                false
            }
            None => {
                self.pending = Some(RedrawTicket { generation: self.generation });
                true
            }
        }
    }

    /// Drop the pending redraw, if any.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending redraw so the caller can run it.
    pub fn take(&mut self) -> Option<RedrawTicket> {
        self.pending.take()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_coalesces_into_one_redraw() {
        let mut scheduler = RedrawScheduler::new();
        assert!(scheduler.request());
        assert!(!scheduler.request());
        assert!(!scheduler.request());

        // the single ticket covers the newest request
        let ticket = scheduler.take().unwrap();
        assert_eq!(ticket.generation, 3);
        assert_eq!(ticket.generation, scheduler.generation());
        assert!(scheduler.take().is_none());
    }

    #[test]
    fn test_cancel_empties_slot() {
        let mut scheduler = RedrawScheduler::new();
        assert!(!scheduler.cancel());
        scheduler.request();
        assert!(scheduler.cancel());
        assert!(!scheduler.is_pending());
        // re-armed by the next invalidation
        assert!(scheduler.request());
    }

    #[test]
    fn test_request_after_take_arms_new_ticket() {
        let mut scheduler = RedrawScheduler::new();
        scheduler.request();
        let ticket = scheduler.take().unwrap();
        assert!(scheduler.request());
        let next = scheduler.take().unwrap();
        assert!(next.generation > ticket.generation);
    }
}
