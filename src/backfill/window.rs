//! Window planning for one backfill batch.
//!
//! Every `(vehicle, dataset)` pair has a cursor: its checkpoint, or the historical start
//! when it has none. The planner always serves the pair whose cursor is furthest behind, so
//! a shared window budget spreads evenly instead of draining one pair first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Duration, Utc};

use crate::models::Dataset;

/// Half-open time slice `[start, end)` fetched in one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A window assigned to one vehicle and dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWindow {
    pub vehicle_no: String,
    pub dataset: Dataset,
    pub window: TimeWindow,
}

#[derive(Debug)]
pub struct WindowPlanner {
    width: Duration,
    now: DateTime<Utc>,
    queue: BinaryHeap<Reverse<(DateTime<Utc>, String, Dataset)>>,
}

impl WindowPlanner {
    pub fn new(width: Duration, now: DateTime<Utc>) -> Self {
        Self {
            width,
            now,
            queue: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, vehicle_no: impl Into<String>, dataset: Dataset, cursor: DateTime<Utc>) {
        self.queue.push(Reverse((cursor, vehicle_no.into(), dataset)));
    }

    /// Next window to fetch, or `None` once every pair has caught up with `now`.
    ///
    /// A window is only handed out when it lies entirely in the past.
    pub fn next_window(&mut self) -> Option<PlannedWindow> {
        let Reverse((cursor, vehicle_no, dataset)) = self.queue.pop()?;
        let end = cursor + self.width;
        if end > self.now {
            // Every remaining cursor is at or past this one.
            self.queue.clear();
            return None;
        }
        Some(PlannedWindow {
            vehicle_no,
            dataset,
            window: TimeWindow { start: cursor, end },
        })
    }

    /// Requeue the pair after a successful window. Failed windows are simply not
    /// completed, which parks the pair until the next batch.
    pub fn complete(&mut self, planned: PlannedWindow) {
        self.push(planned.vehicle_no, planned.dataset, planned.window.end);
    }

    pub fn pending_pairs(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn serves_the_pair_furthest_behind_first() {
        let mut planner = WindowPlanner::new(Duration::seconds(300), at(10_000));
        planner.push("V1", Dataset::Gps, at(900));
        planner.push("V2", Dataset::Gps, at(0));
        planner.push("V1", Dataset::Can, at(300));

        let first = planner.next_window().unwrap();
        assert_eq!(first.vehicle_no, "V2");
        assert_eq!(first.window, TimeWindow { start: at(0), end: at(300) });
        planner.complete(first);

        // V2/gps now sits at 300 alongside V1/can; the heap breaks the tie by vehicle.
        let second = planner.next_window().unwrap();
        assert_eq!((second.vehicle_no.as_str(), second.dataset), ("V1", Dataset::Can));
    }

    #[test]
    fn windows_reaching_past_now_are_not_planned() {
        let mut planner = WindowPlanner::new(Duration::seconds(300), at(500));
        planner.push("V1", Dataset::Fuel, at(0));

        let window = planner.next_window().unwrap();
        planner.complete(window);
        // [300, 600) would end in the future.
        assert!(planner.next_window().is_none());
        assert_eq!(planner.pending_pairs(), 0);
    }

    #[test]
    fn a_failed_window_parks_its_pair() {
        let mut planner = WindowPlanner::new(Duration::seconds(60), at(10_000));
        planner.push("V1", Dataset::Gps, at(0));
        planner.push("V2", Dataset::Gps, at(30));

        let failed = planner.next_window().unwrap();
        assert_eq!(failed.vehicle_no, "V1");
        // not completed

        let next = planner.next_window().unwrap();
        assert_eq!(next.vehicle_no, "V2");
        planner.complete(next);
        let again = planner.next_window().unwrap();
        assert_eq!(again.vehicle_no, "V2");
        assert_eq!(again.window.start, at(90));
    }
}
