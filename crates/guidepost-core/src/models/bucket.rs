use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::null_as_default;

/// Capacity tier of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum BucketType {
    #[default]
    Small,
    Large,
}

/// Tickets a bucket currently supplies to one tour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TourAllocation {
    pub tour_id: String,
    pub tickets: u32,
}

/// A finite pool of venue entrance tickets for one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TicketBucket {
    pub id: String,
    pub reference: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub bucket_type: BucketType,
    pub max_tickets: u32,
    #[serde(default)]
    pub allocated_tickets: u32,
    #[serde(default)]
    pub access_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assigned_tours: Vec<TourAllocation>,
    #[serde(default)]
    pub version: u64,
}

impl TicketBucket {
    /// Tickets still available. Zero when an administrator shrank
    /// `max_tickets` below what is already allocated.
    pub fn remaining(&self) -> u32 {
        self.max_tickets.saturating_sub(self.allocated_tickets)
    }

    pub fn is_assigned(&self, tour_id: &str) -> bool {
        self.assigned_tours.iter().any(|a| a.tour_id == tour_id)
    }

    /// Tickets charged to a tour, if the tour is assigned.
    pub fn charge_for(&self, tour_id: &str) -> Option<u32> {
        self.assigned_tours
            .iter()
            .find(|a| a.tour_id == tour_id)
            .map(|a| a.tickets)
    }

    pub fn tour_ids(&self) -> Vec<&str> {
        self.assigned_tours.iter().map(|a| a.tour_id.as_str()).collect()
    }

    pub fn is_over_allocated(&self) -> bool {
        self.allocated_tickets > self.max_tickets
    }

    pub fn display_usage(&self) -> String {
        format!("{}/{} tickets", self.allocated_tickets, self.max_tickets)
    }
}

/// Administrator-editable fields of a bucket. Allocations are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BucketDraft {
    pub reference: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub bucket_type: BucketType,
    pub max_tickets: u32,
    #[serde(default)]
    pub access_time: Option<NaiveTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(max: u32, allocated: u32) -> TicketBucket {
        TicketBucket {
            id: "b1".to_string(),
            reference: "VER-0601-A".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            bucket_type: BucketType::Small,
            max_tickets: max,
            allocated_tickets: allocated,
            access_time: None,
            assigned_tours: vec![TourAllocation {
                tour_id: "t1".to_string(),
                tickets: allocated,
            }],
            version: 0,
        }
    }

    #[test]
    fn test_remaining() {
        assert_eq!(bucket(10, 6).remaining(), 4);
        assert_eq!(bucket(10, 10).remaining(), 0);
    }

    #[test]
    fn test_remaining_saturates_when_over_allocated() {
        let b = bucket(4, 6);
        assert_eq!(b.remaining(), 0);
        assert!(b.is_over_allocated());
    }

    #[test]
    fn test_charge_for() {
        let b = bucket(10, 6);
        assert!(b.is_assigned("t1"));
        assert_eq!(b.charge_for("t1"), Some(6));
        assert_eq!(b.charge_for("t2"), None);
        assert_eq!(b.tour_ids(), vec!["t1"]);
    }

    #[test]
    fn test_deserialize_with_null_tours() {
        let json = r#"{
            "id": "b2", "reference": "LOU-1", "date": "2024-06-01",
            "bucket_type": "large", "max_tickets": 30, "assigned_tours": null
        }"#;
        let b: TicketBucket = serde_json::from_str(json).unwrap();
        assert_eq!(b.bucket_type, BucketType::Large);
        assert_eq!(b.allocated_tickets, 0);
        assert!(b.assigned_tours.is_empty());
        assert_eq!(b.display_usage(), "0/30 tickets");
    }
}
