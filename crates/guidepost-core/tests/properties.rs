use chrono::NaiveDate;
use proptest::prelude::*;

use guidepost_core::groups::{move_participant, GroupStore};
use guidepost_core::models::{BucketType, Participant, TicketBucket, TourGroup};
use guidepost_core::tickets::{apply_assign, apply_release};

fn party() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=8).prop_flat_map(|count| (Just(count), 0..=count))
}

fn groups_strategy() -> impl Strategy<Value = Vec<TourGroup>> {
    prop::collection::vec(prop::collection::vec(party(), 0..5), 1..5).prop_map(|groups| {
        groups
            .into_iter()
            .enumerate()
            .map(|(g, parties)| {
                let id = format!("g{}", g);
                TourGroup {
                    id: id.clone(),
                    tour_id: "t1".to_string(),
                    name: format!("Group {}", g + 1),
                    entry_time: None,
                    guide_id: None,
                    // Deliberately stale cache
                    size: 99,
                    child_count: 7,
                    version: 0,
                    participants: parties
                        .into_iter()
                        .enumerate()
                        .map(|(p, (count, child_count))| Participant {
                            id: format!("{}-p{}", id, p),
                            name: format!("Party {}", p),
                            booking_ref: None,
                            count,
                            child_count,
                            group_id: Some(id.clone()),
                        })
                        .collect(),
                }
            })
            .collect()
    })
}

fn bucket(max_tickets: u32) -> TicketBucket {
    TicketBucket {
        id: "b1".to_string(),
        reference: "VER-1".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        bucket_type: BucketType::Small,
        max_tickets,
        allocated_tickets: 0,
        access_time: None,
        assigned_tours: Vec::new(),
        version: 0,
    }
}

#[derive(Debug, Clone)]
enum BucketOp {
    Assign(u8, u32),
    Release(u8),
}

fn bucket_op() -> impl Strategy<Value = BucketOp> {
    prop_oneof![
        (0u8..6, 0u32..15).prop_map(|(tour, n)| BucketOp::Assign(tour, n)),
        (0u8..6).prop_map(BucketOp::Release),
    ]
}

proptest! {
    #[test]
    fn test_moves_keep_totals_and_conserve_people(
        groups in groups_strategy(),
        moves in prop::collection::vec((0usize..8, 0usize..5, 0usize..5), 0..20),
    ) {
        let mut store = GroupStore::new();
        store.load(groups);
        let total = store.roster_totals();

        for (pick, from, to) in moves {
            let participant = store
                .group(from)
                .and_then(|g| g.participants.get(pick))
                .map(|p| p.id.clone())
                .unwrap_or_else(|| "missing".to_string());
            let _ = move_participant(&mut store, &participant, from, to);

            for group in store.groups() {
                prop_assert!(group.is_consistent());
                prop_assert!(group.participants.iter().all(|p| p.group_id.as_deref() == Some(group.id.as_str())));
            }
            prop_assert_eq!(store.roster_totals(), total);
        }
    }

    #[test]
    fn test_same_group_move_changes_nothing(groups in groups_strategy(), index in 0usize..5) {
        let mut store = GroupStore::new();
        store.load(groups);
        let before = store.snapshot();
        let participant = store
            .group(index)
            .and_then(|g| g.participants.first())
            .map(|p| p.id.clone())
            .unwrap_or_default();
        let _ = move_participant(&mut store, &participant, index, index);
        prop_assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity(
        max in 0u32..30,
        ops in prop::collection::vec(bucket_op(), 0..40),
    ) {
        let mut b = bucket(max);
        for op in ops {
            match op {
                BucketOp::Assign(tour, n) => {
                    let tour = format!("T{}", tour);
                    let was_assigned = b.is_assigned(&tour);
                    let result = apply_assign(&mut b, &tour, n);
                    if was_assigned {
                        prop_assert!(result.is_err());
                    }
                }
                BucketOp::Release(tour) => {
                    let _ = apply_release(&mut b, &format!("T{}", tour));
                }
            }
            prop_assert!(b.allocated_tickets <= b.max_tickets);
            let charged: u32 = b.assigned_tours.iter().map(|a| a.tickets).sum();
            prop_assert_eq!(charged, b.allocated_tickets);
        }
    }
}
