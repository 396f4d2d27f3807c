use lightkeeper::conflict::{conflict_with, detect_conflicts};
use lightkeeper::session::SessionId;
use lightkeeper::topology::{
    Device, Group, GroupMember, LeafTarget, SourcedLeaf, StreamTarget, TargetKind, Topology,
};
use proptest::prelude::*;

const DEVICES: [&str; 4] = ["porch", "eaves", "tree", "arch"];

/// A leaf on one of a handful of devices, whole or a short segment.
fn leaf_strategy() -> impl Strategy<Value = LeafTarget> {
    let device = prop::sample::select(DEVICES.to_vec());
    (device, prop::option::of((0u32..200, 0u32..60))).prop_map(|(device, range)| match range {
        None => LeafTarget::whole(device),
        Some((start, len)) => LeafTarget::segment(device, start, start + len),
    })
}

fn leaves_strategy() -> impl Strategy<Value = Vec<LeafTarget>> {
    prop::collection::vec(leaf_strategy(), 1..6)
}

fn sourced(leaves: &[LeafTarget]) -> Vec<SourcedLeaf> {
    leaves
        .iter()
        .map(|leaf| SourcedLeaf {
            leaf: leaf.clone(),
            source: TargetKind::Device,
        })
        .collect()
}

fn topology() -> Topology {
    let devices = DEVICES
        .iter()
        .map(|id| Device {
            id: id.to_string(),
            name: None,
            led_count: Some(150),
        })
        .collect();
    let groups = vec![Group {
        id: "everything".to_string(),
        name: None,
        members: DEVICES
            .iter()
            .map(|id| GroupMember {
                device_id: id.to_string(),
                start_led: None,
                end_led: None,
            })
            .collect(),
    }];
    Topology::new(devices, groups, Vec::new())
}

#[cfg(test)]
mod overlap_tests {
    use super::*;

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in leaf_strategy(), b in leaf_strategy()) {
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn a_leaf_overlaps_itself(a in leaf_strategy()) {
            prop_assert!(a.overlaps(&a));
        }

        #[test]
        fn whole_device_overlaps_every_leaf_on_it(a in leaf_strategy()) {
            prop_assert!(LeafTarget::whole(a.device_id.clone()).overlaps(&a));
        }
    }
}

#[cfg(test)]
mod conflict_tests {
    use super::*;

    proptest! {
        #[test]
        fn conflict_lists_exactly_the_overlapping_leaves(
            candidate in leaves_strategy(),
            session in leaves_strategy(),
        ) {
            let owned = sourced(&session);
            let expected: Vec<LeafTarget> = session
                .iter()
                .filter(|leaf| candidate.iter().any(|c| c.overlaps(leaf)))
                .cloned()
                .collect();

            match conflict_with(&candidate, SessionId(1), &owned) {
                None => prop_assert!(expected.is_empty()),
                Some(conflict) => {
                    prop_assert!(!conflict.overlapping_leaves.is_empty());
                    prop_assert_eq!(&conflict.overlapping_leaves, &expected);
                    // Shedding excludes each overlapping leaf; whatever still
                    // touches none of them keeps the session alive.
                    let survivors = session
                        .iter()
                        .filter(|leaf| !expected.iter().any(|shed| shed.overlaps(leaf)))
                        .count();
                    prop_assert_eq!(conflict.can_partial_stop, survivors > 0);
                    if conflict.can_partial_stop {
                        prop_assert!(conflict.overlapping_leaves.len() < owned.len());
                    }
                }
            }
        }

        #[test]
        fn disjoint_devices_never_conflict(session in leaves_strategy()) {
            let candidate = vec![LeafTarget::whole("garage")];
            prop_assert!(conflict_with(&candidate, SessionId(1), &sourced(&session)).is_none());
        }

        #[test]
        fn detection_ignores_session_order(
            candidate in leaves_strategy(),
            sessions in prop::collection::vec(leaves_strategy(), 0..5),
        ) {
            let owned: Vec<(SessionId, Vec<SourcedLeaf>)> = sessions
                .iter()
                .enumerate()
                .map(|(i, leaves)| (SessionId(i as u64 + 1), sourced(leaves)))
                .collect();

            let forward = detect_conflicts(
                &candidate,
                owned.iter().map(|(id, leaves)| (*id, leaves.as_slice())),
            );
            let backward = detect_conflicts(
                &candidate,
                owned.iter().rev().map(|(id, leaves)| (*id, leaves.as_slice())),
            );
            prop_assert_eq!(&forward, &backward);
            prop_assert!(forward.windows(2).all(|pair| pair[0].session_id < pair[1].session_id));
        }
    }
}

#[cfg(test)]
mod expansion_tests {
    use super::*;

    proptest! {
        #[test]
        fn expansion_has_no_duplicates_or_excluded_devices(
            picks in prop::collection::vec(prop::sample::select(DEVICES.to_vec()), 0..6),
            excluded in prop::collection::vec(prop::sample::select(DEVICES.to_vec()), 0..3),
            with_group in any::<bool>(),
        ) {
            let mut targets: Vec<StreamTarget> =
                picks.iter().map(|id| StreamTarget::device(*id)).collect();
            if with_group {
                targets.push(StreamTarget::group("everything"));
            }
            let exclusions: Vec<String> = excluded.iter().map(|id| id.to_string()).collect();

            let leaves = topology().expand(&targets, &exclusions);

            for (i, leaf) in leaves.iter().enumerate() {
                prop_assert!(!exclusions.contains(&leaf.device_id));
                prop_assert!(!leaves[..i].contains(leaf));
            }
            if !with_group {
                let first_seen: Vec<&str> = picks
                    .iter()
                    .copied()
                    .filter(|id| !excluded.contains(id))
                    .fold(Vec::new(), |mut seen, id| {
                        if !seen.contains(&id) {
                            seen.push(id);
                        }
                        seen
                    });
                let got: Vec<&str> = leaves.iter().map(|l| l.device_id.as_str()).collect();
                prop_assert_eq!(got, first_seen);
            }
        }
    }
}
