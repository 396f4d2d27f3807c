//! Device topology and target expansion.
//!
//! Stream targets reference a device, a group of device segments, or a
//! virtual device stitched together from LED ranges. Expansion flattens any
//! list of targets into concrete [`LeafTarget`]s, the unit of streaming
//! ownership used by conflict detection.
//!
//! Expansion never fails. References to unknown devices, groups or virtual
//! devices are skipped and reported, because topology and stored targets can
//! briefly disagree while the user is editing them. Stored LED ranges are not
//! trusted either: inverted ranges are dropped and ranges running past the end
//! of a device are clipped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type DeviceId = String;

/// Reference to something an effect can be streamed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamTarget {
    Device { id: String },
    Group { id: String },
    Virtual { id: String },
}

impl StreamTarget {
    pub fn device(id: impl Into<String>) -> Self {
        StreamTarget::Device { id: id.into() }
    }

    pub fn group(id: impl Into<String>) -> Self {
        StreamTarget::Group { id: id.into() }
    }

    pub fn virtual_device(id: impl Into<String>) -> Self {
        StreamTarget::Virtual { id: id.into() }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            StreamTarget::Device { .. } => TargetKind::Device,
            StreamTarget::Group { .. } => TargetKind::Group,
            StreamTarget::Virtual { .. } => TargetKind::Virtual,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            StreamTarget::Device { id } | StreamTarget::Group { id } | StreamTarget::Virtual { id } => {
                id
            }
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Device,
    Group,
    Virtual,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Device => write!(f, "device"),
            TargetKind::Group => write!(f, "group"),
            TargetKind::Virtual => write!(f, "virtual"),
        }
    }
}

/// A whole device, or a contiguous inclusive LED range on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafTarget {
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_led: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_led: Option<u32>,
}

impl LeafTarget {
    pub fn whole(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            start_led: None,
            end_led: None,
        }
    }

    pub fn segment(device_id: impl Into<String>, start_led: u32, end_led: u32) -> Self {
        Self {
            device_id: device_id.into(),
            start_led: Some(start_led),
            end_led: Some(end_led),
        }
    }

    pub fn is_whole_device(&self) -> bool {
        self.start_led.is_none() && self.end_led.is_none()
    }

    /// Inclusive LED bounds, `None` for a whole device. A single missing bound
    /// is open-ended on that side.
    pub fn bounds(&self) -> Option<(u32, u32)> {
        match (self.start_led, self.end_led) {
            (None, None) => None,
            (Some(start), None) => Some((start, u32::MAX)),
            (None, Some(end)) => Some((0, end)),
            (Some(start), Some(end)) => Some((start, end)),
        }
    }

    /// Same device and either side unbounded, or the LED ranges intersect.
    pub fn overlaps(&self, other: &LeafTarget) -> bool {
        if self.device_id != other.device_id {
            return false;
        }
        match (self.bounds(), other.bounds()) {
            (Some((a_start, a_end)), Some((b_start, b_end))) => {
                a_start <= b_end && b_start <= a_end
            }
            _ => true,
        }
    }
}

impl fmt::Display for LeafTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bounds() {
            None => write!(f, "{}", self.device_id),
            Some((start, end)) if end == u32::MAX => write!(f, "{}[{start}..]", self.device_id),
            Some((start, end)) => write!(f, "{}[{start}..={end}]", self.device_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    /// Number of LEDs; ranges are clipped against it when known.
    #[serde(default)]
    pub led_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub device_id: DeviceId,
    #[serde(default)]
    pub start_led: Option<u32>,
    #[serde(default)]
    pub end_led: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualLedRange {
    pub device_id: DeviceId,
    pub start_led: u32,
    pub end_led: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub led_ranges: Vec<VirtualLedRange>,
}

/// A leaf together with the kind of target it was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedLeaf {
    pub leaf: LeafTarget,
    pub source: TargetKind,
}

/// Why part of a target list produced no leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownTarget(StreamTarget),
    UnknownDevice { target: StreamTarget, device_id: DeviceId },
    InvertedRange { target: StreamTarget, leaf: LeafTarget },
    RangeBeyondDevice { target: StreamTarget, leaf: LeafTarget, led_count: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownTarget(target) => write!(f, "{target} does not exist"),
            SkipReason::UnknownDevice { target, device_id } => {
                write!(f, "{target} references unknown device '{device_id}'")
            }
            SkipReason::InvertedRange { target, leaf } => {
                write!(f, "{target} has inverted LED range {leaf}")
            }
            SkipReason::RangeBeyondDevice {
                target,
                leaf,
                led_count,
            } => write!(f, "{target} range {leaf} starts past the device's {led_count} LEDs"),
        }
    }
}

/// Result of expanding a target list, including what had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub leaves: Vec<SourcedLeaf>,
    pub skipped: Vec<SkipReason>,
}

impl Expansion {
    pub fn leaf_targets(&self) -> Vec<LeafTarget> {
        self.leaves.iter().map(|s| s.leaf.clone()).collect()
    }

    fn push(&mut self, leaf: LeafTarget, source: TargetKind) {
        if !self.leaves.iter().any(|existing| existing.leaf == leaf) {
            self.leaves.push(SourcedLeaf { leaf, source });
        }
    }
}

/// Devices, groups and virtual devices known to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    devices: HashMap<DeviceId, Device>,
    groups: HashMap<String, Group>,
    virtuals: HashMap<String, VirtualDevice>,
}

impl Topology {
    pub fn new(devices: Vec<Device>, groups: Vec<Group>, virtuals: Vec<VirtualDevice>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            virtuals: virtuals.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn virtual_device(&self, id: &str) -> Option<&VirtualDevice> {
        self.virtuals.get(id)
    }

    pub fn contains(&self, target: &StreamTarget) -> bool {
        match target {
            StreamTarget::Device { id } => self.devices.contains_key(id),
            StreamTarget::Group { id } => self.groups.contains_key(id),
            StreamTarget::Virtual { id } => self.virtuals.contains_key(id),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Validate a stored range against the device and clip it to the LED count.
    fn sanitize(
        &self,
        target: &StreamTarget,
        device_id: &str,
        start_led: Option<u32>,
        end_led: Option<u32>,
        out: &mut Expansion,
    ) -> Option<LeafTarget> {
        let Some(device) = self.devices.get(device_id) else {
            out.skipped.push(SkipReason::UnknownDevice {
                target: target.clone(),
                device_id: device_id.to_string(),
            });
            return None;
        };

        let leaf = LeafTarget {
            device_id: device_id.to_string(),
            start_led,
            end_led,
        };
        let Some((start, end)) = leaf.bounds() else {
            return Some(leaf);
        };

        if start > end {
            out.skipped.push(SkipReason::InvertedRange {
                target: target.clone(),
                leaf,
            });
            return None;
        }

        match device.led_count {
            Some(count) if start >= count => {
                out.skipped.push(SkipReason::RangeBeyondDevice {
                    target: target.clone(),
                    leaf,
                    led_count: count,
                });
                None
            }
            Some(count) => Some(LeafTarget::segment(device_id, start, end.min(count - 1))),
            None => Some(leaf),
        }
    }

    /// Expand `targets` into leaves, dropping every leaf on an excluded device.
    ///
    /// Output order follows the input target order, then member/range order
    /// within each target. Duplicate leaves keep their first position.
    pub fn expand_with_report(&self, targets: &[StreamTarget], exclusions: &[DeviceId]) -> Expansion {
        let mut out = Expansion::default();
        let excluded = |device_id: &str| exclusions.iter().any(|d| d == device_id);

        for target in targets {
            match target {
                StreamTarget::Device { id } => {
                    if !self.devices.contains_key(id) {
                        out.skipped.push(SkipReason::UnknownTarget(target.clone()));
                    } else if !excluded(id) {
                        out.push(LeafTarget::whole(id.as_str()), TargetKind::Device);
                    }
                }
                StreamTarget::Group { id } => {
                    let Some(group) = self.groups.get(id) else {
                        out.skipped.push(SkipReason::UnknownTarget(target.clone()));
                        continue;
                    };
                    for member in &group.members {
                        if excluded(&member.device_id) {
                            continue;
                        }
                        if let Some(leaf) = self.sanitize(
                            target,
                            &member.device_id,
                            member.start_led,
                            member.end_led,
                            &mut out,
                        ) {
                            out.push(leaf, TargetKind::Group);
                        }
                    }
                }
                StreamTarget::Virtual { id } => {
                    let Some(virtual_device) = self.virtuals.get(id) else {
                        out.skipped.push(SkipReason::UnknownTarget(target.clone()));
                        continue;
                    };
                    for range in &virtual_device.led_ranges {
                        if excluded(&range.device_id) {
                            continue;
                        }
                        if let Some(leaf) = self.sanitize(
                            target,
                            &range.device_id,
                            Some(range.start_led),
                            Some(range.end_led),
                            &mut out,
                        ) {
                            out.push(leaf, TargetKind::Virtual);
                        }
                    }
                }
            }
        }

        out
    }

    /// Expand `targets` into plain leaves.
    pub fn expand(&self, targets: &[StreamTarget], exclusions: &[DeviceId]) -> Vec<LeafTarget> {
        self.expand_with_report(targets, exclusions).leaf_targets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_topology() -> Topology {
        Topology::new(
            vec![
                Device {
                    id: "porch".into(),
                    name: None,
                    led_count: Some(150),
                },
                Device {
                    id: "roof".into(),
                    name: None,
                    led_count: Some(300),
                },
                Device {
                    id: "tree".into(),
                    name: None,
                    led_count: None,
                },
            ],
            vec![Group {
                id: "front".into(),
                name: Some("Front yard".into()),
                members: vec![
                    GroupMember {
                        device_id: "porch".into(),
                        start_led: None,
                        end_led: None,
                    },
                    GroupMember {
                        device_id: "roof".into(),
                        start_led: Some(0),
                        end_led: Some(99),
                    },
                    GroupMember {
                        device_id: "ghost".into(),
                        start_led: None,
                        end_led: None,
                    },
                ],
            }],
            vec![VirtualDevice {
                id: "wrap".into(),
                name: None,
                led_ranges: vec![
                    VirtualLedRange {
                        device_id: "roof".into(),
                        start_led: 250,
                        end_led: 400,
                    },
                    VirtualLedRange {
                        device_id: "tree".into(),
                        start_led: 20,
                        end_led: 10,
                    },
                    VirtualLedRange {
                        device_id: "porch".into(),
                        start_led: 0,
                        end_led: 9,
                    },
                ],
            }],
        )
    }

    #[test]
    fn test_overlap_rules() {
        let whole = LeafTarget::whole("roof");
        let low = LeafTarget::segment("roof", 0, 99);
        let high = LeafTarget::segment("roof", 100, 199);
        let touching = LeafTarget::segment("roof", 99, 120);

        assert!(whole.overlaps(&low));
        assert!(low.overlaps(&whole));
        assert!(!low.overlaps(&high));
        assert!(low.overlaps(&touching));
        assert!(!low.overlaps(&LeafTarget::segment("porch", 0, 99)));
    }

    #[test]
    fn test_group_expansion_preserves_member_order_and_skips_unknown() {
        let topo = sample_topology();
        let report = topo.expand_with_report(&[StreamTarget::group("front")], &[]);

        assert_eq!(
            report.leaf_targets(),
            vec![LeafTarget::whole("porch"), LeafTarget::segment("roof", 0, 99)]
        );
        assert!(report.leaves.iter().all(|l| l.source == TargetKind::Group));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_virtual_ranges_are_clipped_and_validated() {
        let topo = sample_topology();
        let leaves = topo.expand(&[StreamTarget::virtual_device("wrap")], &[]);

        // roof 250..=400 clipped to the last LED, inverted tree range dropped.
        assert_eq!(
            leaves,
            vec![
                LeafTarget::segment("roof", 250, 299),
                LeafTarget::segment("porch", 0, 9),
            ]
        );
    }

    #[test]
    fn test_exclusions_drop_device_leaves() {
        let topo = sample_topology();
        let targets = [StreamTarget::group("front"), StreamTarget::virtual_device("wrap")];
        let full = topo.expand(&targets, &[]);
        let without_roof = topo.expand(&targets, &["roof".to_string()]);

        let removed: Vec<_> = full.iter().filter(|l| !without_roof.contains(l)).collect();
        assert!(removed.iter().all(|l| l.device_id == "roof"));
        assert_eq!(removed.len(), full.iter().filter(|l| l.device_id == "roof").count());
    }

    #[test]
    fn test_unknown_targets_are_skipped() {
        let topo = sample_topology();
        let report = topo.expand_with_report(
            &[StreamTarget::device("nope"), StreamTarget::device("tree")],
            &[],
        );
        assert_eq!(report.leaf_targets(), vec![LeafTarget::whole("tree")]);
        assert!(matches!(report.skipped[0], SkipReason::UnknownTarget(_)));
    }

    #[test]
    fn test_duplicate_leaves_collapse() {
        let topo = sample_topology();
        let leaves = topo.expand(
            &[StreamTarget::device("porch"), StreamTarget::group("front")],
            &[],
        );
        assert_eq!(leaves.iter().filter(|l| **l == LeafTarget::whole("porch")).count(), 1);
    }

    #[test]
    fn test_target_serde_shape() {
        let json = serde_json::to_string(&StreamTarget::group("front")).unwrap();
        assert_eq!(json, r#"{"type":"group","id":"front"}"#);
        let parsed: StreamTarget = serde_json::from_str(r#"{"type":"virtual","id":"wrap"}"#).unwrap();
        assert_eq!(parsed, StreamTarget::virtual_device("wrap"));
    }
}
