#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Ring buffer of authoritative snapshots and the interpolation contract
//! mirrored participants render from.
//!
//! The buffer keeps the last few snapshots in arrival order. The two most
//! recent ones form the current [`InterpolationPair`]; every unit that is
//! absent from the older snapshot of the pair is flagged as a teleport and
//! must be snapped into place rather than blended. With fewer than two
//! snapshots the pair is incomplete and consumers skip their render update.
//! Delivery order is trusted: a snapshot whose tick does not advance is kept
//! as-is and only noted in the debug log.

use std::{
    collections::{BTreeSet, VecDeque},
    time::Duration,
};

use convoy_core::{EntityId, RenderTarget, Snapshot};

/// Default number of retained snapshots.
pub const DEFAULT_CAPACITY: usize = 4;

/// Smallest capacity that can still form an interpolation pair.
pub const MIN_CAPACITY: usize = 2;

/// Bounded buffer of received snapshots.
#[derive(Clone, Debug)]
pub struct SnapshotBuffer {
    capacity: usize,
    snapshots: VecDeque<Snapshot>,
    teleports: BTreeSet<EntityId>,
    discontinuity_distance: Option<f32>,
}

impl SnapshotBuffer {
    /// Creates a buffer retaining at most `capacity` snapshots.
    ///
    /// Capacities below [`MIN_CAPACITY`] are raised to it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity + 1),
            teleports: BTreeSet::new(),
            discontinuity_distance: None,
        }
    }

    /// Also flags units that moved farther than `distance` between the pair.
    #[must_use]
    pub fn with_discontinuity_distance(mut self, distance: f32) -> Self {
        self.discontinuity_distance = Some(distance);
        self
    }

    /// Maximum number of retained snapshots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Reports whether no snapshot is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Most recently received snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Appends a snapshot, evicting the oldest once capacity is exceeded.
    pub fn push(&mut self, snapshot: Snapshot) {
        if let Some(latest) = self.snapshots.back() {
            if snapshot.tick <= latest.tick {
                log::debug!(
                    "snapshot {} arrived after {}; keeping arrival order",
                    snapshot.tick,
                    latest.tick
                );
            }
        }
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            let _ = self.snapshots.pop_front();
        }
        self.refresh_teleports();
    }

    /// Drops every retained snapshot.
    pub fn reset(&mut self) {
        self.snapshots.clear();
        self.teleports.clear();
    }

    /// Reports whether `id` is flagged as a teleport on the current pair.
    #[must_use]
    pub fn is_teleport(&self, id: EntityId) -> bool {
        self.teleports.contains(&id)
    }

    /// The pair to interpolate between, or `None` while incomplete.
    #[must_use]
    pub fn interpolation_pair(&self) -> Option<InterpolationPair<'_>> {
        let count = self.snapshots.len();
        if count < 2 {
            return None;
        }
        Some(InterpolationPair {
            prev: &self.snapshots[count - 2],
            next: &self.snapshots[count - 1],
            teleports: &self.teleports,
        })
    }

    fn refresh_teleports(&mut self) {
        self.teleports.clear();
        let count = self.snapshots.len();
        if count < 2 {
            return;
        }
        let prev = &self.snapshots[count - 2];
        let next = &self.snapshots[count - 1];
        for unit in &next.units {
            let discontinuous = match prev.unit(unit.id) {
                None => true,
                Some(before) => self.discontinuity_distance.map_or(false, |limit| {
                    before.pose.position.distance(unit.pose.position) > limit
                }),
            };
            if discontinuous {
                let _ = self.teleports.insert(unit.id);
            }
        }
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Two consecutive snapshots and the units that must be snapped between them.
#[derive(Clone, Copy, Debug)]
pub struct InterpolationPair<'a> {
    /// Older snapshot of the pair.
    pub prev: &'a Snapshot,
    /// Latest received snapshot.
    pub next: &'a Snapshot,
    /// Units absent from `prev` (or discontinuous) on this pair.
    pub teleports: &'a BTreeSet<EntityId>,
}

impl InterpolationPair<'_> {
    /// Reports whether `id` must be snapped rather than blended.
    #[must_use]
    pub fn is_teleport(&self, id: EntityId) -> bool {
        self.teleports.contains(&id)
    }

    /// Authority time separating the two snapshots.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(
            self.next
                .server_time_ms
                .saturating_sub(self.prev.server_time_ms),
        )
    }

    /// Blend fraction after `elapsed` local time since `next` arrived.
    ///
    /// Rendering trails the authority by one snapshot interval: the pair is
    /// traversed over one interval and then held at `next`.
    #[must_use]
    pub fn alpha_after(&self, elapsed: Duration) -> f32 {
        let interval = self.interval();
        if interval.is_zero() {
            return 1.0;
        }
        (elapsed.as_secs_f64() / interval.as_secs_f64()).clamp(0.0, 1.0) as f32
    }

    /// Render target for `id` at `alpha`, or `None` if `next` lacks the unit.
    #[must_use]
    pub fn blend(&self, id: EntityId, alpha: f32) -> Option<RenderTarget> {
        let target = self.next.unit(id)?;
        if self.is_teleport(id) {
            return Some(RenderTarget {
                pose: target.pose,
                snapped: true,
            });
        }
        let pose = match self.prev.unit(id) {
            Some(source) => source.pose.blend(&target.pose, alpha),
            None => target.pose,
        };
        Some(RenderTarget {
            pose,
            snapped: false,
        })
    }

    /// Render targets for every unit in `next`, in snapshot order.
    #[must_use]
    pub fn blend_all(&self, alpha: f32) -> Vec<(EntityId, RenderTarget)> {
        self.next
            .units
            .iter()
            .filter_map(|unit| self.blend(unit.id, alpha).map(|target| (unit.id, target)))
            .collect()
    }
}
