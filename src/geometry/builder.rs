//! Pull-based preview geometry construction under a memory budget.
//!
//! The builder consumes G-code segments one at a time, groups consecutive
//! extrusions into polylines and simplifies each closed polyline with
//! Douglas–Peucker at the tier tolerance. Memory is accounted as
//! `points · tube_sides · VERTEX_BYTES`.
//!
//! Every [`GeometryBudgetManager::CHECK_INTERVAL_SEGMENTS`] segments the
//! budget is polled. `Degrade` drops one tier and rebuilds everything seen
//! so far at the new tier before continuing; `Abort` stops and keeps the
//! partial geometry. A system-wide memory check runs every
//! [`GeometryBudgetManager::SYSTEM_CHECK_INTERVAL_SEGMENTS`] segments.

use super::budget::{BudgetAction, BudgetConfig, GeometryBudgetManager};

/// Bytes per generated vertex (position + normal, `f32` each, + packed colour).
pub const VERTEX_BYTES: u64 = 28;

/// A point in machine coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    fn length_sq(self) -> f32 {
        self.dot(self)
    }
}

/// One parsed G-code move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcodeSegment {
    pub start: Vec3,
    pub end: Vec3,
    /// Filament extruded over the move (mm); 0 for travels.
    pub extrusion: f32,
    pub is_travel: bool,
}

impl GcodeSegment {
    pub fn extrude(start: Vec3, end: Vec3, extrusion: f32) -> Self {
        Self {
            start,
            end,
            extrusion,
            is_travel: false,
        }
    }

    pub fn travel(start: Vec3, end: Vec3) -> Self {
        Self {
            start,
            end,
            extrusion: 0.0,
            is_travel: true,
        }
    }
}

/// A simplified run of extrusion (or a travel line at tier 3).
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Vec3>,
    pub is_travel: bool,
}

/// How construction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Completed,
    /// Stopped early; the geometry holds what was built up to that point.
    Aborted,
}

/// Result of a build.
#[derive(Debug, Clone)]
pub struct BuiltGeometry {
    pub outcome: BuildOutcome,
    /// Tier the geometry was finally built at.
    pub tier: u8,
    pub polylines: Vec<Polyline>,
    /// Raw segments consumed.
    pub segments_processed: usize,
    /// Vertices kept after simplification.
    pub points_kept: usize,
    pub estimated_bytes: u64,
    pub degradations: u32,
}

/// Incremental builder; see the module docs.
pub struct GeometryBuilder<'a> {
    manager: &'a GeometryBudgetManager,
    config: BudgetConfig,
    /// Raw input kept so a degrade can rebuild at the lower tier.
    history: Vec<GcodeSegment>,
    polylines: Vec<Polyline>,
    open: Vec<Vec3>,
    usage: u64,
    degradations: u32,
    aborted: bool,
}

impl<'a> GeometryBuilder<'a> {
    pub fn new(manager: &'a GeometryBudgetManager, config: BudgetConfig) -> Self {
        Self {
            manager,
            config,
            history: Vec::new(),
            polylines: Vec::new(),
            open: Vec::new(),
            usage: 0,
            degradations: 0,
            aborted: false,
        }
    }

    /// Builder planned from live memory for a file of `segment_count`
    /// segments.
    pub fn planned(manager: &'a GeometryBudgetManager, segment_count: u64) -> Self {
        Self::new(manager, manager.plan(segment_count))
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Current estimated vertex memory, including the open polyline.
    pub fn usage_bytes(&self) -> u64 {
        self.usage + self.polyline_bytes(self.open.len(), false)
    }

    /// Feed one segment. Returns the budget decision taken at this segment
    /// (`Continue` between checks). After `Abort` further input is ignored.
    pub fn push(&mut self, segment: GcodeSegment) -> BudgetAction {
        if self.aborted {
            return BudgetAction::Abort;
        }

        self.history.push(segment);
        self.add_segment(segment);

        let processed = self.history.len();
        if processed % GeometryBudgetManager::SYSTEM_CHECK_INTERVAL_SEGMENTS == 0
            && self.manager.check_system_critical()
        {
            tracing::warn!(processed, "aborting geometry build: system memory critical");
            self.abort();
            return BudgetAction::Abort;
        }

        if processed % GeometryBudgetManager::CHECK_INTERVAL_SEGMENTS != 0 {
            return BudgetAction::Continue;
        }

        let action =
            self.manager
                .check_budget(self.usage_bytes(), self.config.budget_bytes, self.config.tier);
        match action {
            BudgetAction::Continue => {}
            BudgetAction::Degrade => self.degrade(),
            BudgetAction::Abort => {
                tracing::warn!(
                    processed,
                    usage = self.usage_bytes(),
                    budget = self.config.budget_bytes,
                    "aborting geometry build: over budget at tier 0"
                );
                self.abort();
            }
        }
        action
    }

    /// Pull segments from `segments` until exhausted or aborted.
    pub fn build<I>(mut self, segments: I) -> BuiltGeometry
    where
        I: IntoIterator<Item = GcodeSegment>,
    {
        for segment in segments {
            if self.push(segment) == BudgetAction::Abort {
                break;
            }
        }
        self.finish()
    }

    /// Close the open polyline and return the geometry.
    pub fn finish(mut self) -> BuiltGeometry {
        self.close_polyline();
        let points_kept = self.polylines.iter().map(|p| p.points.len()).sum();
        BuiltGeometry {
            outcome: if self.aborted {
                BuildOutcome::Aborted
            } else {
                BuildOutcome::Completed
            },
            tier: self.config.tier,
            polylines: self.polylines,
            segments_processed: self.history.len(),
            points_kept,
            estimated_bytes: self.usage,
            degradations: self.degradations,
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn add_segment(&mut self, segment: GcodeSegment) {
        if segment.is_travel {
            self.close_polyline();
            if self.config.include_travels {
                self.usage += self.polyline_bytes(2, true);
                self.polylines.push(Polyline {
                    points: vec![segment.start, segment.end],
                    is_travel: true,
                });
            }
            return;
        }

        match self.open.last() {
            Some(&last) if last == segment.start => {}
            Some(_) => {
                self.close_polyline();
                self.open.push(segment.start);
            }
            None => self.open.push(segment.start),
        }
        self.open.push(segment.end);
    }

    fn close_polyline(&mut self) {
        if self.open.len() < 2 {
            self.open.clear();
            return;
        }
        let raw = std::mem::take(&mut self.open);
        let points = simplify(&raw, self.config.simplification_tolerance);
        self.usage += self.polyline_bytes(points.len(), false);
        self.polylines.push(Polyline {
            points,
            is_travel: false,
        });
    }

    fn polyline_bytes(&self, points: usize, is_travel: bool) -> u64 {
        // Travels render as plain lines.
        let sides = if is_travel {
            1
        } else {
            u64::from(self.config.tube_sides)
        };
        points as u64 * sides * VERTEX_BYTES
    }

    fn degrade(&mut self) {
        let from = self.config.tier;
        let to = from.saturating_sub(1);
        self.config = GeometryBudgetManager::tier_config(to, self.config.budget_bytes);
        self.degradations += 1;
        tracing::info!(from, to, segments = self.history.len(), "degrading geometry tier");

        self.polylines.clear();
        self.open.clear();
        self.usage = 0;
        let history = std::mem::take(&mut self.history);
        for segment in &history {
            self.add_segment(*segment);
        }
        self.history = history;
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// Douglas–Peucker simplification. Endpoints are always kept.
pub fn simplify(points: &[Vec3], tolerance: f32) -> Vec<Vec3> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let tol_sq = tolerance * tolerance;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let (mut index, mut max_sq) = (first, 0.0f32);
        for i in first + 1..last {
            let d = distance_to_segment_sq(points[i], points[first], points[last]);
            if d > max_sq {
                index = i;
                max_sq = d;
            }
        }
        if max_sq > tol_sq {
            keep[index] = true;
            stack.push((first, index));
            stack.push((index, last));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn distance_to_segment_sq(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b.sub(a);
    let len_sq = ab.length_sq();
    if len_sq == 0.0 {
        return p.sub(a).length_sq();
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    let closest = Vec3::new(a.x + ab.x * t, a.y + ab.y * t, a.z + ab.z * t);
    p.sub(closest).length_sq()
}
