//! Turns the server's irregular frame arrivals into presentation timing:
//! the modal frame interval, the latency estimate, interpolation factors
//! and the late-update input delay.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::consts::{INTERVAL_BUCKET_MS, LATENCY_LEAD_PERCENT, STALL_TIMEOUT_MS, TICK_MS};
use crate::snapshot::Picture;

/// Presentation knobs consumed by the pipeline and snapshot assembly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Presentation {
    pub motion_smoothing: bool,
    pub mobile_fade_rate: f64,
    pub pict_fade_rate: f64,
    pub max_mobile_interp_pixels: i32,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            motion_smoothing: true,
            mobile_fade_rate: 1.0,
            pict_fade_rate: 1.0,
            max_mobile_interp_pixels: 100,
        }
    }
}

/// Tracks frame arrivals and reports the most common inter-frame interval,
/// rounded to 10 ms buckets.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    samples: VecDeque<u64>,
    last: Option<Instant>,
}

impl FrameClock {
    const HISTORY: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Records an arrival and returns the interval since the previous one.
    pub fn record(&mut self, now: Instant) -> Option<Duration> {
        let delta = self.last.map(|last| now.saturating_duration_since(last));
        self.last = Some(now);
        if let Some(delta) = delta {
            let ms = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
            let bucket = ms.saturating_add(INTERVAL_BUCKET_MS / 2) / INTERVAL_BUCKET_MS;
            if self.samples.len() == Self::HISTORY {
                self.samples.pop_front();
            }
            self.samples.push_back(bucket);
        }
        delta
    }

    /// The modal interval, or the nominal tick before any samples exist.
    pub fn interval(&self) -> Duration {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for &bucket in &self.samples {
            *counts.entry(bucket).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map_or(Duration::from_millis(TICK_MS), |(bucket, _)| {
                Duration::from_millis(bucket * INTERVAL_BUCKET_MS)
            })
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.last
    }

    /// True once a session has gone more than two seconds without a frame.
    pub fn is_stalled(&self, now: Instant) -> bool {
        self.last.map_or(false, |last| {
            now.saturating_duration_since(last) > Duration::from_millis(STALL_TIMEOUT_MS)
        })
    }
}

/// Round-trip estimate folded as `net = (7 * net + rtt) / 8`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyEma {
    net_ms: f64,
}

impl LatencyEma {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, rtt: Duration) -> Duration {
        self.net_ms = (7.0 * self.net_ms + rtt.as_secs_f64() * 1000.0) / 8.0;
        self.value()
    }

    pub fn value(&self) -> Duration {
        Duration::from_secs_f64(self.net_ms.max(0.0) / 1000.0)
    }

    pub fn millis(&self) -> f64 {
        self.net_ms
    }
}

/// How long the input sender waits after a frame arrives so its packet
/// reaches the server just before the next tick.
pub fn input_delay(interval: Duration, latency: Duration) -> Duration {
    let lead = latency * LATENCY_LEAD_PERCENT as u32 / 100;
    interval.saturating_sub(lead)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InterpFactors {
    pub alpha: f64,
    pub mobile_fade: f64,
    pub pict_fade: f64,
}

impl InterpFactors {
    pub const SETTLED: Self = Self {
        alpha: 1.0,
        mobile_fade: 1.0,
        pict_fade: 1.0,
    };

    pub fn compute(
        now: Instant,
        prev_time: Option<Instant>,
        cur_time: Option<Instant>,
        pres: &Presentation,
    ) -> Self {
        let (Some(prev), Some(cur)) = (prev_time, cur_time) else {
            return Self::SETTLED;
        };
        let interval = cur.saturating_duration_since(prev).as_secs_f64();
        if interval <= 0.0 {
            return Self::SETTLED;
        }
        let elapsed = now.saturating_duration_since(prev).as_secs_f64();
        let ratio = |rate: f64| {
            if rate <= 0.0 {
                1.0
            } else {
                (elapsed / (interval * rate)).clamp(0.0, 1.0)
            }
        };
        Self {
            alpha: if pres.motion_smoothing {
                (elapsed / interval).clamp(0.0, 1.0)
            } else {
                1.0
            },
            mobile_fade: ratio(pres.mobile_fade_rate),
            pict_fade: ratio(pres.pict_fade_rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawPosition {
    pub h: i32,
    pub v: i32,
    pub snapped: bool,
}

/// Places a sprite between its previous and current positions. A sprite
/// whose own motion (after removing the camera shift) exceeds
/// `max_pixels` snaps to its current position.
pub fn interpolate(
    prev: Option<(i16, i16)>,
    cur: (i16, i16),
    shift: (i32, i32),
    alpha: f64,
    max_pixels: i32,
) -> DrawPosition {
    let (ch, cv) = (cur.0 as i32, cur.1 as i32);
    let snap = DrawPosition {
        h: ch,
        v: cv,
        snapped: true,
    };
    let Some((ph, pv)) = prev.map(|(h, v)| (h as i32, v as i32)) else {
        return snap;
    };
    let dh = (ch - ph - shift.0) as i64;
    let dv = (cv - pv - shift.1) as i64;
    let max = max_pixels as i64;
    if dh * dh + dv * dv > max * max {
        return snap;
    }
    let lerp = |from: i32, to: i32| from + ((to - from) as f64 * alpha).round() as i32;
    DrawPosition {
        h: lerp(ph, ch),
        v: lerp(pv, cv),
        snapped: false,
    }
}

/// Finds the camera pan between two picture lists: the displacement shared
/// by at least half of the current pictures.
pub fn detect_shift(prev: &[Picture], cur: &[Picture]) -> (i32, i32) {
    if prev.is_empty() || cur.is_empty() {
        return (0, 0);
    }
    let by_id = index_by_id(prev);
    let mut votes: HashMap<(i32, i32), usize> = HashMap::new();
    for pic in cur {
        if let Some(positions) = by_id.get(&pic.id) {
            for &(h, v) in positions {
                *votes
                    .entry((pic.h as i32 - h as i32, pic.v as i32 - v as i32))
                    .or_default() += 1;
            }
        }
    }
    match votes
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    {
        Some((shift, count)) if count * 2 >= cur.len() => shift,
        _ => (0, 0),
    }
}

/// Links each current picture to its nearest previous twin (same id) and
/// marks it moving when no twin sits exactly at the shifted position.
pub fn link_pictures(prev: &[Picture], cur: &mut [Picture], shift: (i32, i32)) {
    let by_id = index_by_id(prev);
    for pic in cur.iter_mut() {
        let expected = (pic.h as i32 - shift.0, pic.v as i32 - shift.1);
        let nearest = by_id.get(&pic.id).and_then(|positions| {
            positions.iter().copied().min_by_key(|&(h, v)| {
                let dh = (h as i32 - expected.0) as i64;
                let dv = (v as i32 - expected.1) as i64;
                dh * dh + dv * dv
            })
        });
        pic.prev = nearest;
        pic.moving = nearest.map_or(true, |(h, v)| (h as i32, v as i32) != expected);
    }
}

fn index_by_id(pictures: &[Picture]) -> HashMap<u16, Vec<(i16, i16)>> {
    let mut map: HashMap<u16, Vec<(i16, i16)>> = HashMap::new();
    for p in pictures {
        map.entry(p.id).or_default().push((p.h, p.v));
    }
    map
}
