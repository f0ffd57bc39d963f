//! Temporal aggregation of per-frame glyph readings into one card read.

use std::collections::BTreeMap;

use crate::config::AggregatorConfig;
use crate::detection::Classification;
use crate::models::{CandidateKind, CardInfo, DigitCandidate, luhn_valid};

/// One frame's evidence for a single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Value(u8),
    Reject,
    /// The slot holding this position was not detected.
    Absent,
}

impl From<&Classification> for Vote {
    fn from(c: &Classification) -> Self {
        match c.label {
            Some(d) => Vote::Value(d),
            None => Vote::Reject,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    counts: BTreeMap<u8, u32>,
    rejects: u32,
}

impl Histogram {
    pub fn record(&mut self, vote: Vote) {
        match vote {
            Vote::Value(v) => *self.counts.entry(v).or_default() += 1,
            Vote::Reject => self.rejects += 1,
            Vote::Absent => {}
        }
    }

    /// Non-reject observations.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn rejects(&self) -> u32 {
        self.rejects
    }

    pub fn count(&self, value: u8) -> u32 {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    /// Most frequent value; ties go to the smaller value.
    pub fn mode(&self) -> Option<u8> {
        self.counts
            .iter()
            .fold(None, |best: Option<(u8, u32)>, (&v, &n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((v, n)),
            })
            .map(|(v, _)| v)
    }

    /// Share of non-reject observations held by the mode.
    pub fn mode_fraction(&self) -> f32 {
        let total = self.total();
        match self.mode() {
            Some(v) if total > 0 => self.count(v) as f32 / total as f32,
            _ => 0.0,
        }
    }
}

/// Everything one frame contributes to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReading {
    pub digits: Vec<Vote>,
    pub month: Vote,
    pub year: Vote,
    pub candidates: Vec<DigitCandidate>,
}

impl FrameReading {
    pub fn new(digit_count: usize) -> Self {
        Self {
            digits: vec![Vote::Absent; digit_count],
            month: Vote::Absent,
            year: Vote::Absent,
            candidates: Vec::new(),
        }
    }

    /// Record a classified number group whose first digit is at `first_position`.
    pub fn add_group(&mut self, first_position: usize, candidate: &DigitCandidate, glyphs: &[Classification]) {
        for (i, glyph) in glyphs.iter().enumerate() {
            if let Some(slot) = self.digits.get_mut(first_position + i) {
                *slot = glyph.into();
            }
        }
        self.candidates.push(candidate.clone());
    }

    /// Record the classified "MM/YY" digits. An impossible month or any
    /// rejected digit rejects both fields.
    pub fn add_expiry(&mut self, candidate: &DigitCandidate, glyphs: &[Classification]) {
        let digits: Vec<Option<u8>> = glyphs.iter().map(|g| g.label).collect();
        let (month, year) = match digits.as_slice() {
            [Some(m0), Some(m1), Some(y0), Some(y1)] => {
                let month = m0 * 10 + m1;
                if (1..=12).contains(&month) {
                    (Vote::Value(month), Vote::Value(y0 * 10 + y1))
                } else {
                    (Vote::Reject, Vote::Reject)
                }
            }
            _ => (Vote::Reject, Vote::Reject),
        };
        self.month = month;
        self.year = year;
        self.candidates.push(candidate.clone());
    }

    fn number_slots_found(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| matches!(c.kind, CandidateKind::NumberGroup(_)))
            .count()
    }
}

/// Per-session vote state. Owned by the session; dropped with it.
#[derive(Debug, Clone)]
pub struct ConfidenceAccumulator {
    positions: Vec<Histogram>,
    month: Histogram,
    year: Histogram,
    frames: u64,
    number_slots: usize,
    /// Candidates of the most confident frame that found every number group.
    best_frame: Option<(f32, Vec<DigitCandidate>)>,
}

impl ConfidenceAccumulator {
    pub fn new(digit_count: usize, number_slots: usize) -> Self {
        Self {
            positions: vec![Histogram::default(); digit_count],
            month: Histogram::default(),
            year: Histogram::default(),
            frames: 0,
            number_slots,
            best_frame: None,
        }
    }

    pub fn record(&mut self, reading: &FrameReading) {
        for (histogram, &vote) in self.positions.iter_mut().zip(&reading.digits) {
            histogram.record(vote);
        }
        self.month.record(reading.month);
        self.year.record(reading.year);
        self.frames += 1;

        if reading.number_slots_found() == self.number_slots {
            let score: f32 = reading.candidates.iter().map(|c| c.confidence).sum();
            if self.best_frame.as_ref().is_none_or(|(best, _)| score > *best) {
                self.best_frame = Some((score, reading.candidates.clone()));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames
    }

    pub fn digit_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, index: usize) -> Option<&Histogram> {
        self.positions.get(index)
    }

    pub fn month(&self) -> &Histogram {
        &self.month
    }

    pub fn year(&self) -> &Histogram {
        &self.year
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// Share of required positions already satisfied, in [0, 1].
    NotYet { stability: f32 },
    Ready(CardInfo),
}

/// Decides when the accumulated evidence is enough to emit a [`CardInfo`].
#[derive(Debug, Clone)]
pub struct ReadAssembler {
    policy: AggregatorConfig,
}

impl ReadAssembler {
    pub fn new(policy: AggregatorConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AggregatorConfig {
        &self.policy
    }

    /// Fold one frame into `acc` and check for finalization.
    pub fn update(&self, acc: &mut ConfidenceAccumulator, reading: &FrameReading) -> Assessment {
        acc.record(reading);
        self.assess(acc)
    }

    fn satisfied(&self, histogram: &Histogram) -> bool {
        histogram.total() > 0
            && histogram.total() >= self.policy.min_frames
            && histogram.mode_fraction() >= self.policy.confidence_threshold
    }

    pub fn assess(&self, acc: &ConfidenceAccumulator) -> Assessment {
        let digits_ok = acc.positions.iter().filter(|h| self.satisfied(h)).count();
        let expiry_ok = self.satisfied(&acc.month) && self.satisfied(&acc.year);

        let required = acc.positions.len() + if self.policy.require_expiry { 2 } else { 0 };
        let met = digits_ok
            + if self.policy.require_expiry {
                [&acc.month, &acc.year].iter().filter(|h| self.satisfied(h)).count()
            } else {
                0
            };
        let not_yet = Assessment::NotYet {
            stability: if required == 0 { 0.0 } else { met as f32 / required as f32 },
        };

        if digits_ok < acc.positions.len() || (self.policy.require_expiry && !expiry_ok) {
            return not_yet;
        }
        let Some((_, candidates)) = &acc.best_frame else {
            return not_yet;
        };

        let numbers: String = acc
            .positions
            .iter()
            .filter_map(Histogram::mode)
            .map(|d| char::from(b'0' + d))
            .collect();
        if self.policy.require_luhn && !luhn_valid(&numbers) {
            log::debug!("mode string fails the Luhn check, still scanning");
            return not_yet;
        }

        let (month, year) = match (expiry_ok, acc.month.mode(), acc.year.mode()) {
            (true, Some(m), Some(y)) => (m as u32, y as u32),
            _ => (0, 0),
        };

        let mut groups: Vec<&DigitCandidate> = candidates
            .iter()
            .filter(|c| matches!(c.kind, CandidateKind::NumberGroup(_)))
            .collect();
        groups.sort_by_key(|c| match c.kind {
            CandidateKind::NumberGroup(g) => g,
            CandidateKind::Expiry => usize::MAX,
        });
        let x_offsets = groups.iter().flat_map(|c| c.x_offsets.iter().copied()).collect();
        let anchor = groups
            .iter()
            .copied()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        let y_offset = anchor.map_or(0, |c| c.y_offset);
        let flipped = anchor.is_some_and(|c| c.flipped);

        Assessment::Ready(CardInfo::new(numbers, x_offsets, y_offset, month, year, flipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_prefers_smaller_value_on_tie() {
        let mut h = Histogram::default();
        for v in [7, 3, 7, 3] {
            h.record(Vote::Value(v));
        }
        h.record(Vote::Reject);
        h.record(Vote::Absent);
        assert_eq!(h.mode(), Some(3));
        assert_eq!(h.total(), 4);
        assert_eq!(h.rejects(), 1);
        assert!((h.mode_fraction() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_histogram_has_no_mode() {
        let h = Histogram::default();
        assert_eq!(h.mode(), None);
        assert_eq!(h.mode_fraction(), 0.0);
    }
}
