//! Scanning principal torsions and averaging their energies per class key

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use symm::{ClassKey, Quad};
use torfit::Profile;

use crate::energy::{Evaluator, bucket};

/// the energies of one scanned point
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub angle: f64,
    pub qm: f64,
    pub mm: f64,
}

/// `angle` wrapped into [0, 360). rounding can leave `rem_euclid` at exactly
/// 360 for tiny negative angles
fn wrap(angle: f64) -> f64 {
    let ret = angle.rem_euclid(360.0);
    if ret >= 360.0 { 0.0 } else { ret }
}

/// Walks a torsion through a full rotation in fixed steps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scanner {
    step: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self { step: 30 }
    }
}

impl Scanner {
    /// `step` must be positive. [crate::config::Config::validate] also
    /// requires it to divide 360
    pub fn new(step: usize) -> Self {
        Self { step: step.max(1) }
    }

    /// the rotations applied to the starting dihedral, in degrees
    pub fn offsets(&self) -> impl Iterator<Item = f64> {
        (0..360).step_by(self.step).map(|x| x as f64)
    }

    /// Scan `torsion`, starting from its dihedral `start`, with the torsions
    /// in `fixed` held in place. Points where either evaluator has no energy
    /// are dropped, and the rest are returned sorted by angle
    pub fn scan<Q, M>(
        &self,
        torsion: Quad,
        start: f64,
        fixed: &[Quad],
        qm: &mut Q,
        mm: &mut M,
    ) -> Vec<Sample>
    where
        Q: Evaluator + ?Sized,
        M: Evaluator + ?Sized,
    {
        let mut ret = Vec::new();
        for phi in self.offsets() {
            let angle = wrap(start + phi);
            let q = qm.evaluate(torsion, angle, fixed);
            let m = mm.evaluate(torsion, angle, fixed);
            match (q, m) {
                (Some(qm), Some(mm)) => ret.push(Sample { angle, qm, mm }),
                _ => debug!(
                    "dropping {torsion:?} at {angle:.1}: qm = {q:?}, mm = {m:?}"
                ),
            }
        }
        ret.sort_by(|a, b| a.angle.total_cmp(&b.angle));
        ret
    }
}

#[derive(Clone, Debug, Default)]
struct Group {
    members: usize,
    /// angle bucket -> (first angle seen, qm sum, mm sum)
    sums: BTreeMap<i64, (f64, f64, f64)>,
}

/// Collects the scans of every principal torsion and averages those sharing a
/// class key, point by point. Each average is taken over every member of the
/// key, so a point missing from some members is biased toward zero.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    groups: BTreeMap<ClassKey, Group>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// add the scan of one torsion with class key `key`. an empty scan still
    /// counts as a member
    pub fn record(&mut self, key: ClassKey, samples: &[Sample]) {
        let group = self.groups.entry(key).or_default();
        group.members += 1;
        for s in samples {
            let e = group.sums.entry(bucket(s.angle)).or_insert((s.angle, 0.0, 0.0));
            e.1 += s.qm;
            e.2 += s.mm;
        }
    }

    /// the number of torsions recorded for `key`
    pub fn members(&self, key: &ClassKey) -> usize {
        self.groups.get(key).map_or(0, |g| g.members)
    }

    /// the averaged profile for `key`, sorted by angle
    pub fn profile(&self, key: &ClassKey) -> Option<Profile> {
        let group = self.groups.get(key)?;
        let n = group.members as f64;
        let mut ret = Profile::default();
        for &(angle, qm, mm) in group.sums.values() {
            ret.angles.push(angle);
            ret.qm.push(qm / n);
            ret.mm.push(mm / n);
        }
        Some(ret)
    }

    pub fn profiles(&self) -> BTreeMap<ClassKey, Profile> {
        self.groups
            .keys()
            .filter_map(|k| Some((*k, self.profile(k)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    /// returns the angle plus a per-torsion shift, with no energy at the
    /// angles in `missing`
    struct Shifted {
        missing: Vec<f64>,
    }

    impl Evaluator for Shifted {
        fn evaluate(&mut self, t: Quad, angle: f64, _: &[Quad]) -> Option<f64> {
            if self.missing.iter().any(|m| (m - angle).abs() < 1e-6) {
                return None;
            }
            Some(angle + t[0] as f64)
        }
    }

    fn key() -> ClassKey {
        "401 402 402 401".parse().unwrap()
    }

    #[test]
    fn scan_order() {
        let mut qm = Shifted { missing: vec![] };
        let mut mm = Shifted { missing: vec![] };
        let got = Scanner::new(90).scan([0, 1, 2, 3], 200.0, &[], &mut qm, &mut mm);
        let angles: Vec<_> = got.iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![20.0, 110.0, 200.0, 290.0]);
        assert_eq!(Scanner::default().offsets().count(), 12);
    }

    #[test]
    fn wrapped_start() {
        let mut qm = Shifted { missing: vec![] };
        let mut mm = Shifted { missing: vec![] };
        let got = Scanner::new(90).scan([0, 1, 2, 3], -1e-20, &[], &mut qm, &mut mm);
        let angles: Vec<_> = got.iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(wrap(-1e-20), 0.0);
        assert_eq!(wrap(-90.0), 270.0);
        assert_eq!(wrap(720.0), 0.0);

        let mut agg = Aggregator::new();
        agg.record(key(), &got);
        let s = Scanner::new(90).scan([0, 1, 2, 3], 0.0, &[], &mut qm, &mut mm);
        agg.record(key(), &s);
        let profile = agg.profile(&key()).unwrap();
        assert_eq!(profile.angles, vec![0.0, 90.0, 180.0, 270.0]);
    }

    #[test]
    fn censored() {
        let mut qm = Shifted {
            missing: vec![90.0],
        };
        let mut mm = Shifted {
            missing: vec![270.0],
        };
        let got = Scanner::new(90).scan([0, 1, 2, 3], 0.0, &[], &mut qm, &mut mm);
        let angles: Vec<_> = got.iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![0.0, 180.0]);
    }

    #[test]
    fn reverse_aggregation() {
        // the same torsion scanned in both directions lands in one profile
        let mut qm = Shifted { missing: vec![] };
        let mut mm = Shifted { missing: vec![] };
        let k = key();
        let mut agg = Aggregator::new();
        let s = Scanner::new(30);
        agg.record(k, &s.scan([3, 1, 2, 3], 60.0, &[], &mut qm, &mut mm));
        agg.record(k, &s.scan([3, 2, 1, 3], 60.0, &[], &mut qm, &mut mm));
        assert_eq!(agg.members(&k), 2);
        let got = agg.profile(&k).unwrap();
        assert_eq!(got.len(), 12);
        assert_abs_diff_eq!(got.angles[0], 0.0);
        assert_abs_diff_eq!(got.qm[0], 3.0);
        assert_abs_diff_eq!(got.qm[2], 63.0);
    }

    #[test]
    fn average() {
        let mut agg = Aggregator::new();
        let k = key();
        agg.record(
            k,
            &[
                Sample { angle: 0.0, qm: 1.0, mm: 2.0 },
                Sample { angle: 30.0, qm: 3.0, mm: 4.0 },
            ],
        );
        agg.record(
            k,
            &[
                Sample { angle: 0.0, qm: 3.0, mm: 0.0 },
                Sample { angle: 30.0, qm: 5.0, mm: 0.0 },
            ],
        );
        let got = agg.profile(&k).unwrap();
        assert_eq!(got.angles, vec![0.0, 30.0]);
        assert_eq!(got.qm, vec![2.0, 4.0]);
        assert_eq!(got.mm, vec![1.0, 2.0]);
    }

    #[test]
    fn missing_member_bias() {
        let mut agg = Aggregator::new();
        let k = key();
        agg.record(
            k,
            &[
                Sample { angle: 0.0, qm: 2.0, mm: 2.0 },
                Sample { angle: 30.0, qm: 4.0, mm: 4.0 },
            ],
        );
        agg.record(k, &[Sample { angle: 0.0, qm: 2.0, mm: 2.0 }]);
        let got = agg.profile(&k).unwrap();
        assert_eq!(got.qm, vec![2.0, 2.0]);
        assert_eq!(got.mm, vec![2.0, 2.0]);
    }

    #[test]
    fn single_member() {
        let mut agg = Aggregator::new();
        let k = key();
        let samples = [
            Sample { angle: 0.0, qm: 1.5, mm: -2.0 },
            Sample { angle: 90.0, qm: 0.5, mm: 7.0 },
        ];
        agg.record(k, &samples);
        let got = agg.profile(&k).unwrap();
        assert_eq!(got.qm, vec![1.5, 0.5]);
        assert_eq!(got.mm, vec![-2.0, 7.0]);
        assert!(agg.profile(&"401 403 403 401".parse().unwrap()).is_none());
        assert_eq!(agg.profiles().len(), 1);
    }
}
