//! Fitting of periodic torsion coefficients to the difference between quantum
//! and mechanical energy profiles around one rotatable bond.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use symm::{ClassKey, Classes, Molecule, RotatableBond};

pub use lsq::{Dvec, LevenbergMarquardt, Solution};

pub mod lsq;

#[cfg(test)]
mod tests;

/// the periodicities fitted for every torsion
pub const FOLDS: [usize; 3] = [1, 2, 3];

/// spacing of the probe grid, in degrees, used to compare cosine responses
const PROBE_STEP: usize = 10;

/// responses with a smaller spread than this are treated as constant
const SPREAD_TOL: f64 = 1e-10;

/// tolerance on the amplitude bound, relative for amplitudes above 1
const AMPLITUDE_TOL: f64 = 1e-9;

/// One torsion around a rotatable bond, reduced to what the model needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorsionTerm {
    pub key: ClassKey,

    /// starting dihedral of this torsion minus that of the principal torsion,
    /// in whole degrees in `0..360`
    pub phase: usize,

    /// whether either outer atom is a hydrogen. these torsions are not fitted
    pub hydrogen: bool,
}

impl TorsionTerm {
    /// build the terms for every torsion of `bond`, in the same order as
    /// `bond.torsions`. Torsions with unclassified atoms are skipped
    pub fn for_bond(
        mol: &Molecule,
        classes: &Classes,
        bond: &RotatableBond,
    ) -> Vec<Self> {
        let start = mol.dihedral(bond.principal);
        bond.torsions
            .iter()
            .filter_map(|&q| {
                let key = classes.key(q)?;
                let phase = (mol.dihedral(q) - start).round() as i64;
                let hydrogen = mol.atoms()[q[0]].is_hydrogen()
                    || mol.atoms()[q[3]].is_hydrogen();
                Some(Self {
                    key,
                    phase: phase.rem_euclid(360) as usize,
                    hydrogen,
                })
            })
            .collect()
    }
}

/// An energy profile for one class key: the scanned angles in degrees and the
/// quantum and mechanical energies at each of them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub angles: Vec<f64>,
    pub qm: Vec<f64>,
    pub mm: Vec<f64>,
}

fn min(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn spread(v: &[f64]) -> f64 {
    if v.is_empty() { 0.0 } else { max(v) - min(v) }
}

impl Profile {
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// the quantum energies relative to their minimum minus the mechanical
    /// energies relative to theirs
    pub fn difference(&self) -> Vec<f64> {
        let (qmin, mmin) = (min(&self.qm), min(&self.mm));
        self.qm
            .iter()
            .zip(&self.mm)
            .map(|(q, m)| (q - qmin) - (m - mmin))
            .collect()
    }
}

/// The energy of one cosine term with force constant `k`, weighted by the
/// `weight` torsions sitting at `phase`. All angles are in degrees
#[inline]
fn term(
    k: f64,
    x: f64,
    fold: usize,
    weight: usize,
    phase: usize,
    offset: f64,
) -> f64 {
    let arg = fold as f64 * (x + phase as f64) + offset;
    weight as f64 * k / 2.0 * (1.0 + arg.to_radians().cos())
}

/// Reference-counted parameter slots. A slot is active while at least one
/// (key, fold) pair refers to it, and slots are only renumbered into a dense
/// parameter vector by [Slots::compact] at the start of each solve.
#[derive(Clone, Debug, Default)]
struct Slots {
    refs: Vec<usize>,
}

impl Slots {
    fn alloc(&mut self) -> usize {
        self.refs.push(1);
        self.refs.len() - 1
    }

    fn retain(&mut self, slot: usize) {
        self.refs[slot] += 1;
    }

    fn release(&mut self, slot: usize) {
        self.refs[slot] -= 1;
    }

    fn active(&self) -> usize {
        self.refs.iter().filter(|&&r| r > 0).count()
    }

    /// map each active slot to its position in the parameter vector
    fn compact(&self) -> Vec<Option<usize>> {
        let mut next = 0;
        self.refs
            .iter()
            .map(|&r| {
                (r > 0).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }
}

/// The fitting state of one class key around a bond
#[derive(Clone, Debug)]
struct Record {
    key: ClassKey,
    /// number of torsions with this key
    count: usize,
    /// number of torsions at each phase
    phases: BTreeMap<usize, usize>,
    /// parameter slot for each entry of [FOLDS]
    folds: [Option<usize>; 3],
    /// whether this record carries the shared offset
    has_offset: bool,
}

impl Record {
    fn has_folds(&self) -> bool {
        self.folds.iter().any(Option::is_some)
    }

    fn clear(&mut self, slots: &mut Slots) {
        for fold in self.folds.iter_mut() {
            if let Some(s) = fold.take() {
                slots.release(s);
            }
        }
    }
}

/// Run statistics for one bond
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// free parameters, including the offset, before pruning
    pub requested: usize,
    /// free parameters, including the offset, going into the first solve
    pub free: usize,
    pub samples: usize,
    pub solves: usize,
    /// whether the sanitization emptied every parameter and only the
    /// principal key was refitted
    pub fallback: bool,
    /// whether the final solve converged
    pub converged: bool,
    /// residual sum of squares of the final solve
    pub rss: f64,
}

/// The fitted coefficients of one class key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedTerm {
    pub key: ClassKey,
    pub count: usize,
    pub phases: BTreeMap<usize, usize>,
    /// force constant for each fitted fold. empty if the key was filtered out
    pub coefficients: BTreeMap<usize, f64>,
    pub offset: bool,
}

/// The result of fitting one rotatable bond
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BondFit {
    pub principal: ClassKey,
    pub terms: Vec<FittedTerm>,
    /// keys whose torsions end in a hydrogen, which always get zero
    /// coefficients
    pub zeroed: Vec<ClassKey>,
    pub offset: f64,
    pub fold_offsets: [f64; 3],
    pub angles: Vec<f64>,
    /// quantum minus mechanical energy difference the model was fitted to
    pub target: Vec<f64>,
    /// the model evaluated at `angles`
    pub fitted: Vec<f64>,
    pub report: FitReport,
}

impl BondFit {
    /// the torsion energy of the fitted model at `angle` degrees, excluding
    /// the offset
    pub fn torsion_energy(&self, angle: f64) -> f64 {
        let mut sum = 0.0;
        for t in &self.terms {
            for (&fold, &k) in &t.coefficients {
                for (&phase, &w) in &t.phases {
                    sum +=
                        term(k, angle, fold, w, phase, self.fold_offsets[fold - 1]);
                }
            }
        }
        sum
    }

    /// the full fitted model at `angle`, including the offset
    pub fn evaluate(&self, angle: f64) -> f64 {
        self.torsion_energy(angle) + self.offset
    }

    /// the parameter table for this bond: every key mapped to its fold
    /// coefficients, with explicit zeros for keys with nothing fitted
    pub fn parameters(&self) -> BTreeMap<ClassKey, BTreeMap<usize, f64>> {
        let zeros = || FOLDS.iter().map(|&f| (f, 0.0)).collect();
        let mut ret: BTreeMap<_, _> =
            self.zeroed.iter().map(|&k| (k, zeros())).collect();
        for t in &self.terms {
            let v = if t.coefficients.is_empty() {
                zeros()
            } else {
                t.coefficients.clone()
            };
            ret.insert(t.key, v);
        }
        ret
    }

    /// the coefficient for `fold` of `key`, if one was fitted
    pub fn coefficient(&self, key: ClassKey, fold: usize) -> Option<f64> {
        self.terms
            .iter()
            .find(|t| t.key == key)
            .and_then(|t| t.coefficients.get(&fold).copied())
    }

    /// the barrier height `K/2` of one cosine term
    pub fn barrier(&self, key: ClassKey, fold: usize) -> Option<f64> {
        self.coefficient(key, fold).map(|k| k / 2.0)
    }
}

/// fits periodic torsion coefficients for one bond at a time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fitter {
    /// phase offset in degrees for each entry of [FOLDS]
    pub fold_offsets: [f64; 3],
    pub solver: LevenbergMarquardt,
}

impl Default for Fitter {
    fn default() -> Self {
        Self {
            fold_offsets: [0.0, 180.0, 0.0],
            solver: LevenbergMarquardt::default(),
        }
    }
}

/// The state of one bond's fit: the records, their slots, and the data
struct Problem<'a> {
    records: Vec<Record>,
    slots: Slots,
    fold_offsets: [f64; 3],
    angles: &'a [f64],
    target: &'a [f64],
}

impl Problem<'_> {
    /// the weighted cosine response of `rec` for the fold at `fi`, per unit
    /// force constant, at `x`
    fn response(&self, rec: &Record, fi: usize, x: f64) -> f64 {
        rec.phases
            .iter()
            .map(|(&phase, &w)| {
                term(1.0, x, FOLDS[fi], w, phase, self.fold_offsets[fi])
            })
            .sum()
    }

    /// the response of `rec` for fold `fi` on the probe grid, shifted to a
    /// minimum of zero and scaled to unit spread. None if the response is
    /// flat
    fn probe(&self, rec: &Record, fi: usize) -> Option<Vec<f64>> {
        let resp: Vec<f64> = (0..360)
            .step_by(PROBE_STEP)
            .map(|x| self.response(rec, fi, x as f64))
            .collect();
        let lo = min(&resp);
        let s = spread(&resp);
        if s <= SPREAD_TOL {
            return None;
        }
        Some(resp.into_iter().map(|r| (r - lo) / s).collect())
    }

    /// give every (record, fold) pair with a non-flat response a parameter
    /// slot, sharing the slot of an earlier key when the two responses are
    /// linearly dependent. only the records selected by `filter` are
    /// considered
    fn allocate(&mut self, filter: impl Fn(&Record) -> bool) {
        let mut seen: Vec<(usize, usize, Vec<f64>, usize)> = Vec::new();
        for r in 0..self.records.len() {
            if !filter(&self.records[r]) {
                continue;
            }
            for fi in 0..FOLDS.len() {
                let Some(resp) = self.probe(&self.records[r], fi) else {
                    continue;
                };
                let shared = seen.iter().find(|(rr, ff, other, _)| {
                    let plus: Vec<_> =
                        resp.iter().zip(other).map(|(a, b)| a + b).collect();
                    let minus: Vec<_> =
                        resp.iter().zip(other).map(|(a, b)| a - b).collect();
                    *rr != r
                        && *ff == fi
                        && (spread(&plus) < SPREAD_TOL
                            || spread(&minus) < SPREAD_TOL)
                });
                let slot = match shared {
                    Some(&(rr, _, _, slot)) => {
                        debug!(
                            "fold {} of {} shares a parameter with {}",
                            FOLDS[fi], self.records[r].key, self.records[rr].key
                        );
                        self.slots.retain(slot);
                        slot
                    }
                    None => self.slots.alloc(),
                };
                self.records[r].folds[fi] = Some(slot);
                seen.push((r, fi, resp, slot));
            }
        }
    }

    /// number of free parameters, counting the offset
    fn free(&self) -> usize {
        self.slots.active() + 1
    }

    /// remove keys, most peripheral first, until the free parameters fit in
    /// the number of samples
    fn prune(&mut self) {
        while self.free() > self.angles.len() {
            let mut worst: Option<usize> = None;
            for (i, rec) in self.records.iter().enumerate() {
                if !rec.has_folds() {
                    continue;
                }
                if worst.is_none_or(|w| {
                    rec.key.outer_sum() > self.records[w].key.outer_sum()
                }) {
                    worst = Some(i);
                }
            }
            let Some(w) = worst else { break };
            debug!(
                "removing {} with {} free parameters for {} samples",
                self.records[w].key,
                self.free(),
                self.angles.len()
            );
            let Self { records, slots, .. } = self;
            records[w].clear(slots);
        }
    }

    /// the model at `x` with the parameter vector `p`, laid out by `index`
    fn model(&self, index: &[Option<usize>], p: &Dvec, x: f64) -> f64 {
        let mut sum = 0.0;
        for rec in &self.records {
            for (fi, slot) in rec.folds.iter().enumerate() {
                let Some(k) = slot.and_then(|s| index[s]).map(|i| p[i]) else {
                    continue;
                };
                for (&phase, &w) in &rec.phases {
                    sum += term(k, x, FOLDS[fi], w, phase, self.fold_offsets[fi]);
                }
            }
        }
        sum + p[p.len() - 1]
    }

    /// residuals of the model against the target
    fn objective(&self, index: &[Option<usize>], p: &Dvec) -> Dvec {
        Dvec::from_iterator(
            self.angles.len(),
            self.angles
                .iter()
                .zip(self.target)
                .map(|(&x, &y)| self.model(index, p, x) - y),
        )
    }

    /// solve for the current slots, starting every parameter at `start`
    fn solve(
        &self,
        solver: &LevenbergMarquardt,
        start: f64,
    ) -> (Vec<Option<usize>>, Solution) {
        let index = self.slots.compact();
        let p0 = Dvec::repeat(self.free(), start);
        let sol = solver.minimize(|p| self.objective(&index, p), p0);
        if !sol.converged {
            debug!("least squares not converged after {} iterations", sol.iterations);
        }
        (index, sol)
    }

    /// solve and sanitize until every remaining coefficient is within
    /// `bound`. returns None once no folds are left
    fn solve_bounded(
        &mut self,
        solver: &LevenbergMarquardt,
        bound: f64,
        report: &mut FitReport,
    ) -> Option<(Vec<Option<usize>>, Solution)> {
        while self.slots.active() > 0 {
            let (index, sol) = self.solve(solver, bound);
            report.solves += 1;
            if self.sanitize(&index, &sol.params, bound) == 0 {
                return Some((index, sol));
            }
        }
        None
    }

    /// drop every (key, fold) whose coefficient exceeds `bound` in magnitude.
    /// returns the number of folds dropped
    fn sanitize(
        &mut self,
        index: &[Option<usize>],
        p: &Dvec,
        bound: f64,
    ) -> usize {
        let limit = bound + AMPLITUDE_TOL * bound.abs().max(1.0);
        let mut dropped = 0;
        let Self { records, slots, .. } = self;
        for rec in records.iter_mut() {
            for (fi, fold) in rec.folds.iter_mut().enumerate() {
                let Some(s) = *fold else { continue };
                let Some(i) = index[s] else { continue };
                if p[i].abs() > limit {
                    debug!(
                        "dropping fold {} of {}: |{:.6}| > {:.6}",
                        FOLDS[fi], rec.key, p[i], bound
                    );
                    slots.release(s);
                    *fold = None;
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

impl Fitter {
    pub fn new(fold_offsets: [f64; 3]) -> Self {
        Self {
            fold_offsets,
            ..Self::default()
        }
    }

    /// fit the torsions `terms` of one bond, whose principal torsion has the
    /// key `principal`, to the energy difference of `profile`
    pub fn fit(
        &self,
        principal: ClassKey,
        terms: &[TorsionTerm],
        profile: &Profile,
    ) -> BondFit {
        let target = profile.difference();
        self.fit_target(principal, terms, &profile.angles, &target)
    }

    /// fit the torsions `terms` directly to `target` sampled at `angles`
    pub fn fit_target(
        &self,
        principal: ClassKey,
        terms: &[TorsionTerm],
        angles: &[f64],
        target: &[f64],
    ) -> BondFit {
        let mut records: Vec<Record> = Vec::new();
        let mut zeroed: Vec<ClassKey> = Vec::new();
        for t in terms {
            if t.hydrogen {
                if !zeroed.contains(&t.key) {
                    zeroed.push(t.key);
                }
                continue;
            }
            match records.iter_mut().find(|r| r.key == t.key) {
                Some(rec) => {
                    rec.count += 1;
                    *rec.phases.entry(t.phase).or_default() += 1;
                }
                None => records.push(Record {
                    key: t.key,
                    count: 1,
                    phases: BTreeMap::from([(t.phase, 1)]),
                    folds: [None; 3],
                    has_offset: records.is_empty(),
                }),
            }
        }
        zeroed.retain(|k| records.iter().all(|r| r.key != *k));

        let mut problem = Problem {
            records,
            slots: Slots::default(),
            fold_offsets: self.fold_offsets,
            angles,
            target,
        };
        problem.allocate(|_| true);

        let amplitude = spread(target);
        let mut report = FitReport {
            requested: problem.free(),
            samples: angles.len(),
            ..Default::default()
        };
        problem.prune();
        report.free = problem.free();

        let mut solution =
            problem.solve_bounded(&self.solver, amplitude, &mut report);
        if solution.is_none() {
            info!("no parameters left for {principal}, refitting it alone");
            report.fallback = true;
            problem.allocate(|r| r.key == principal);
            solution =
                problem.solve_bounded(&self.solver, amplitude, &mut report);
        }
        // only the offset is left
        let (index, sol) = match solution {
            Some(s) => s,
            None => {
                report.solves += 1;
                problem.solve(&self.solver, amplitude)
            }
        };
        report.converged = sol.converged;
        report.rss = sol.rss;

        let fitted = angles
            .iter()
            .map(|&x| problem.model(&index, &sol.params, x))
            .collect();
        let terms = problem
            .records
            .iter()
            .map(|rec| FittedTerm {
                key: rec.key,
                count: rec.count,
                phases: rec.phases.clone(),
                coefficients: rec
                    .folds
                    .iter()
                    .enumerate()
                    .filter_map(|(fi, s)| {
                        let i = index[(*s)?]?;
                        Some((FOLDS[fi], sol.params[i]))
                    })
                    .collect(),
                offset: rec.has_offset,
            })
            .collect();

        BondFit {
            principal,
            terms,
            zeroed,
            offset: sol.params[sol.params.len() - 1],
            fold_offsets: self.fold_offsets,
            angles: angles.to_vec(),
            target: target.to_vec(),
            fitted,
            report,
        }
    }
}
