//! Sources of quantum and mechanical energies for torsion scans

use log::trace;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use symm::{Quad, canonical_order};
use torfit::BondFit;

/// Something that can compute the energy of a molecule with `torsion` rotated
/// to `angle` degrees while the torsions in `fixed` are held at their starting
/// values. `None` means the energy is unavailable, and the sample is dropped
pub trait Evaluator {
    fn evaluate(&mut self, torsion: Quad, angle: f64, fixed: &[Quad])
    -> Option<f64>;
}

impl<E: Evaluator + ?Sized> Evaluator for &mut E {
    fn evaluate(
        &mut self,
        torsion: Quad,
        angle: f64,
        fixed: &[Quad],
    ) -> Option<f64> {
        (**self).evaluate(torsion, angle, fixed)
    }
}

/// angles are resolved to 1/PER_DEGREE of a degree in caches and profiles
const PER_DEGREE: i64 = 1000;

/// the bucket of `angle` after wrapping it into `0..360`
pub(crate) fn bucket(angle: f64) -> i64 {
    let b = (angle.rem_euclid(360.0) * PER_DEGREE as f64).round() as i64;
    b % (360 * PER_DEGREE)
}

/// Memoizes another [Evaluator] per torsion and angle, so each point is only
/// requested once no matter how many stages ask for it. Torsions are stored in
/// canonical order, so a torsion and its reverse share entries.
#[derive(Debug)]
pub struct Cached<E> {
    inner: E,
    cache: FxHashMap<(Quad, i64), Option<f64>>,
    hits: usize,
    misses: usize,
}

impl<E> Cached<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: FxHashMap::default(),
            hits: 0,
            misses: 0,
        }
    }

    /// the number of requests answered from the cache
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// the number of requests passed on to the wrapped evaluator
    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Evaluator> Evaluator for Cached<E> {
    fn evaluate(
        &mut self,
        torsion: Quad,
        angle: f64,
        fixed: &[Quad],
    ) -> Option<f64> {
        let key = (canonical_order(torsion), bucket(angle));
        if let Some(&e) = self.cache.get(&key) {
            self.hits += 1;
            return e;
        }
        self.misses += 1;
        let e = self.inner.evaluate(torsion, angle, fixed);
        trace!("{torsion:?} at {angle:.3}: {e:?}");
        self.cache.insert(key, e);
        e
    }
}

/// One tabulated energy. A `null` energy marks a point that failed to
/// compute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub torsion: Quad,
    pub angle: f64,
    pub energy: Option<f64>,
}

/// An [Evaluator] over precomputed energies, looked up by torsion in either
/// direction and by angle rounded to the nearest whole degree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Entry>", into = "Vec<Entry>")]
pub struct Table {
    entries: Vec<Entry>,
    index: FxHashMap<(Quad, i64), usize>,
}

fn degree(angle: f64) -> i64 {
    (angle.round() as i64).rem_euclid(360)
}

impl From<Vec<Entry>> for Table {
    fn from(entries: Vec<Entry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ((canonical_order(e.torsion), degree(e.angle)), i))
            .collect();
        Self { entries, index }
    }
}

impl From<Table> for Vec<Entry> {
    fn from(value: Table) -> Self {
        value.entries
    }
}

impl Table {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

impl Evaluator for Table {
    fn evaluate(
        &mut self,
        torsion: Quad,
        angle: f64,
        _fixed: &[Quad],
    ) -> Option<f64> {
        let i = self.index.get(&(canonical_order(torsion), degree(angle)))?;
        self.entries[*i].energy
    }
}

/// The tabulated scans for one molecule, as read from the `scans` file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanData {
    pub qm: Table,
    pub mm: Table,
}

impl ScanData {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, crate::Error> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }
}

/// The mechanical energy after fitting: the energy from `base` plus the
/// fitted torsion energy of the bond whose principal torsion is being
/// scanned. Other torsions only get the base energy.
pub struct Refit<'a, E> {
    base: E,
    fits: Vec<(Quad, &'a BondFit)>,
}

impl<'a, E: Evaluator> Refit<'a, E> {
    /// `fits` pairs each fitted bond's principal torsion with its fit
    pub fn new(
        base: E,
        fits: impl IntoIterator<Item = (Quad, &'a BondFit)>,
    ) -> Self {
        Self {
            base,
            fits: fits
                .into_iter()
                .map(|(q, fit)| (canonical_order(q), fit))
                .collect(),
        }
    }
}

impl<E: Evaluator> Evaluator for Refit<'_, E> {
    fn evaluate(
        &mut self,
        torsion: Quad,
        angle: f64,
        fixed: &[Quad],
    ) -> Option<f64> {
        let base = self.base.evaluate(torsion, angle, fixed)?;
        let q = canonical_order(torsion);
        let extra = self
            .fits
            .iter()
            .find(|(p, _)| *p == q)
            .map_or(0.0, |(_, fit)| fit.torsion_energy(angle));
        Some(base + extra)
    }
}
