use log::debug;
use serde::{Deserialize, Serialize};

use crate::{ClassKey, Classes, Molecule, Quad, canonical_order};

/// A rotatable bond together with every torsion about it. All quadruplets are
/// oriented in the same direction as their class keys, and the scanned
/// `principal` torsion is always `torsions[0]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatableBond {
    pub central: [usize; 2],
    pub principal: Quad,
    pub torsions: Vec<Quad>,
}

impl RotatableBond {
    /// the torsions held fixed while the principal one is scanned
    pub fn auxiliary(&self) -> &[Quad] {
        &self.torsions[1..]
    }
}

/// Finds the rotatable bonds of a classified molecule and enumerates the
/// torsions around them.
#[derive(Clone, Debug, Default)]
pub struct Extractor {
    omit: Vec<Quad>,
    omit_keys: Vec<ClassKey>,
}

/// the first neighbor of `atom`, other than `exclude`, with the highest
/// symmetry class
fn outer_atom(
    mol: &Molecule,
    classes: &Classes,
    atom: usize,
    exclude: usize,
) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for &n in mol.neighbors(atom) {
        if n == exclude {
            continue;
        }
        let c = classes.class(n)?;
        if best.is_none_or(|(_, b)| c > b) {
            best = Some((n, c));
        }
    }
    best.map(|(n, _)| n)
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// skip bonds whose principal torsion is one of `torsions`, given as atom
    /// indices in either direction
    pub fn omit_torsions(
        mut self,
        torsions: impl IntoIterator<Item = Quad>,
    ) -> Self {
        self.omit.extend(torsions.into_iter().map(canonical_order));
        self
    }

    /// skip bonds whose principal torsion has one of the class keys in `keys`
    pub fn omit_keys(mut self, keys: impl IntoIterator<Item = ClassKey>) -> Self {
        self.omit_keys.extend(keys);
        self
    }

    /// extract every rotatable bond of `mol`
    pub fn extract(&self, mol: &Molecule, classes: &Classes) -> Vec<RotatableBond> {
        self.extract_with(mol, classes, |_, _| true)
    }

    /// extract the rotatable bonds of `mol` for which `needs_scan` returns
    /// true when called with the principal torsion and its key
    pub fn extract_with<F>(
        &self,
        mol: &Molecule,
        classes: &Classes,
        mut needs_scan: F,
    ) -> Vec<RotatableBond>
    where
        F: FnMut(Quad, ClassKey) -> bool,
    {
        let mut ret = Vec::new();
        for (b, bond) in mol.bonds().iter().enumerate() {
            let (i, j) = (bond.i, bond.j);
            if !mol.is_rotor(b)
                || classes.class(i).is_none()
                || classes.class(j).is_none()
            {
                continue;
            }
            let (Some(a), Some(d)) = (
                outer_atom(mol, classes, i, j),
                outer_atom(mol, classes, j, i),
            ) else {
                continue;
            };
            let raw = [a, i, j, d];
            let (Some(principal), Some(key)) =
                (classes.orient(raw), classes.key(raw))
            else {
                continue;
            };
            if self.omit.contains(&canonical_order(raw))
                || self.omit_keys.contains(&key)
            {
                debug!("omitting torsion {principal:?} ({key})");
                continue;
            }
            if !needs_scan(principal, key) {
                debug!("torsion {principal:?} ({key}) does not need a scan");
                continue;
            }

            let mut torsions = vec![principal];
            for &ni in mol.neighbors(i) {
                if ni == j {
                    continue;
                }
                for &nj in mol.neighbors(j) {
                    if nj == i {
                        continue;
                    }
                    let q = [ni, i, j, nj];
                    if canonical_order(q) == canonical_order(raw) {
                        continue;
                    }
                    if let Some(q) = classes.orient(q) {
                        torsions.push(q);
                    }
                }
            }
            ret.push(RotatableBond {
                central: [i, j],
                principal,
                torsions,
            });
        }
        ret
    }
}
