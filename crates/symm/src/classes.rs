use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    ClassKey, GraphError, GraphInvariant, Molecule, Quad, key::reversed,
};

/// refines initial atom invariants into symmetry classes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classifier {
    /// the maximum number of refinement rounds before accepting the current
    /// partition
    pub max_rounds: usize,

    /// the type number assigned to the highest class. lower classes get
    /// increasing type numbers from here
    pub type_start: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            max_rounds: 100,
            type_start: 401,
        }
    }
}

/// The positional encoding base for neighbor classes. Class ids are always
/// below the base, so the lowest digit of a label is the atom's own class.
fn encoding_base(nclasses: usize) -> u128 {
    (nclasses as u128 + 1).max(100)
}

/// renumber `labels` to classes 1..=k in ascending label order, skipping
/// atoms with no label. returns k
fn renumber<T: Ord + Clone>(
    labels: &[Option<T>],
    classes: &mut [Option<usize>],
) -> usize {
    let mut ids = BTreeMap::new();
    for label in labels.iter().flatten() {
        ids.entry(label.clone()).or_insert(0);
    }
    for (i, id) in ids.values_mut().enumerate() {
        *id = i + 1;
    }
    for (c, label) in classes.iter_mut().zip(labels) {
        *c = label.as_ref().map(|l| ids[l]);
    }
    ids.len()
}

impl Classifier {
    pub fn new(max_rounds: usize, type_start: usize) -> Self {
        Self {
            max_rounds,
            type_start,
        }
    }

    /// classify `mol` using the initial labels from `provider`
    pub fn classify_with<G: GraphInvariant + ?Sized>(
        &self,
        mol: &Molecule,
        provider: &G,
    ) -> Result<Classes, GraphError> {
        self.classify(mol, &provider.invariants(mol))
    }

    /// Partition the atoms of the largest fragment of `mol` into symmetry
    /// classes, starting from one opaque invariant per atom. The returned
    /// classes are numbered 1..=k in ascending order of initial invariant.
    /// Atoms outside the largest fragment are left unclassified.
    pub fn classify(
        &self,
        mol: &Molecule,
        invariants: &[u64],
    ) -> Result<Classes, GraphError> {
        if invariants.len() != mol.len() {
            return Err(GraphError::InvariantCount {
                atoms: mol.len(),
                invariants: invariants.len(),
            });
        }

        let frag = mol.largest_fragment();
        let mut init = vec![None; mol.len()];
        for &i in &frag {
            init[i] = Some(invariants[i]);
        }
        let mut classes = vec![None; mol.len()];
        let mut count = renumber(&init, &mut classes);

        let mut rounds = 0;
        let mut converged = true;
        if count < frag.len() {
            converged = false;
            while rounds < self.max_rounds {
                rounds += 1;
                let base = encoding_base(count);
                let labels: Vec<Option<u128>> = (0..mol.len())
                    .map(|i| {
                        let own = classes[i]? as u128;
                        let mut nbrs: Vec<u128> = mol
                            .neighbors(i)
                            .iter()
                            .filter_map(|&n| classes[n].map(|c| c as u128))
                            .collect();
                        nbrs.sort_unstable();
                        let mut label = own;
                        let mut place = 1u128;
                        for n in nbrs {
                            place = place.wrapping_mul(base);
                            label = label.wrapping_add(n.wrapping_mul(place));
                        }
                        Some(label)
                    })
                    .collect();
                let new_count = renumber(&labels, &mut classes);
                debug!("refinement round {rounds}: {count} -> {new_count}");
                if new_count == count {
                    converged = true;
                    break;
                }
                count = new_count;
            }
            if !converged {
                warn!(
                    "symmetry classes not converged after {rounds} rounds, \
                     accepting {count} classes"
                );
            }
        }

        // atoms of one element hanging off the same atom are equivalent even
        // if refinement separated them
        for _ in 0..2 {
            for &i in &frag {
                let mut terminal: BTreeMap<usize, usize> = BTreeMap::new();
                for &n in mol.neighbors(i) {
                    if mol.degree(n) != 1 {
                        continue;
                    }
                    let Some(c) = classes[n] else { continue };
                    let z = mol.atoms()[n].atomic_number;
                    let entry = terminal.entry(z).or_insert(c);
                    *entry = (*entry).min(c);
                }
                for &n in mol.neighbors(i) {
                    if mol.degree(n) == 1 {
                        let z = mol.atoms()[n].atomic_number;
                        if let Some(&c) = terminal.get(&z) {
                            classes[n] = Some(c);
                        }
                    }
                }
            }
        }

        // final ids follow the initial invariants, with the refined class
        // breaking ties within one invariant
        let mut lowest: BTreeMap<usize, u64> = BTreeMap::new();
        for &i in &frag {
            if let Some(c) = classes[i] {
                let e = lowest.entry(c).or_insert(invariants[i]);
                *e = (*e).min(invariants[i]);
            }
        }
        let order: Vec<Option<(u64, usize)>> = classes
            .iter()
            .map(|c| c.map(|c| (lowest[&c], c)))
            .collect();
        let count = renumber(&order, &mut classes);

        Ok(Classes {
            classes,
            count,
            converged,
            rounds,
            type_start: self.type_start,
        })
    }
}

/// The result of [Classifier::classify]: a class id in 1..=count for every
/// classified atom
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classes {
    classes: Vec<Option<usize>>,
    count: usize,
    converged: bool,
    rounds: usize,
    type_start: usize,
}

impl Classes {
    /// the symmetry class of `atom`, if it was classified
    pub fn class(&self, atom: usize) -> Option<usize> {
        self.classes.get(atom).copied().flatten()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// false if refinement was still splitting classes when it hit the round
    /// limit
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// the members of each class, with `partition()[c - 1]` holding the
    /// sorted atoms of class `c`
    pub fn partition(&self) -> Vec<Vec<usize>> {
        let mut ret = vec![Vec::new(); self.count];
        for (i, c) in self.classes.iter().enumerate() {
            if let Some(c) = c {
                ret[c - 1].push(i);
            }
        }
        ret
    }

    /// the parameter-file type number of `atom`. the highest class maps to
    /// `type_start`
    pub fn type_number(&self, atom: usize) -> Option<usize> {
        self.class(atom).map(|c| self.type_start + (self.count - c))
    }

    fn types(&self, q: Quad) -> Option<[usize; 4]> {
        let [a, b, c, d] = q;
        Some([
            self.type_number(a)?,
            self.type_number(b)?,
            self.type_number(c)?,
            self.type_number(d)?,
        ])
    }

    /// the class key of the torsion `q`, if all of its atoms are classified
    pub fn key(&self, q: Quad) -> Option<ClassKey> {
        self.types(q).map(ClassKey::new)
    }

    /// return `q` traversed in the same direction as its class key
    pub fn orient(&self, q: Quad) -> Option<Quad> {
        let types = self.types(q)?;
        if reversed(&types) {
            let [a, b, c, d] = q;
            Some([d, c, b, a])
        } else {
            Some(q)
        }
    }
}
