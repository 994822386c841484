use std::{collections::VecDeque, error::Error, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

pub use atom::*;
pub use classes::*;
pub use invariant::*;
pub use key::*;
pub use torsion::*;

pub mod atom;
pub mod classes;
pub mod invariant;
pub mod key;
pub mod torsion;


use nalgebra as na;

type Vec3 = na::Vector3<f64>;

/// Errors for structurally malformed molecular graphs. These are the only
/// fatal errors in the classification stage
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GraphError {
    /// a bond refers to an atom index outside of the atom list
    MissingAtom { bond: usize, atom: usize },
    /// a bond connects an atom to itself
    SelfBond { bond: usize, atom: usize },
    /// the same pair of atoms is bonded twice
    DuplicateBond { bond: usize, i: usize, j: usize },
    /// the number of initial invariants doesn't match the number of atoms
    InvariantCount { atoms: usize, invariants: usize },
}

impl Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::MissingAtom { bond, atom } => {
                write!(f, "bond {bond} refers to missing atom {atom}")
            }
            GraphError::SelfBond { bond, atom } => {
                write!(f, "bond {bond} connects atom {atom} to itself")
            }
            GraphError::DuplicateBond { bond, i, j } => {
                write!(f, "bond {bond} duplicates the bond between {i} and {j}")
            }
            GraphError::InvariantCount { atoms, invariants } => write!(
                f,
                "expected {atoms} initial invariants, found {invariants}"
            ),
        }
    }
}

impl Error for GraphError {}

/// a covalent bond between atoms `i` and `j`. serialized as `[i, j, order]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct Bond {
    pub i: usize,
    pub j: usize,
    pub order: usize,
}

impl Bond {
    pub fn new(i: usize, j: usize, order: usize) -> Self {
        Self { i, j, order }
    }

    pub fn single(i: usize, j: usize) -> Self {
        Self::new(i, j, 1)
    }

    /// return the atom on the other side of the bond from `atom`, if `atom`
    /// is in the bond at all
    pub fn other(&self, atom: usize) -> Option<usize> {
        if self.i == atom {
            Some(self.j)
        } else if self.j == atom {
            Some(self.i)
        } else {
            None
        }
    }
}

impl From<[usize; 3]> for Bond {
    fn from([i, j, order]: [usize; 3]) -> Self {
        Self { i, j, order }
    }
}

impl From<Bond> for [usize; 3] {
    fn from(value: Bond) -> Self {
        [value.i, value.j, value.order]
    }
}

#[derive(Deserialize, Serialize)]
struct RawMolecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
}

impl TryFrom<RawMolecule> for Molecule {
    type Error = GraphError;

    fn try_from(value: RawMolecule) -> Result<Self, Self::Error> {
        Self::new(value.atoms, value.bonds)
    }
}

impl From<Molecule> for RawMolecule {
    fn from(value: Molecule) -> Self {
        Self {
            atoms: value.atoms,
            bonds: value.bonds,
        }
    }
}

/// A molecular graph. The atoms and bonds are immutable once the graph is
/// built, which is also the only point where the graph is validated
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMolecule", into = "RawMolecule")]
pub struct Molecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    /// neighbor lists in bond order
    neighbors: Vec<Vec<usize>>,
}

impl Molecule {
    pub fn new(atoms: Vec<Atom>, bonds: Vec<Bond>) -> Result<Self, GraphError> {
        let natoms = atoms.len();
        let mut neighbors = vec![Vec::new(); natoms];
        for (b, bond) in bonds.iter().enumerate() {
            for atom in [bond.i, bond.j] {
                if atom >= natoms {
                    return Err(GraphError::MissingAtom { bond: b, atom });
                }
            }
            if bond.i == bond.j {
                return Err(GraphError::SelfBond { bond: b, atom: bond.i });
            }
            if neighbors[bond.i].contains(&bond.j) {
                return Err(GraphError::DuplicateBond {
                    bond: b,
                    i: bond.i,
                    j: bond.j,
                });
            }
            neighbors[bond.i].push(bond.j);
            neighbors[bond.j].push(bond.i);
        }
        Ok(Self {
            atoms,
            bonds,
            neighbors,
        })
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn neighbors(&self, atom: usize) -> &[usize] {
        &self.neighbors[atom]
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.neighbors[atom].len()
    }

    /// return the atomic numbers of each atoms as a vector
    pub fn atomic_numbers(&self) -> Vec<usize> {
        self.atoms.iter().map(|a| a.atomic_number).collect()
    }

    /// breadth-first distances from `start`, None for atoms in other fragments.
    /// the bond at index `skip` is treated as absent
    fn distances(&self, start: usize, skip: Option<usize>) -> Vec<Option<usize>> {
        let skipped = skip.map(|b| self.bonds[b]);
        let mut dist = vec![None; self.len()];
        dist[start] = Some(0);
        let mut queue = VecDeque::from([start]);
        while let Some(a) = queue.pop_front() {
            let d = dist[a].unwrap_or_default();
            for &n in &self.neighbors[a] {
                if let Some(s) = skipped {
                    if (s.i == a && s.j == n) || (s.j == a && s.i == n) {
                        continue;
                    }
                }
                if dist[n].is_none() {
                    dist[n] = Some(d + 1);
                    queue.push_back(n);
                }
            }
        }
        dist
    }

    /// partition the atoms into covalently bonded fragments. fragments are
    /// ordered by their lowest atom index and each one is sorted
    pub fn fragments(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.len()];
        let mut ret = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            let frag: Vec<usize> = self
                .distances(start, None)
                .iter()
                .enumerate()
                .filter_map(|(i, d)| d.map(|_| i))
                .collect();
            for &i in &frag {
                seen[i] = true;
            }
            ret.push(frag);
        }
        ret
    }

    /// return the atoms of the largest fragment, preferring the first one
    /// found on ties
    pub fn largest_fragment(&self) -> Vec<usize> {
        let mut best: Vec<usize> = Vec::new();
        for frag in self.fragments() {
            if frag.len() > best.len() {
                best = frag;
            }
        }
        best
    }

    /// the largest graph distance from `atom` to any atom in its fragment
    pub fn eccentricity(&self, atom: usize) -> usize {
        self.distances(atom, None)
            .into_iter()
            .flatten()
            .max()
            .unwrap_or_default()
    }

    /// a bond is in a ring if its atoms stay connected without it
    pub fn in_ring(&self, bond: usize) -> bool {
        let Bond { i, j, .. } = self.bonds[bond];
        self.distances(i, Some(bond))[j].is_some()
    }

    /// whether any bond to `atom` is part of a ring
    pub fn atom_in_ring(&self, atom: usize) -> bool {
        self.bonds
            .iter()
            .enumerate()
            .any(|(b, bond)| bond.other(atom).is_some() && self.in_ring(b))
    }

    /// the default structural predicate for a rotatable bond: a single,
    /// non-ring bond between two non-terminal atoms
    pub fn is_rotor(&self, bond: usize) -> bool {
        let Bond { i, j, order } = self.bonds[bond];
        order == 1
            && self.degree(i) > 1
            && self.degree(j) > 1
            && !self.in_ring(bond)
    }

    /// dihedral angle in degrees, in (-180, 180], of the torsion `a-b-c-d`.
    /// The value is unchanged by reversing the quadruplet
    pub fn dihedral(&self, [a, b, c, d]: Quad) -> f64 {
        let b1 = self.atoms[b].coord() - self.atoms[a].coord();
        let b2 = self.atoms[c].coord() - self.atoms[b].coord();
        let b3 = self.atoms[d].coord() - self.atoms[c].coord();
        let n1 = b1.cross(&b2);
        let n2 = b2.cross(&b3);
        let y = b2.norm() * b1.dot(&n2);
        let x = n1.dot(&n2);
        y.atan2(x).to_degrees()
    }
}

impl Display for Molecule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for atom in &self.atoms {
            writeln!(f, "{atom}")?;
        }
        for bond in &self.bonds {
            writeln!(f, "{:5}{:5}{:5}", bond.i, bond.j, bond.order)?;
        }
        Ok(())
    }
}

impl FromStr for Molecule {
    type Err = std::io::Error;

    /// parse an XYZ-like block followed by bond lines:
    ///
    /// ```text
    /// C    0.000   0.000   0.000
    /// O    1.430   0.000   0.000
    /// 0 1 1
    /// ```
    ///
    /// atom lines have a symbol or atomic number and three coordinates (plus
    /// an optional `ar` flag), bond lines have two zero-based atom indices and
    /// an optional bond order that defaults to 1
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut atoms = Vec::new();
        let mut bonds = Vec::new();
        for line in s.lines() {
            let fields: Vec<_> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() <= 3 {
                let nums = fields
                    .iter()
                    .map(|f| f.parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(std::io::Error::other)?;
                match nums[..] {
                    [i, j] => bonds.push(Bond::single(i, j)),
                    [i, j, order] => bonds.push(Bond::new(i, j, order)),
                    _ => {
                        return Err(std::io::Error::other(format!(
                            "malformed bond line `{line}`"
                        )));
                    }
                }
            } else {
                atoms.push(line.parse()?);
            }
        }
        Self::new(atoms, bonds).map_err(std::io::Error::other)
    }
}
