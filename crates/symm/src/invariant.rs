use crate::Molecule;

/// A source of initial per-atom labels for [crate::Classifier]. Atoms with
/// isomorphic local neighborhoods must receive equal labels, otherwise the
/// values are opaque.
pub trait GraphInvariant {
    fn invariants(&self, mol: &Molecule) -> Vec<u64>;
}

/// Precomputed invariants, taken as-is
impl GraphInvariant for [u64] {
    fn invariants(&self, _: &Molecule) -> Vec<u64> {
        self.to_vec()
    }
}

impl GraphInvariant for Vec<u64> {
    fn invariants(&self, mol: &Molecule) -> Vec<u64> {
        self.as_slice().invariants(mol)
    }
}

/// The default invariant, packing the classic atom-invariant vector into one
/// integer. From most to least significant: ring flag, atomic number, aromatic
/// flag, number of heavy-atom neighbors, total degree, and graph eccentricity
/// within the atom's fragment. Heavier and more connected atoms get larger
/// invariants, and so higher classes and lower type numbers.
#[derive(Clone, Copy, Debug, Default)]
pub struct Topological;

impl Topological {
    fn pack(fields: [(u64, u64); 6]) -> u64 {
        fields
            .into_iter()
            .fold(0, |acc, (value, width)| acc * width + value.min(width - 1))
    }
}

impl GraphInvariant for Topological {
    fn invariants(&self, mol: &Molecule) -> Vec<u64> {
        (0..mol.len())
            .map(|i| {
                let atom = &mol.atoms()[i];
                let heavy = mol
                    .neighbors(i)
                    .iter()
                    .filter(|&&n| !mol.atoms()[n].is_hydrogen())
                    .count();
                Self::pack([
                    (mol.atom_in_ring(i) as u64, 2),
                    (atom.atomic_number as u64, 256),
                    (atom.aromatic as u64, 2),
                    (heavy as u64, 16),
                    (mol.degree(i) as u64, 16),
                    (mol.eccentricity(i) as u64, 1 << 16),
                ])
            })
            .collect()
    }
}
