//! tests for building and querying molecular graphs

use approx::assert_abs_diff_eq;
use test_case::test_case;

use crate::tests::{ethane, methanol};
use crate::*;

fn atoms(n: usize) -> Vec<Atom> {
    (0..n)
        .map(|i| Atom::new(6, i as f64, 0.0, 0.0))
        .collect()
}

#[test_case(vec![Bond::single(0, 3)], GraphError::MissingAtom { bond: 0, atom: 3 }; "missing atom")]
#[test_case(vec![Bond::single(0, 1), Bond::single(2, 2)], GraphError::SelfBond { bond: 1, atom: 2 }; "self bond")]
#[test_case(vec![Bond::single(0, 1), Bond::new(1, 0, 2)], GraphError::DuplicateBond { bond: 1, i: 1, j: 0 }; "duplicate")]
fn malformed(bonds: Vec<Bond>, want: GraphError) {
    let got = Molecule::new(atoms(3), bonds).unwrap_err();
    assert_eq!(got, want);
}

#[test]
fn malformed_json() {
    let got = serde_json::from_str::<Molecule>(
        r#"{
  "atoms": [
    {"element": "C", "x": 0.0, "y": 0.0, "z": 0.0},
    {"element": "O", "x": 1.4, "y": 0.0, "z": 0.0}
  ],
  "bonds": [[0, 2, 1]]
}"#,
    );
    assert!(got.is_err());
}

#[test]
fn json() {
    let mol = ethane();
    let s = serde_json::to_string(&mol).unwrap();
    let got: Molecule = serde_json::from_str(&s).unwrap();
    assert_eq!(got, mol);
    assert_eq!(got.neighbors(0), &[1, 2, 3, 4]);
}

#[test]
fn neighbors() {
    let mol = methanol();
    assert_eq!(mol.len(), 6);
    assert_eq!(mol.neighbors(0), &[1, 3, 4, 5]);
    assert_eq!(mol.neighbors(1), &[0, 2]);
    assert_eq!(mol.degree(2), 1);
    assert_eq!(mol.atomic_numbers(), vec![6, 8, 1, 1, 1, 1]);
}

#[test]
fn fragments() {
    let mut atoms = ethane().atoms().to_vec();
    atoms.push(Atom::new_from_label("O", 5.0, 0.0, 0.0));
    atoms.push(Atom::new_from_label("H", 5.9, 0.0, 0.0));
    atoms.push(Atom::new_from_label("He", -5.0, 0.0, 0.0));
    let mut bonds = ethane().bonds().to_vec();
    bonds.push(Bond::single(8, 9));
    let mol = Molecule::new(atoms, bonds).unwrap();
    assert_eq!(
        mol.fragments(),
        vec![(0..8).collect::<Vec<_>>(), vec![8, 9], vec![10]]
    );
    assert_eq!(mol.largest_fragment(), (0..8).collect::<Vec<_>>());
}

#[test]
fn rings() {
    // cyclopropane carbons with a methyl group hanging off one of them
    let mol = Molecule::new(
        atoms(4),
        vec![
            Bond::single(0, 1),
            Bond::single(1, 2),
            Bond::single(2, 0),
            Bond::single(0, 3),
        ],
    )
    .unwrap();
    assert!(mol.in_ring(0));
    assert!(mol.in_ring(1));
    assert!(mol.in_ring(2));
    assert!(!mol.in_ring(3));
    assert!(mol.atom_in_ring(0));
    assert!(!mol.atom_in_ring(3));
    assert_eq!(mol.eccentricity(3), 2);
    assert_eq!(mol.eccentricity(0), 1);
}

#[test]
fn rotors() {
    let mol = ethane();
    assert!(mol.is_rotor(0));
    assert!((1..7).all(|b| !mol.is_rotor(b)));

    let double = Molecule::new(
        atoms(4),
        vec![Bond::single(0, 1), Bond::new(1, 2, 2), Bond::single(2, 3)],
    )
    .unwrap();
    assert!(!double.is_rotor(1));
    let single = Molecule::new(
        atoms(4),
        vec![Bond::single(0, 1), Bond::single(1, 2), Bond::single(2, 3)],
    )
    .unwrap();
    assert!(single.is_rotor(1));
    assert!(!single.is_rotor(0));
}

#[test_case(60.0)]
#[test_case(-90.0)]
#[test_case(135.0)]
fn dihedral(deg: f64) {
    let (s, c) = deg.to_radians().sin_cos();
    let mol = Molecule::new(
        vec![
            Atom::new_from_label("H", 1.0, 0.0, 0.0),
            Atom::new_from_label("C", 0.0, 0.0, 0.0),
            Atom::new_from_label("C", 0.0, 0.0, 1.5),
            Atom::new_from_label("H", c, s, 1.5),
        ],
        vec![Bond::single(0, 1), Bond::single(1, 2), Bond::single(2, 3)],
    )
    .unwrap();
    assert_abs_diff_eq!(mol.dihedral([0, 1, 2, 3]), deg, epsilon = 1e-10);
    assert_abs_diff_eq!(mol.dihedral([3, 2, 1, 0]), deg, epsilon = 1e-10);
}

#[test]
fn ethane_dihedrals() {
    let mol = ethane();
    assert_abs_diff_eq!(mol.dihedral([2, 0, 1, 5]), 60.0, epsilon = 1e-10);
    assert_abs_diff_eq!(mol.dihedral([2, 0, 1, 6]), 180.0, epsilon = 1e-10);
    assert_abs_diff_eq!(mol.dihedral([3, 0, 1, 5]), -60.0, epsilon = 1e-10);
}

#[test]
fn display() {
    let mol = Molecule::new(
        vec![
            Atom::new_from_label("C", 0.0, 0.0, 0.0).aromatic(true),
            Atom::new_from_label("O", 1.25, 0.0, 0.0),
        ],
        vec![Bond::new(0, 1, 2)],
    )
    .unwrap();
    let got: Molecule = mol.to_string().parse().unwrap();
    assert_eq!(got, mol);
}

#[test]
fn numeric_elements() {
    let got: Molecule = "
6   0.000   0.000   0.000
8   1.430   0.000   0.000
1   1.750   0.900   0.000
0 1
1 2 1
"
    .parse()
    .unwrap();
    assert_eq!(got.atomic_numbers(), vec![6, 8, 1]);
    assert_eq!(got.bonds().len(), 2);
    assert_eq!(got.neighbors(1), &[0, 2]);

    assert!("C 0.0 0.0 0.0\n0 1 x".parse::<Molecule>().is_err());
    assert!("C 0.0 0.0".parse::<Molecule>().is_err());
}
