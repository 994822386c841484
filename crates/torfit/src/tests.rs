use approx::assert_abs_diff_eq;
use symm::{Atom, Bond, Classifier, Extractor, Molecule, Topological};
use test_case::test_case;

use super::*;

fn key(s: &str) -> ClassKey {
    s.parse().unwrap()
}

fn grid(step: usize) -> Vec<f64> {
    (0..360).step_by(step).map(|x| x as f64).collect()
}

fn cos3(angles: &[f64], v: f64) -> Vec<f64> {
    angles
        .iter()
        .map(|x| v * (1.0 + (3.0 * x).to_radians().cos()))
        .collect()
}

fn term(key: ClassKey, phase: usize) -> TorsionTerm {
    TorsionTerm {
        key,
        phase,
        hydrogen: false,
    }
}

#[test]
fn recover_threefold() {
    let k = key("401 402 402 401");
    let angles = grid(30);
    let profile = Profile {
        qm: cos3(&angles, 2.0)
            .iter()
            .zip(&angles)
            .map(|(e, x)| e + 0.1 * (1.0 + x.to_radians().cos()) + 5.0)
            .collect(),
        mm: vec![-1.0; angles.len()],
        angles,
    };
    let got = Fitter::default().fit(k, &[term(k, 0)], &profile);

    // E = K/2 (1 + cos 3x), so a 2.0 (1 + cos 3x) profile has K = 4 and a
    // barrier of 2
    assert_abs_diff_eq!(got.barrier(k, 3).unwrap(), 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(got.coefficient(k, 3).unwrap(), 4.0, epsilon = 1e-6);
    assert_abs_diff_eq!(got.coefficient(k, 1).unwrap(), 0.2, epsilon = 1e-6);
    assert_abs_diff_eq!(got.coefficient(k, 2).unwrap(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(got.offset, 0.0, epsilon = 1e-6);
    assert!(!got.report.fallback);
    assert_eq!(got.report.solves, 1);
    assert_eq!(got.report.requested, 4);
    for (f, t) in got.fitted.iter().zip(&got.target) {
        assert_abs_diff_eq!(f, t, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(
        got.evaluate(15.0),
        2.0 * (1.0 + 45f64.to_radians().cos())
            + 0.1 * (1.0 + 15f64.to_radians().cos()),
        epsilon = 1e-6
    );
}

#[test]
fn recover_onefold() {
    let k = key("401 402 402 401");
    let angles = grid(30);
    let target: Vec<f64> = angles
        .iter()
        .zip(cos3(&angles, 0.2))
        .map(|(x, c)| 0.75 * (1.0 + x.to_radians().cos()) + c)
        .collect();
    let got = Fitter::default().fit_target(k, &[term(k, 0)], &angles, &target);
    assert_abs_diff_eq!(got.coefficient(k, 1).unwrap(), 1.5, epsilon = 1e-6);
    assert_abs_diff_eq!(got.coefficient(k, 2).unwrap(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(got.coefficient(k, 3).unwrap(), 0.4, epsilon = 1e-6);
}

#[test]
fn too_few_samples() {
    let k = key("401 402 402 401");
    let angles = vec![0.0, 30.0];
    let target = vec![1.0, 0.0];
    let got = Fitter::default().fit_target(k, &[term(k, 0)], &angles, &target);
    assert_eq!(got.report.requested, 4);
    assert!(got.report.free <= 2);
    assert_eq!(got.report.free, 1);
    assert!(got.report.fallback);
    assert_eq!(got.report.samples, 2);
}

#[test]
fn prune_peripheral() {
    let a = key("401 403 404 402");
    let b = key("405 403 404 406");
    let angles: Vec<f64> = vec![0.0, 30.0, 60.0, 90.0, 120.0];
    let target: Vec<f64> = angles
        .iter()
        .map(|x| 0.5 * (1.0 + (3.0 * x).to_radians().cos()))
        .collect();
    let got = Fitter::default().fit_target(
        a,
        &[term(a, 0), term(b, 90)],
        &angles,
        &target,
    );
    // fold 2 of b shares a's parameter, so 3 + 2 + 1
    assert_eq!(got.report.requested, 6);
    // b is more peripheral, so its folds go first
    assert_eq!(got.report.free, 4);
    assert!(got.report.free <= got.report.samples);
    let params = got.parameters();
    assert_eq!(params[&b], BTreeMap::from([(1, 0.0), (2, 0.0), (3, 0.0)]));
    assert!(got.coefficient(a, 3).is_some());
    assert!(got.coefficient(b, 3).is_none());
}

#[test]
fn shared_folds() {
    let a = key("401 403 404 402");
    let b = key("405 403 404 406");
    let angles = grid(30);
    let target = cos3(&angles, 2.0);
    let got = Fitter::default().fit_target(
        a,
        &[term(a, 0), term(b, 0)],
        &angles,
        &target,
    );
    // identical responses for every fold
    assert_eq!(got.report.requested, 4);
    for fold in FOLDS {
        assert_eq!(got.coefficient(a, fold), got.coefficient(b, fold));
    }
    assert_abs_diff_eq!(got.coefficient(a, 3).unwrap(), 2.0, epsilon = 1e-6);
}

#[test]
fn opposite_phases() {
    let a = key("401 403 404 402");
    let b = key("405 403 404 406");
    let angles = grid(30);
    let target = cos3(&angles, 1.0);
    let got = Fitter::default().fit_target(
        a,
        &[term(a, 0), term(b, 60)],
        &angles,
        &target,
    );
    // 3(x + 60) = 3x + 180, so only fold 3 of b is exactly out of phase with
    // a and shares its parameter
    assert_eq!(got.report.requested, 6);
    assert_eq!(got.coefficient(a, 3), got.coefficient(b, 3));
}

#[test]
fn flat_response() {
    // three torsions 120 degrees apart cancel out for folds 1 and 2
    let k = key("401 402 402 401");
    let angles = grid(30);
    let target = cos3(&angles, 1.0);
    let got = Fitter::default().fit_target(
        k,
        &[term(k, 0), term(k, 120), term(k, 240)],
        &angles,
        &target,
    );
    assert_eq!(got.report.requested, 2);
    assert_eq!(got.coefficient(k, 1), None);
    assert_eq!(got.coefficient(k, 2), None);
    assert_abs_diff_eq!(got.coefficient(k, 3).unwrap(), 2.0 / 3.0, epsilon = 1e-6);
    assert_eq!(got.terms[0].count, 3);
}

#[test_case(&[0.0, 3.1, 0.2, 5.0, 1.0, 0.3, 2.2, 4.0, 0.1, 0.0, 1.7, 2.5]; "ragged")]
#[test_case(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 9.0]; "spike")]
#[test_case(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]; "flat")]
fn amplitude_bound(target: &[f64]) {
    let a = key("401 403 404 402");
    let b = key("405 403 404 406");
    let angles = grid(30);
    let got = Fitter::default().fit_target(
        a,
        &[term(a, 0), term(b, 45)],
        &angles,
        target,
    );
    assert!(got.report.free <= got.report.samples);
    let amp = spread(target);
    for t in &got.terms {
        for k in t.coefficients.values() {
            assert!(k.abs() <= amp + 1e-9 * amp.max(1.0), "{k} > {amp}");
        }
    }
    for k in got.parameters().values().flat_map(|c| c.values()) {
        assert!(k.abs() <= amp + 1e-9 * amp.max(1.0), "{k} > {amp}");
    }
}

#[test]
fn hydrogen_zeros() {
    let k = key("402 403 403 402");
    let h = key("401 403 403 402");
    let angles = grid(30);
    let target = cos3(&angles, 1.0);
    let got = Fitter::default().fit_target(
        k,
        &[
            term(k, 0),
            TorsionTerm {
                key: h,
                phase: 120,
                hydrogen: true,
            },
        ],
        &angles,
        &target,
    );
    assert_eq!(got.zeroed, vec![h]);
    let params = got.parameters();
    assert_eq!(params[&h], BTreeMap::from([(1, 0.0), (2, 0.0), (3, 0.0)]));
    assert!(params[&k].contains_key(&3));
}

#[test]
fn only_hydrogens() {
    let h = key("401 402 402 401");
    let angles = grid(30);
    let target = cos3(&angles, 1.0);
    let got = Fitter::default().fit_target(
        h,
        &[TorsionTerm {
            key: h,
            phase: 0,
            hydrogen: true,
        }],
        &angles,
        &target,
    );
    assert!(got.report.fallback);
    assert!(got.terms.is_empty());
    assert_abs_diff_eq!(got.offset, 1.0, epsilon = 1e-6);
    assert_eq!(got.parameters()[&h][&3], 0.0);
}

#[test]
fn difference() {
    let profile = Profile {
        angles: vec![0.0, 30.0, 60.0],
        qm: vec![-10.0, -9.0, -9.5],
        mm: vec![3.0, 3.5, 3.0],
    };
    let got = profile.difference();
    assert_abs_diff_eq!(got[0], 0.0);
    assert_abs_diff_eq!(got[1], 0.5);
    assert_abs_diff_eq!(got[2], 0.5);
}

/// C-C with one fluorine and one hydrogen on each carbon. The fluorines sit at
/// 0 and 60 degrees around the bond and the hydrogens at 180 and 240
fn difluoroethane() -> Molecule {
    let ring = |deg: f64, z: f64| {
        let (s, c) = deg.to_radians().sin_cos();
        (c, s, z)
    };
    let (fx, fy, fz) = ring(0.0, -0.4);
    let (hx, hy, hz) = ring(180.0, -0.4);
    let (gx, gy, gz) = ring(60.0, 1.9);
    let (ix, iy, iz) = ring(240.0, 1.9);
    Molecule::new(
        vec![
            Atom::new_from_label("C", 0.0, 0.0, 0.0),
            Atom::new_from_label("C", 0.0, 0.0, 1.5),
            Atom::new_from_label("F", fx, fy, fz),
            Atom::new_from_label("H", hx, hy, hz),
            Atom::new_from_label("F", gx, gy, gz),
            Atom::new_from_label("H", ix, iy, iz),
        ],
        vec![
            Bond::single(0, 1),
            Bond::single(0, 2),
            Bond::single(0, 3),
            Bond::single(1, 4),
            Bond::single(1, 5),
        ],
    )
    .unwrap()
}

#[test]
fn terms_for_bond() {
    let mol = difluoroethane();
    let classes =
        Classifier::default().classify_with(&mol, &Topological).unwrap();
    let bonds = Extractor::new().extract(&mol, &classes);
    assert_eq!(bonds.len(), 1);
    let bond = &bonds[0];
    assert_eq!(symm::canonical_order(bond.principal), [2, 0, 1, 4]);

    let got = TorsionTerm::for_bond(&mol, &classes, bond);
    let phases: Vec<_> = got.iter().map(|t| t.phase).collect();
    assert_eq!(phases, vec![0, 180, 180, 0]);
    let hydrogens: Vec<_> = got.iter().map(|t| t.hydrogen).collect();
    assert_eq!(hydrogens, vec![false, true, true, true]);
    assert_eq!(got[1].key, got[2].key);
    assert_ne!(got[0].key, got[3].key);
}
