//! Rewriting the torsion lines of a parameter file

use std::{collections::BTreeMap, sync::LazyLock};

use log::info;
use regex::Regex;
use symm::ClassKey;
use torfit::FOLDS;

static TORSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*torsion\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)").unwrap()
});

/// coefficients for each fold, in kcal/mol, for each class key
pub type Parameters = BTreeMap<ClassKey, BTreeMap<usize, f64>>;

/// Replaces the coefficients of every `torsion` line in a parameter file
/// whose four type numbers match a fitted key. Every other line is copied
/// through unchanged.
pub struct Writer<'a> {
    params: &'a Parameters,
    fold_offsets: [f64; 3],
}

impl<'a> Writer<'a> {
    pub fn new(params: &'a Parameters, fold_offsets: [f64; 3]) -> Self {
        Self {
            params,
            fold_offsets,
        }
    }

    /// the `torsion` line for `key`, with zeros for any missing folds
    pub fn line(&self, key: &ClassKey, coeffs: &BTreeMap<usize, f64>) -> String {
        let [a, b, c, d] = key.types();
        let mut ret = format!(" torsion {a:>7} {b:>4} {c:>4} {d:>4}   ");
        for (fold, phase) in FOLDS.iter().zip(self.fold_offsets) {
            let k = coeffs.get(fold).copied().unwrap_or(0.0);
            ret.push_str(&format!(" {k:7.3} {phase:.1} {fold}"));
        }
        ret
    }

    /// the fitted key of a `torsion` line, if it has one
    fn key(&self, line: &str) -> Option<ClassKey> {
        let caps = TORSION.captures(line)?;
        let mut types = [0; 4];
        for (i, t) in types.iter_mut().enumerate() {
            *t = caps[i + 1].parse().ok()?;
        }
        let key = ClassKey::new(types);
        self.params.contains_key(&key).then_some(key)
    }

    /// rewrite `input`, keeping its line endings
    pub fn rewrite(&self, input: &str) -> String {
        let mut ret = String::with_capacity(input.len());
        let mut count = 0;
        for chunk in input.split_inclusive('\n') {
            let line = chunk.trim_end_matches(['\n', '\r']);
            match self.key(line) {
                Some(key) => {
                    ret.push_str(&self.line(&key, &self.params[&key]));
                    ret.push_str(&chunk[line.len()..]);
                    count += 1;
                }
                None => ret.push_str(chunk),
            }
        }
        info!("rewrote {count} torsion lines");
        ret
    }
}
