use std::{fmt::Display, io, str::FromStr};

use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

use crate::Vec3;

/// A single atom of a molecular graph. Bonding is stored on the
/// [crate::Molecule], so an `Atom` only knows what it is and where it sits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Atom {
    #[serde(rename = "element", with = "element")]
    pub atomic_number: usize,
    #[serde(default)]
    pub aromatic: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.abs_diff_eq(other, Self::default_epsilon())
    }
}

impl AbsDiffEq for Atom {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-8
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() < epsilon;
        self.atomic_number == other.atomic_number
            && self.aromatic == other.aromatic
            && close(self.x, other.x)
            && close(self.y, other.y)
            && close(self.z, other.z)
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:2} {:15.10} {:15.10} {:15.10}",
            self.label(),
            self.x,
            self.y,
            self.z
        )?;
        if self.aromatic {
            write!(f, " ar")?;
        }
        Ok(())
    }
}

impl FromStr for Atom {
    type Err = io::Error;

    /// parse an Atom from a line like
    ///  C 1.0 1.0 1.0
    /// optionally followed by `ar` to mark the atom as aromatic. the element
    /// may also be given by its atomic number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        let aromatic = match fields.len() {
            4 => false,
            5 if fields[4].eq_ignore_ascii_case("ar") => true,
            _ => {
                return Err(io::Error::other("wrong number of fields in Atom"));
            }
        };
        let coord = fields[1..4].iter().map(|s| s.parse::<f64>());
        if coord.clone().any(|s| s.is_err()) {
            return Err(io::Error::other(
                "failed to parse coordinate field as f64",
            ));
        }
        let coord: Vec<_> = coord.flatten().collect();
        let atomic_number = symbol_to_number(fields[0])
            .or_else(|| fields[0].parse().ok())
            .ok_or_else(|| {
                io::Error::other(format!("unknown atomic symbol {}", fields[0]))
            })?;
        let mut atom = Self::new(atomic_number, coord[0], coord[1], coord[2]);
        atom.aromatic = aromatic;
        Ok(atom)
    }
}

pub const NUMBER_TO_SYMBOL: [&str; 55] = [
    "X", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg",
    "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn",
    "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb",
    "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe",
];

/// look up `s` as an atomic symbol, retrying in title case so that `CL` and
/// `cl` both resolve to chlorine
pub fn symbol_to_number(s: &str) -> Option<usize> {
    NUMBER_TO_SYMBOL
        .iter()
        .position(|&x| x == s)
        .or_else(|| NUMBER_TO_SYMBOL.iter().position(|&x| x == titlecase(s)))
}

fn titlecase(s: &str) -> String {
    let mut cs = s.chars();
    let Some(first) = cs.next() else {
        return String::new();
    };
    let mut ret = first.to_uppercase().to_string();
    for c in cs {
        ret.push_str(&c.to_lowercase().to_string());
    }
    ret
}

impl Atom {
    pub fn new(atomic_number: usize, x: f64, y: f64, z: f64) -> Self {
        Self {
            atomic_number,
            aromatic: false,
            x,
            y,
            z,
        }
    }

    /// panics if `atomic_symbol` is not a known element
    pub fn new_from_label(atomic_symbol: &str, x: f64, y: f64, z: f64) -> Self {
        let num = symbol_to_number(atomic_symbol).unwrap_or_else(|| {
            panic!("failed to locate atomic symbol {atomic_symbol}")
        });
        Self::new(num, x, y, z)
    }

    pub fn aromatic(mut self, aromatic: bool) -> Self {
        self.aromatic = aromatic;
        self
    }

    #[inline]
    pub fn label(&self) -> &str {
        NUMBER_TO_SYMBOL.get(self.atomic_number).copied().unwrap_or("X")
    }

    #[inline]
    pub fn is_hydrogen(&self) -> bool {
        self.atomic_number == 1
    }

    pub fn coord(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// elements are written as symbols but may be read back as either symbols or
/// atomic numbers
mod element {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{NUMBER_TO_SYMBOL, symbol_to_number};

    pub(super) fn serialize<S>(n: &usize, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match NUMBER_TO_SYMBOL.get(*n) {
            Some(sym) => s.serialize_str(sym),
            None => s.serialize_u64(*n as u64),
        }
    }

    pub(super) fn deserialize<'de, D>(d: D) -> Result<usize, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(usize),
            Symbol(String),
        }
        match Raw::deserialize(d)? {
            Raw::Number(n) => Ok(n),
            Raw::Symbol(s) => symbol_to_number(&s).ok_or_else(|| {
                D::Error::custom(format!("unknown atomic symbol {s}"))
            }),
        }
    }
}
