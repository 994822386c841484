use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};

/// four atom indices `a-b-c-d` describing a torsion about the `b-c` bond
pub type Quad = [usize; 4];

/// whether a quadruplet with the given values should be traversed in reverse
/// to put it in canonical order
#[inline]
pub(crate) fn reversed<T: PartialOrd>([a, b, c, d]: &[T; 4]) -> bool {
    b > c || (b == c && a > d)
}

/// put a raw atom-index quadruplet in canonical order, using the indices
/// themselves as the ordering values. `q` and its reverse map to the same
/// result
pub fn canonical_order(q: Quad) -> Quad {
    if reversed(&q) {
        let [a, b, c, d] = q;
        [d, c, b, a]
    } else {
        q
    }
}

/// The identifier of a torsion type: the type numbers of its four atoms in
/// canonical order. `ClassKey::new(q)` and `ClassKey::new(reverse of q)` are
/// always equal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize,
)]
#[serde(try_from = "String")]
pub struct ClassKey([usize; 4]);

impl ClassKey {
    pub fn new(types: [usize; 4]) -> Self {
        let [a, b, c, d] = types;
        if reversed(&types) {
            Self([d, c, b, a])
        } else {
            Self(types)
        }
    }

    pub fn types(&self) -> [usize; 4] {
        self.0
    }

    /// the sum of the outer type numbers. larger sums mark more peripheral
    /// torsions
    pub fn outer_sum(&self) -> usize {
        self.0[0] + self.0[3]
    }
}

impl Display for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a} {b} {c} {d}")
    }
}

#[derive(Debug, PartialEq)]
pub enum KeyError {
    Int(ParseIntError),
    Length(usize),
}

impl Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::Int(e) => write!(f, "failed to parse class key: {e}"),
            KeyError::Length(n) => {
                write!(f, "expected 4 fields in class key, found {n}")
            }
        }
    }
}

impl std::error::Error for KeyError {}

impl From<ParseIntError> for KeyError {
    fn from(value: ParseIntError) -> Self {
        Self::Int(value)
    }
}

impl FromStr for ClassKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sp = s
            .split_ascii_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<usize>, _>>()?;
        let types: [usize; 4] =
            sp.try_into().map_err(|v: Vec<_>| KeyError::Length(v.len()))?;
        Ok(Self::new(types))
    }
}

impl TryFrom<String> for ClassKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Serialize for ClassKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
