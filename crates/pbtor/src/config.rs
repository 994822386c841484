//! Configuration settings for a torsion fitting run

use std::{
    fmt::{Debug, Display},
    path::Path,
};

use serde::{Deserialize, Serialize};
use symm::{ClassKey, Quad};

use crate::Error;


#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The JSON file containing the molecular graph: a list of atoms with
    /// their element, optional aromatic flag, and Cartesian coordinates, and a
    /// list of bonds as `[i, j, order]`.
    molecule: String,

    /// The JSON file containing the tabulated quantum and mechanical energies
    /// for each scanned torsion.
    scans: String,

    /// An optional parameter file whose torsion lines should be rewritten
    /// with the fitted coefficients. If this is omitted, only the JSON output
    /// is written.
    params: Option<String>,

    /// The file to write the rewritten parameters to. Defaults to final.key.
    output: Option<String>,

    /// Optional precomputed initial invariants, one per atom. If these are
    /// not provided, they are derived from the molecular graph.
    invariants: Option<Vec<u64>>,

    /// The maximum number of refinement rounds in the symmetry
    /// classification. Defaults to 100.
    max_rounds: Option<usize>,

    /// The type number given to the highest symmetry class. Defaults to 401.
    type_start: Option<usize>,

    /// The spacing in degrees of the torsion scans. Must divide 360. Defaults
    /// to 30.
    scan_step: Option<usize>,

    /// The phase offsets in degrees of the one-, two-, and three-fold cosine
    /// terms. Defaults to [0.0, 180.0, 0.0].
    fold_offsets: Option<[f64; 3]>,

    /// Torsions, given as four atom indices in either direction, whose bonds
    /// should not be fitted.
    #[serde(default)]
    omit: Vec<Quad>,

    /// Class keys, given as strings like "401 402 402 401", whose bonds should
    /// not be fitted.
    #[serde(default)]
    omit_keys: Vec<ClassKey>,
}

/// Construct a full `Config` using [Config::load] on a TOML file or use
/// [Config::new] and the Builder pattern
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(from = "RawConfig")]
pub struct Config {
    /// path to the molecule JSON file
    pub molecule: String,

    /// path to the scan JSON file
    pub scans: String,

    /// the parameter file to rewrite, if any
    pub params: Option<String>,

    /// where to write the rewritten parameter file
    pub output: String,

    /// initial invariants to use instead of [symm::Topological]. must have
    /// one entry per atom
    pub invariants: Option<Vec<u64>>,

    pub max_rounds: usize,

    pub type_start: usize,

    /// scan spacing in degrees
    pub scan_step: usize,

    pub fold_offsets: [f64; 3],

    pub omit: Vec<Quad>,

    pub omit_keys: Vec<ClassKey>,
}

impl From<RawConfig> for Config {
    fn from(rc: RawConfig) -> Self {
        let def = Self::new(rc.molecule, rc.scans);
        Self {
            params: rc.params,
            output: rc.output.unwrap_or(def.output),
            invariants: rc.invariants,
            max_rounds: rc.max_rounds.unwrap_or(def.max_rounds),
            type_start: rc.type_start.unwrap_or(def.type_start),
            scan_step: rc.scan_step.unwrap_or(def.scan_step),
            fold_offsets: rc.fold_offsets.unwrap_or(def.fold_offsets),
            omit: rc.omit,
            omit_keys: rc.omit_keys,
            ..def
        }
    }
}

macro_rules! int_builders {
    ($($name: ident$(,)*)*) => {
        $(pub fn $name(mut self, i: usize) -> Self {
            self.$name = i;
            self
        })*
    }
}

impl Config {
    /// Construct a [Config] with default values for `params` (`None`),
    /// `output` (final.key), `invariants` (`None`), `max_rounds` (100),
    /// `type_start` (401), `scan_step` (30), `fold_offsets` (0, 180, 0), and
    /// no omitted torsions
    pub fn new(molecule: impl Into<String>, scans: impl Into<String>) -> Self {
        Self {
            molecule: molecule.into(),
            scans: scans.into(),
            params: None,
            output: String::from("final.key"),
            invariants: None,
            max_rounds: 100,
            type_start: 401,
            scan_step: 30,
            fold_offsets: [0.0, 180.0, 0.0],
            omit: Vec::new(),
            omit_keys: Vec::new(),
        }
    }

    pub fn params(mut self, params: Option<String>) -> Self {
        self.params = params;
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn invariants(mut self, invariants: Option<Vec<u64>>) -> Self {
        self.invariants = invariants;
        self
    }

    int_builders!(max_rounds, type_start, scan_step);

    pub fn fold_offsets(mut self, fold_offsets: [f64; 3]) -> Self {
        self.fold_offsets = fold_offsets;
        self
    }

    pub fn omit(mut self, omit: Vec<Quad>) -> Self {
        self.omit = omit;
        self
    }

    pub fn omit_keys(mut self, omit_keys: Vec<ClassKey>) -> Self {
        self.omit_keys = omit_keys;
        self
    }

    /// load a [Config] from the TOML file specified by `filename` and check
    /// that its settings are usable
    pub fn load<P>(filename: P) -> Result<Self, Error>
    where
        P: AsRef<Path> + Debug,
    {
        let contents = std::fs::read_to_string(&filename)?;
        let ret: Self = toml::from_str(&contents)?;
        ret.validate()?;
        Ok(ret)
    }

    /// check that the settings in `self` make any sense
    pub fn validate(&self) -> Result<(), Error> {
        if self.scan_step == 0 || 360 % self.scan_step != 0 {
            return Err(Error::Config(format!(
                "scan_step ({}) must be a positive divisor of 360",
                self.scan_step
            )));
        }
        if self.max_rounds == 0 {
            return Err(Error::Config(String::from(
                "max_rounds must be at least 1",
            )));
        }
        if self.type_start == 0 {
            return Err(Error::Config(String::from(
                "type_start must be at least 1",
            )));
        }
        Ok(())
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            molecule,
            scans,
            params,
            output,
            invariants,
            max_rounds,
            type_start,
            scan_step,
            fold_offsets,
            omit,
            omit_keys,
        } = self;
        write!(
            f,
            "
Configuration Options:
molecule = {molecule}
scans = {scans}
params = {}
output = {output}
max_rounds = {max_rounds}
type_start = {type_start}
scan_step = {scan_step}
fold_offsets = {fold_offsets:?}
",
            params.as_deref().unwrap_or(""),
        )?;
        if let Some(inv) = invariants {
            write!(f, "invariants = [ ")?;
            for i in inv {
                write!(f, "{i}, ")?;
            }
            writeln!(f, "]")?;
        }
        for q in omit {
            writeln!(f, "omit = {q:?}")?;
        }
        for k in omit_keys {
            writeln!(f, "omit_key = {k}")?;
        }
        Ok(())
    }
}
