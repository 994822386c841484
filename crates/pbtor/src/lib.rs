use std::{collections::BTreeMap, fmt::Display, path::Path};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use symm::{
    ClassKey, Classes, Classifier, Extractor, GraphError, Molecule, Quad,
    RotatableBond, Topological,
};
use torfit::{BondFit, Fitter, Profile, TorsionTerm};

use config::Config;
use energy::{Cached, Evaluator, Refit};
use keyfile::Parameters;
use profile::{Aggregator, Scanner};

pub mod config;
pub mod energy;
pub mod keyfile;
pub mod profile;


#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Toml(toml::de::Error),
    Graph(GraphError),
    Config(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Json(e) => write!(f, "json error: {e}"),
            Error::Toml(e) => write!(f, "failed to parse config: {e}"),
            Error::Graph(e) => write!(f, "malformed molecule: {e}"),
            Error::Config(s) => write!(f, "invalid config: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

impl From<GraphError> for Error {
    fn from(value: GraphError) -> Self {
        Self::Graph(value)
    }
}

/// load a [Molecule] from a JSON file
pub fn load_molecule(path: impl AsRef<Path>) -> Result<Molecule, Error> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

/// One point of the comparison between the quantum energies and the
/// mechanical energies before and after fitting, each relative to its own
/// minimum
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub angle: f64,
    pub qm: f64,
    pub mm: f64,
    pub refit: f64,
}

/// The fit of one rotatable bond
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    pub central: [usize; 2],
    pub principal: Quad,
    pub key: ClassKey,
    pub fit: BondFit,
    pub rows: Vec<Row>,
}

/// Everything produced for one molecule, from its symmetry classes to its
/// fitted torsions. Each stage fills in its own fields and only reads the
/// earlier ones.
#[derive(Clone, Debug)]
pub struct Context {
    pub molecule: Molecule,
    pub classes: Classes,
    pub bonds: Vec<RotatableBond>,
    pub profiles: BTreeMap<ClassKey, Profile>,
    pub fits: Vec<Fit>,
}

fn relative(v: &[f64]) -> Vec<f64> {
    let lo = v.iter().copied().fold(f64::INFINITY, f64::min);
    v.iter().map(|x| x - lo).collect()
}

impl Context {
    /// classify the atoms of `molecule` and find its rotatable bonds
    pub fn new(molecule: Molecule, config: &Config) -> Result<Self, Error> {
        let classifier = Classifier::new(config.max_rounds, config.type_start);
        let classes = match &config.invariants {
            Some(inv) => classifier.classify(&molecule, inv)?,
            None => classifier.classify_with(&molecule, &Topological)?,
        };
        info!(
            "{} symmetry classes after {} rounds",
            classes.count(),
            classes.rounds()
        );
        let bonds = Extractor::new()
            .omit_torsions(config.omit.iter().copied())
            .omit_keys(config.omit_keys.iter().copied())
            .extract(&molecule, &classes);
        info!("{} rotatable bonds", bonds.len());
        Ok(Self {
            molecule,
            classes,
            bonds,
            profiles: BTreeMap::new(),
            fits: Vec::new(),
        })
    }

    /// the principal torsions of every bond except `bond`
    fn fixed(&self, bond: &RotatableBond) -> Vec<Quad> {
        self.bonds
            .iter()
            .map(|b| b.principal)
            .filter(|&p| p != bond.principal)
            .collect()
    }

    /// scan the principal torsion of every bond and average the profiles of
    /// those sharing a class key
    pub fn scan<Q, M>(&mut self, scanner: &Scanner, qm: &mut Q, mm: &mut M)
    where
        Q: Evaluator + ?Sized,
        M: Evaluator + ?Sized,
    {
        let mut agg = Aggregator::new();
        for bond in &self.bonds {
            let Some(key) = self.classes.key(bond.principal) else {
                continue;
            };
            let start = self.molecule.dihedral(bond.principal);
            let samples = scanner.scan(
                bond.principal,
                start,
                &self.fixed(bond),
                qm,
                mm,
            );
            debug!(
                "{} samples for {:?} ({key}) from {start:.1}",
                samples.len(),
                bond.principal
            );
            agg.record(key, &samples);
        }
        self.profiles = agg.profiles();
    }

    /// fit the torsions of every bond to the profile of its principal key.
    /// bonds without any energies are skipped
    pub fn fit(&mut self, fitter: &Fitter) {
        self.fits.clear();
        for bond in &self.bonds {
            let Some(key) = self.classes.key(bond.principal) else {
                continue;
            };
            let profile = match self.profiles.get(&key) {
                Some(p) if !p.is_empty() => p,
                _ => {
                    warn!(
                        "no energies for {key} around bond {:?}, skipping",
                        bond.central
                    );
                    continue;
                }
            };
            let terms = TorsionTerm::for_bond(&self.molecule, &self.classes, bond);
            let fit = fitter.fit(key, &terms, profile);
            info!(
                "fitted {key} with {} parameters to {} samples in {} solves",
                fit.report.free, fit.report.samples, fit.report.solves
            );
            self.fits.push(Fit {
                central: bond.central,
                principal: bond.principal,
                key,
                fit,
                rows: Vec::new(),
            });
        }
    }

    /// rescan each fitted principal torsion and compare the quantum energies
    /// to the mechanical energies with and without the fitted torsions
    pub fn diagnose<Q, M>(&mut self, scanner: &Scanner, qm: &mut Q, mm: &mut M)
    where
        Q: Evaluator + ?Sized,
        M: Evaluator + ?Sized,
    {
        let mut rows = Vec::with_capacity(self.fits.len());
        {
            let mut refit = Refit::new(
                &mut *mm,
                self.fits.iter().map(|f| (f.principal, &f.fit)),
            );
            for f in &self.fits {
                let Some(bond) =
                    self.bonds.iter().find(|b| b.principal == f.principal)
                else {
                    rows.push(Vec::new());
                    continue;
                };
                let start = self.molecule.dihedral(f.principal);
                let fixed = self.fixed(bond);
                let post =
                    scanner.scan(f.principal, start, &fixed, qm, &mut refit);
                rows.push(post);
            }
        }
        for (i, post) in rows.into_iter().enumerate() {
            let f = &self.fits[i];
            let Some(bond) =
                self.bonds.iter().find(|b| b.principal == f.principal)
            else {
                continue;
            };
            let start = self.molecule.dihedral(f.principal);
            let pre = scanner.scan(f.principal, start, &self.fixed(bond), qm, mm);
            // the refitted energies share the censoring of the base ones
            let pairs: Vec<_> = pre.iter().zip(&post).collect();
            let qs: Vec<f64> = pairs.iter().map(|(s, _)| s.qm).collect();
            let ms: Vec<f64> = pairs.iter().map(|(s, _)| s.mm).collect();
            let rs: Vec<f64> = pairs.iter().map(|(_, p)| p.mm).collect();
            let (qs, ms, rs) = (relative(&qs), relative(&ms), relative(&rs));
            self.fits[i].rows = pairs
                .iter()
                .enumerate()
                .map(|(j, (s, _))| Row {
                    angle: s.angle,
                    qm: qs[j],
                    mm: ms[j],
                    refit: rs[j],
                })
                .collect();
        }
    }

    /// the combined parameter table of every fitted bond. when two bonds
    /// fit the same key, the later bond wins
    pub fn parameters(&self) -> Parameters {
        let mut ret = Parameters::new();
        for f in &self.fits {
            ret.extend(f.fit.parameters());
        }
        ret
    }

    pub fn output(&self) -> Output {
        Output {
            types: (0..self.molecule.len())
                .map(|i| self.classes.type_number(i))
                .collect(),
            classes: self.classes.count(),
            converged: self.classes.converged(),
            bonds: self.fits.clone(),
            parameters: self.parameters(),
        }
    }
}

/// Classify `molecule`, scan and fit each of its rotatable bonds, and compare
/// the fits to the quantum energies. Every energy is requested from `qm` and
/// `mm` at most once
pub fn run<Q, M>(
    config: &Config,
    molecule: Molecule,
    qm: Q,
    mm: M,
) -> Result<Context, Error>
where
    Q: Evaluator,
    M: Evaluator,
{
    config.validate()?;
    let mut ctx = Context::new(molecule, config)?;
    let scanner = Scanner::new(config.scan_step);
    let mut qm = Cached::new(qm);
    let mut mm = Cached::new(mm);
    ctx.scan(&scanner, &mut qm, &mut mm);
    ctx.fit(&Fitter::new(config.fold_offsets));
    ctx.diagnose(&scanner, &mut qm, &mut mm);
    debug!(
        "qm cache: {} hits, {} misses; mm cache: {} hits, {} misses",
        qm.hits(),
        qm.misses(),
        mm.hits(),
        mm.misses()
    );
    Ok(ctx)
}

/// The serialized result of a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// the type number of each atom, or None for atoms outside the largest
    /// fragment
    pub types: Vec<Option<usize>>,
    pub classes: usize,
    pub converged: bool,
    pub bonds: Vec<Fit>,
    pub parameters: Parameters,
}

impl Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} symmetry classes", self.classes)?;
        if !self.converged {
            write!(f, " (not converged)")?;
        }
        writeln!(f)?;
        for b in &self.bonds {
            let [i, j] = b.central;
            let r = &b.fit.report;
            writeln!(
                f,
                "\nbond {i}-{j}, principal {:?} ({}): {} samples, \
                 {} free parameters, {} solves, rss = {:.3e}{}",
                b.principal,
                b.key,
                r.samples,
                r.free,
                r.solves,
                r.rss,
                if r.fallback { ", fallback" } else { "" },
            )?;
            writeln!(
                f,
                "{:>8}{:>12}{:>12}{:>12}",
                "angle", "qm", "mm", "refit"
            )?;
            for row in &b.rows {
                writeln!(
                    f,
                    "{:8.1}{:12.4}{:12.4}{:12.4}",
                    row.angle, row.qm, row.mm, row.refit
                )?;
            }
        }
        writeln!(f, "\nparameters:")?;
        for (key, coeffs) in &self.parameters {
            write!(f, "{:>20}", key.to_string())?;
            for (fold, k) in coeffs {
                write!(f, "  K{fold} = {k:8.4}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
