// ========================================================================================
//                      Clinical status, omics type and artifact paths
// ========================================================================================

use crate::config::Settings;
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// The clinical question a model was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Status {
    #[value(name = "case_control")]
    CaseControl,
    #[value(name = "cancer_stage")]
    CancerStage,
}

/// The molecular layer an omics table was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum OmicsKind {
    #[value(name = "methylation")]
    Methylation,
    #[value(name = "miRNA")]
    MiRna,
    #[value(name = "mRNA")]
    MRna,
    #[value(name = "lncRNA")]
    LncRna,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("'{found}' is not a valid {kind}; expected one of: {expected}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub found: String,
    pub expected: String,
}

impl Status {
    pub const ALL: [Status; 2] = [Status::CaseControl, Status::CancerStage];

    pub fn label(self) -> &'static str {
        match self {
            Self::CaseControl => "case_control",
            Self::CancerStage => "cancer_stage",
        }
    }
}

impl OmicsKind {
    pub const ALL: [OmicsKind; 4] = [
        OmicsKind::Methylation,
        OmicsKind::MiRna,
        OmicsKind::MRna,
        OmicsKind::LncRna,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Methylation => "methylation",
            Self::MiRna => "miRNA",
            Self::MRna => "mRNA",
            Self::LncRna => "lncRNA",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for OmicsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn parse_label<T: Copy>(
    text: &str,
    kind: &'static str,
    all: &[T],
    label: fn(T) -> &'static str,
) -> Result<T, UnknownLabel> {
    all.iter()
        .copied()
        .find(|candidate| label(*candidate) == text)
        .ok_or_else(|| UnknownLabel {
            kind,
            found: text.to_string(),
            expected: all.iter().map(|c| label(*c)).collect::<Vec<_>>().join(", "),
        })
}

// Labels are case-sensitive: `mRNA` and `miRNA` differ only by case elsewhere.
impl FromStr for Status {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, "status", &Status::ALL, Status::label)
    }
}

impl FromStr for OmicsKind {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, "omics type", &OmicsKind::ALL, OmicsKind::label)
    }
}

/// Every file a run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub variables: PathBuf,
    pub model: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ArtifactPaths {
    /// Derives the conventional artifact locations for one status/omics pairing.
    pub fn resolve(settings: &Settings, status: Status, omics: OmicsKind) -> Self {
        let stem = format!("{}_{}_{}", settings.cohort, omics, settings.algorithm);
        let variables = settings
            .under_root(&settings.variables_dir)
            .join(status.label())
            .join(format!("{stem}.csv"));
        let model = settings
            .under_root(&settings.models_dir)
            .join(status.label())
            .join(format!("{stem}.txt"));
        let output = settings
            .under_root(&settings.output_dir)
            .join(format!("{}_{}_{}_prs.csv", settings.cohort, status, omics));

        Self {
            variables,
            model,
            input: settings.under_root(&settings.input),
            output,
        }
    }
}
