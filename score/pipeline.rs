// ========================================================================================
//
//                               The scoring pipeline
//
// ========================================================================================
//
// Loads the three inputs of a run (required variables, omics table, model),
// reconciles the table against the variables, scores it and writes the result.
// Every step is fallible and the first failure ends the run.

use crate::cohort::{ArtifactPaths, OmicsKind, Status};
use crate::config::{ConfigError, Settings};
use crate::downcast::{DowncastError, MemoryReport, reduce_memory_usage};
use crate::model::{GbdtModel, ModelError, Predictor};
use crate::omics::{OmicsError, OmicsReadOptions, load_omics_table};
use crate::output::{OutputError, ScoreTable, write_scores};
use crate::prompt::PromptError;
use crate::reconcile::{AlignedTable, ReconcileError, align_to_required};
use crate::variables::{RequiredVariables, VariableError, load_required_variables};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Variables(#[from] VariableError),
    #[error(transparent)]
    Omics(#[from] OmicsError),
    #[error(transparent)]
    Downcast(#[from] DowncastError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(
        "The model expects {model} features but the biological variable list has {variables}. The model and variable list do not belong together."
    )]
    WidthMismatch { model: usize, variables: usize },
    #[error(
        "Feature {position} of the model is '{model}' but the biological variable list has '{listed}' there. The model and variable list do not belong together."
    )]
    FeatureOrderMismatch {
        position: usize,
        model: String,
        listed: String,
    },
}

/// Everything a run needs to know, resolved from settings and the command line.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub status: Status,
    pub omics: OmicsKind,
    pub paths: ArtifactPaths,
    pub read_options: OmicsReadOptions,
    pub downcast: bool,
    pub class_outputs: bool,
}

impl RunPlan {
    pub fn from_settings(
        settings: &Settings,
        status: Status,
        omics: OmicsKind,
    ) -> Result<Self, PrsError> {
        Ok(Self {
            status,
            omics,
            paths: ArtifactPaths::resolve(settings, status, omics),
            read_options: OmicsReadOptions {
                orientation: settings.orientation,
                separator: settings.separator_byte()?,
            },
            downcast: settings.downcast,
            class_outputs: settings.probabilities,
        })
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub samples: usize,
    pub variables: usize,
    pub duplicates_removed: usize,
    pub memory: Option<MemoryReport>,
    pub output: PathBuf,
    pub scores: ScoreTable,
}

/// Names LightGBM assigns when the training matrix had no column names.
fn is_placeholder_name(name: &str, position: usize) -> bool {
    name == format!("Column_{position}")
}

/// Checks that a predictor was trained on exactly the listed variables, in order.
/// Models without recorded names are only checked for width.
pub fn check_feature_contract<P: Predictor + ?Sized>(
    model: &P,
    required: &RequiredVariables,
) -> Result<(), PrsError> {
    if model.num_features() != required.len() {
        return Err(PrsError::WidthMismatch {
            model: model.num_features(),
            variables: required.len(),
        });
    }
    let Some(names) = model.feature_names() else {
        return Ok(());
    };
    if names
        .iter()
        .enumerate()
        .all(|(i, name)| is_placeholder_name(name, i))
    {
        log::debug!("Model carries placeholder feature names; checking width only.");
        return Ok(());
    }
    for (position, (model_name, listed)) in names.iter().zip(required.names()).enumerate() {
        if model_name != listed {
            return Err(PrsError::FeatureOrderMismatch {
                position,
                model: model_name.clone(),
                listed: listed.clone(),
            });
        }
    }
    Ok(())
}

/// Runs the predictor over an aligned table.
pub fn score_aligned<P: Predictor + ?Sized>(
    model: &P,
    aligned: &AlignedTable,
    class_outputs: bool,
) -> Result<ScoreTable, PrsError> {
    let features = aligned.feature_matrix()?;
    log::info!(
        "Scoring {} samples on {} features",
        features.nrows(),
        features.ncols()
    );
    let outputs = model.predict(features.view())?;
    Ok(ScoreTable::from_predictions(
        aligned.sample_ids().to_vec(),
        outputs,
        model.output_kind(),
        class_outputs,
    )?)
}

/// Executes a complete scoring run.
pub fn run(plan: &RunPlan) -> Result<RunSummary, PrsError> {
    let start = Instant::now();
    log::info!(
        "Scoring BRCA {} data for status '{}'",
        plan.omics,
        plan.status
    );

    let required = load_required_variables(&plan.paths.variables)?;
    let mut table = load_omics_table(&plan.paths.input, &plan.read_options)?;
    let memory = if plan.downcast {
        Some(reduce_memory_usage(&mut table.columns)?)
    } else {
        None
    };
    let model = GbdtModel::load(&plan.paths.model)?;
    check_feature_contract(&model, &required)?;

    let aligned = align_to_required(table, &required)?;
    let scores = score_aligned(&model, &aligned, plan.class_outputs)?;
    write_scores(&plan.paths.output, &scores)?;

    log::info!("Run finished in {:.2?}", start.elapsed());
    Ok(RunSummary {
        samples: scores.len(),
        variables: required.len(),
        duplicates_removed: aligned.duplicates_removed(),
        memory,
        output: plan.paths.output.clone(),
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputKind;
    use crate::omics::OmicsTable;
    use ndarray::{Array2, ArrayView2};
    use polars::prelude::{Column, NamedFrom, Series};

    /// Scores each sample as the weighted sum of its features.
    struct LinearPredictor {
        weights: Vec<f64>,
        names: Option<Vec<String>>,
    }

    impl Predictor for LinearPredictor {
        fn num_features(&self) -> usize {
            self.weights.len()
        }

        fn feature_names(&self) -> Option<&[String]> {
            self.names.as_deref()
        }

        fn num_outputs(&self) -> usize {
            1
        }

        fn output_kind(&self) -> OutputKind {
            OutputKind::Score
        }

        fn predict(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
            let weights = ndarray::Array1::from(self.weights.clone());
            Ok(features.dot(&weights).insert_axis(ndarray::Axis(1)))
        }
    }

    fn required(names: &[&str]) -> RequiredVariables {
        RequiredVariables::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let model = LinearPredictor {
            weights: vec![1.0, 1.0],
            names: None,
        };
        let err = check_feature_contract(&model, &required(&["A", "B", "C"])).unwrap_err();
        assert!(matches!(
            err,
            PrsError::WidthMismatch {
                model: 2,
                variables: 3
            }
        ));
    }

    #[test]
    fn feature_order_is_checked_when_names_are_recorded() {
        let model = LinearPredictor {
            weights: vec![1.0, 1.0],
            names: Some(strings(&["B", "A"])),
        };
        let err = check_feature_contract(&model, &required(&["A", "B"])).unwrap_err();
        assert!(matches!(err, PrsError::FeatureOrderMismatch { position: 0, .. }));

        let placeholder = LinearPredictor {
            weights: vec![1.0, 1.0],
            names: Some(strings(&["Column_0", "Column_1"])),
        };
        assert!(check_feature_contract(&placeholder, &required(&["A", "B"])).is_ok());
    }

    #[test]
    fn scores_follow_the_required_feature_order() {
        let table = OmicsTable::new(
            strings(&["S1", "S2"]),
            vec![
                Column::from(Series::new("B".into(), vec![10.0, 20.0])),
                Column::from(Series::new("A".into(), vec![1.0, 2.0])),
            ],
        )
        .unwrap();
        let model = LinearPredictor {
            weights: vec![1.0, 0.0],
            names: Some(strings(&["A", "B"])),
        };
        let required = required(&["A", "B"]);
        check_feature_contract(&model, &required).unwrap();

        let aligned = align_to_required(table, &required).unwrap();
        let scores = score_aligned(&model, &aligned, false).unwrap();
        assert_eq!(scores.prs().to_vec(), vec![1.0, 2.0]);
        assert_eq!(scores.sample_ids(), &["S1", "S2"]);
    }

    #[test]
    fn plan_carries_settings() {
        let settings = Settings {
            separator: '\t',
            downcast: false,
            ..Settings::default()
        };
        let plan = RunPlan::from_settings(&settings, Status::CaseControl, OmicsKind::LncRna).unwrap();
        assert_eq!(plan.read_options.separator, b'\t');
        assert!(!plan.downcast);
        assert!(
            plan.paths
                .output
                .ends_with("output_data/TCGA_BRCA_case_control_lncRNA_prs.csv")
        );
    }
}
