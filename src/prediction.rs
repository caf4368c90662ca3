use serde::Serialize;

use crate::error::{ModelError, PredictionError};
use crate::labels::{is_healthy, LabelCatalog};
use crate::preprocess::preprocess_image;
use crate::state::ServedModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedClass {
    pub class: String,
    /// Percentage, two decimals.
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_class: String,
    pub predicted_index: usize,
    /// Percentage of the top score, rounded to two decimals.
    pub confidence: f32,
    pub probs: Vec<f32>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub ranking: Vec<RankedClass>,
}

fn round_percent(prob: f32) -> f32 {
    (prob * 100.0 * 100.0).round() / 100.0
}

impl Prediction {
    pub fn from_scores(
        scores: Vec<f32>,
        catalog: &LabelCatalog,
        include_treatment: bool,
    ) -> Result<Self, ModelError> {
        if scores.is_empty() {
            return Err(ModelError::EmptyOutput);
        }
        if scores.len() != catalog.len() {
            return Err(ModelError::OutputMismatch {
                expected: catalog.len(),
                got: scores.len(),
            });
        }

        // first maximum wins on ties
        let (predicted_index, top) = scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        let predicted_class = catalog
            .label(predicted_index)
            .unwrap_or("Unknown")
            .to_string();

        let mut ranking: Vec<RankedClass> = scores
            .iter()
            .enumerate()
            .filter(|(_, &p)| (p * 10000.0).round() > 0.0)
            .map(|(i, &p)| RankedClass {
                class: catalog.label(i).unwrap_or("Unknown").to_string(),
                probability: round_percent(p),
            })
            .collect();
        ranking.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        let recommendation = include_treatment
            .then(|| catalog.treatment(predicted_index))
            .flatten()
            .map(str::to_string);

        Ok(Self {
            healthy: is_healthy(&predicted_class),
            predicted_class,
            predicted_index,
            confidence: round_percent(top),
            probs: scores,
            recommendation,
            ranking,
        })
    }
}

/// Preprocess, run the model and shape the result for one uploaded image.
pub fn get_prediction(
    model: &ServedModel,
    image_data: &[u8],
    include_treatment: bool,
) -> Result<Prediction, PredictionError> {
    let input = preprocess_image(image_data, &model.spec)?;
    let scores = model.classifier.predict(&input)?;
    Ok(Prediction::from_scores(scores, &model.catalog, include_treatment)?)
}
