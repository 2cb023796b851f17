//! Classification seam. An artifact is loaded once at startup and then
//! asked for a label per feature vector (one area, one year).

use crate::error::{LoadError, ModelError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

/// Maps named indicator values to a categorical label.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &BTreeMap<String, f64>) -> Result<String, ModelError>;
}

#[derive(Deserialize)]
struct CentroidArtifact {
    features: Vec<String>,
    classes: BTreeMap<String, Vec<f64>>,
}

/// Nearest class centroid by Euclidean distance.
///
/// Artifact layout:
/// `{"features": ["mean_ndvi", ...], "classes": {"Healthy": [0.6, ...], ...}}`
#[derive(Debug, Clone)]
pub struct CentroidClassifier {
    features: Vec<String>,
    centroids: Vec<(String, Vec<f64>)>,
}

impl CentroidClassifier {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
        let model = Self::from_reader(BufReader::new(file), path)?;
        info!(
            "Loaded classifier {:?}: {} classes over {} features",
            path,
            model.centroids.len(),
            model.features.len()
        );
        Ok(model)
    }

    pub(crate) fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, LoadError> {
        let artifact: CentroidArtifact = serde_json::from_reader(reader)?;
        let invalid = |reason: String| LoadError::InvalidModel { path: path.to_path_buf(), reason };

        if artifact.features.is_empty() || artifact.classes.is_empty() {
            return Err(invalid("needs at least one feature and one class".into()));
        }
        for (label, centroid) in &artifact.classes {
            if centroid.len() != artifact.features.len() {
                return Err(invalid(format!(
                    "class '{}' has {} values for {} features",
                    label,
                    centroid.len(),
                    artifact.features.len()
                )));
            }
        }

        Ok(Self { features: artifact.features, centroids: artifact.classes.into_iter().collect() })
    }
}

impl Classifier for CentroidClassifier {
    fn predict(&self, features: &BTreeMap<String, f64>) -> Result<String, ModelError> {
        let input = self
            .features
            .iter()
            .map(|name| features.get(name).copied().ok_or_else(|| ModelError::MissingFeature(name.clone())))
            .collect::<Result<Vec<f64>, _>>()?;

        self.centroids
            .iter()
            .map(|(label, centroid)| {
                let dist: f64 = centroid.iter().zip(&input).map(|(c, x)| (c - x).powi(2)).sum();
                (label, dist)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label.clone())
            .ok_or_else(|| ModelError::InvalidInput("classifier has no classes".into()))
    }
}

/// The configured classifier, if any.
pub fn load_classifier(path: Option<&Path>) -> Result<Option<Box<dyn Classifier>>, LoadError> {
    match path {
        Some(path) => Ok(Some(Box::new(CentroidClassifier::load(path)?))),
        None => Ok(None),
    }
}
