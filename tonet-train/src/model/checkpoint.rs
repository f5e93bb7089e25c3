//! Checkpoints and the two ways of applying them to a live model.
//!
//! [`load_strict`] is used for official pretrained weights, where the
//! checkpoint must describe the unmodified backbone exactly.
//! [`merge_intersecting`] is used when continuing from an adapted model: only
//! names present in both sides with equal shapes are copied, everything else is
//! skipped. Neither path ever adds or removes a live parameter.

use super::backbone::Backbone;
use super::tensor::Tensor;
use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Mapping from parameter name to tensor value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    tensors: BTreeMap<String, Tensor>,
}

impl Checkpoint {
    /// Read a checkpoint file. A missing path is reported as [`TrainError::MissingFile`].
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        if !path.is_file() {
            return Err(TrainError::MissingFile(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), TrainError> {
        tonet_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.tensors.iter()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl FromIterator<(String, Tensor)> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl std::ops::Index<&str> for Checkpoint {
    type Output = Tensor;

    /// Panics if `name` is absent, like map indexing.
    fn index(&self, name: &str) -> &Tensor {
        &self.tensors[name]
    }
}

impl IntoIterator for Checkpoint {
    type Item = (String, Tensor);
    type IntoIter = std::collections::btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

/// Outcome of a tolerant merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: Vec<String>,
    /// Checkpoint keys absent from the live model or of a different shape.
    pub skipped: Vec<String>,
}

/// Apply `checkpoint` requiring an exact match of names and shapes.
///
/// Nothing is written unless the whole checkpoint matches.
pub fn load_strict(model: &mut dyn Backbone, checkpoint: &Checkpoint) -> Result<(), TrainError> {
    let live = model.state_dict();

    let missing: Vec<&str> = live
        .keys()
        .filter(|k| !checkpoint.contains_key(k))
        .map(String::as_str)
        .collect();
    let unexpected: Vec<&str> = checkpoint
        .keys()
        .filter(|k| !live.contains_key(k))
        .map(String::as_str)
        .collect();
    let mismatched: Vec<String> = checkpoint
        .iter()
        .filter_map(|(name, value)| {
            let current = live.get(name)?;
            (current.shape() != value.shape()).then(|| {
                format!(
                    "{name}: checkpoint {:?} vs model {:?}",
                    value.shape(),
                    current.shape()
                )
            })
        })
        .collect();

    if !missing.is_empty() || !unexpected.is_empty() || !mismatched.is_empty() {
        return Err(TrainError::shape_mismatch(format!(
            "missing keys {missing:?}, unexpected keys {unexpected:?}, size mismatch {mismatched:?}"
        )));
    }

    for (name, value) in checkpoint.iter() {
        model.set_parameter(name, value.clone())?;
    }
    tracing::debug!(keys = checkpoint.len(), "Strict checkpoint load complete");
    Ok(())
}

/// Apply the part of `checkpoint` that fits the live model and skip the rest.
pub fn merge_intersecting(
    model: &mut dyn Backbone,
    checkpoint: &Checkpoint,
) -> Result<MergeReport, TrainError> {
    let live = model.state_dict();
    let mut report = MergeReport::default();

    for (name, value) in checkpoint.iter() {
        match live.get(name) {
            Some(current) if current.shape() == value.shape() => {
                model.set_parameter(name, value.clone())?;
                report.applied.push(name.clone());
            }
            _ => report.skipped.push(name.clone()),
        }
    }

    if !report.skipped.is_empty() {
        tracing::warn!(
            skipped = report.skipped.len(),
            applied = report.applied.len(),
            "Checkpoint keys not present in the live model were skipped"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Two named parameters with fixed shapes.
    struct Pair {
        params: BTreeMap<String, Tensor>,
    }

    impl Pair {
        fn new() -> Self {
            let params = [
                ("features.w".to_string(), Tensor::zeros(&[2, 2])),
                ("classifier.w".to_string(), Tensor::zeros(&[3, 2])),
            ]
            .into_iter()
            .collect();
            Self { params }
        }
    }

    impl Backbone for Pair {
        fn forward(&mut self, input: &Tensor, _train: bool) -> Result<Tensor, TrainError> {
            Ok(input.clone())
        }

        fn backward(&mut self, _grad_output: &Tensor) -> Result<(), TrainError> {
            Ok(())
        }

        fn state_dict(&self) -> Checkpoint {
            self.params.clone().into_iter().collect()
        }

        fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError> {
            let slot = self
                .params
                .get_mut(name)
                .ok_or_else(|| TrainError::invalid_input(name.to_string()))?;
            *slot = value;
            Ok(())
        }

        fn visit_parameters(&mut self, _visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {}

        fn zero_grad(&mut self) {}

        fn replace_head(&mut self, num_classes: usize) {
            self.params
                .insert("classifier.w".into(), Tensor::zeros(&[num_classes, 2]));
        }

        fn head_classes(&self) -> usize {
            self.params["classifier.w"].shape()[0]
        }
    }

    fn filled(shape: &[usize], value: f32) -> Tensor {
        let mut t = Tensor::zeros(shape);
        t.fill(value);
        t
    }

    #[test]
    fn test_strict_load_applies_everything() {
        let mut model = Pair::new();
        let ckpt: Checkpoint = [
            ("features.w".to_string(), filled(&[2, 2], 1.0)),
            ("classifier.w".to_string(), filled(&[3, 2], 2.0)),
        ]
        .into_iter()
        .collect();
        load_strict(&mut model, &ckpt).unwrap();
        assert_eq!(model.state_dict(), ckpt);
    }

    #[test]
    fn test_strict_load_rejects_missing_and_extra() {
        let mut model = Pair::new();
        let ckpt: Checkpoint = [
            ("features.w".to_string(), filled(&[2, 2], 1.0)),
            ("fc.w".to_string(), filled(&[3, 2], 2.0)),
        ]
        .into_iter()
        .collect();
        let err = load_strict(&mut model, &ckpt).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch(_)));
        // untouched
        assert_eq!(model.params["features.w"], Tensor::zeros(&[2, 2]));
    }

    #[test]
    fn test_strict_load_rejects_shape_mismatch() {
        let mut model = Pair::new();
        let ckpt: Checkpoint = [
            ("features.w".to_string(), filled(&[2, 2], 1.0)),
            ("classifier.w".to_string(), filled(&[10, 2], 2.0)),
        ]
        .into_iter()
        .collect();
        let err = load_strict(&mut model, &ckpt).unwrap_err();
        assert!(err.to_string().contains("classifier.w"));
    }

    #[test]
    fn test_merge_keeps_key_set() {
        let mut model = Pair::new();
        let before: Vec<String> = model.state_dict().keys().cloned().collect();
        let ckpt: Checkpoint = [
            ("features.w".to_string(), filled(&[2, 2], 4.0)),
            ("classifier.w".to_string(), filled(&[7, 2], 1.0)),
            ("extra.bias".to_string(), filled(&[1], 1.0)),
        ]
        .into_iter()
        .collect();

        let report = merge_intersecting(&mut model, &ckpt).unwrap();
        let after: Vec<String> = model.state_dict().keys().cloned().collect();

        assert_eq!(before, after);
        assert_eq!(report.applied, vec!["features.w".to_string()]);
        assert_eq!(
            report.skipped,
            vec!["classifier.w".to_string(), "extra.bias".to_string()]
        );
        assert_eq!(model.params["features.w"], filled(&[2, 2], 4.0));
        assert_eq!(model.params["classifier.w"], Tensor::zeros(&[3, 2]));
    }

    #[test]
    fn test_save_load_roundtrip_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.json");
        let ckpt: Checkpoint = [(
            "module.features.w".to_string(),
            Tensor::new(vec![3], vec![0.1, -1.0e-30, 123456.79]).unwrap(),
        )]
        .into_iter()
        .collect();
        ckpt.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), ckpt);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Checkpoint::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, TrainError::MissingFile(_)));
    }

    #[test]
    fn test_load_rejects_shape_data_disagreement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.json");
        std::fs::write(&path, r#"{"features.w":{"shape":[2,2],"data":[1.0]}}"#).unwrap();

        let err = Checkpoint::load(&path).unwrap_err();
        assert!(matches!(err, TrainError::Serde(_)));
        assert!(err.to_string().contains("needs 4 elements"));
    }

    #[test]
    fn test_diverged_weights_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.json");
        let ckpt: Checkpoint = [(
            "features.w".to_string(),
            Tensor::new(vec![2, 2], vec![f32::NAN, 1.0, f32::INFINITY, -2.0]).unwrap(),
        )]
        .into_iter()
        .collect();
        ckpt.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        let data = loaded["features.w"].data();
        assert!(data[0].is_nan());
        assert_eq!(&data[1..], &[1.0, f32::INFINITY, -2.0]);
        assert_eq!(loaded["features.w"].shape(), &[2, 2]);
    }
}
