//! The classifier contract and a nearest-mean implementation.

use crate::config::{set_param, ComponentState};
use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sparse classifier output: `(class, value)` pairs, values are
/// posterior-like and nonnegative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputVector {
    entries: Vec<(i32, f32)>,
}

impl OutputVector {
    pub fn new() -> OutputVector {
        OutputVector::default()
    }

    pub fn push(&mut self, class: i32, value: f32) {
        self.entries.push((class, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, f32)> + '_ {
        self.entries.iter().copied()
    }

    /// Value of `class`, 0 when absent.
    pub fn get(&self, class: i32) -> f32 {
        self.entries
            .iter()
            .find(|(c, _)| *c == class)
            .map_or(0.0, |&(_, v)| v)
    }

    /// Drop the entries `keep` rejects.
    pub fn retain<F: FnMut(i32, f32) -> bool>(&mut self, mut keep: F) {
        self.entries.retain(|&(c, v)| keep(c, v));
    }

    /// Scale the values to sum to one; a zero vector is left alone.
    pub fn normalize(&mut self) {
        let total: f32 = self.entries.iter().map(|(_, v)| v).sum();
        if total > 0.0 {
            for (_, v) in self.entries.iter_mut() {
                *v /= total;
            }
        }
    }
}

/// An online-trainable classifier over fixed-size feature vectors.
///
/// `add` only collects samples; nothing changes what `outputs` returns
/// until `update_model` is called.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn add(&mut self, features: &[f32], class: i32) -> Result<()>;

    fn update_model(&mut self) -> Result<()>;

    /// Returns the base cost and the per-class values for `features`.
    fn outputs(&self, features: &[f32]) -> Result<(f32, OutputVector)>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    fn state(&self) -> Result<serde_json::Value>;
}

pub fn make_classifier(name: &str) -> Result<Box<dyn Classifier>> {
    match name {
        "nearest-mean" => Ok(Box::new(NearestMean::default())),
        _ => Err(Error::UnknownComponent(name.to_string())),
    }
}

pub fn restore_classifier(saved: &ComponentState) -> Result<Box<dyn Classifier>> {
    match saved.name.as_str() {
        "nearest-mean" => {
            let state: NearestMeanState = serde_json::from_value(saved.state.clone())?;
            Ok(Box::new(NearestMean::from_state(state)))
        }
        name => Err(Error::UnknownComponent(name.to_string())),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestMeanConfig {
    /// temperature of the softmax over distances
    pub scale: f32,
}

impl Default for NearestMeanConfig {
    fn default() -> Self {
        NearestMeanConfig { scale: 0.05 }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ClassSum {
    count: u64,
    sum: Vec<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NearestMeanState {
    config: NearestMeanConfig,
    dim: Option<usize>,
    sums: BTreeMap<i32, ClassSum>,
    trained: bool,
}

/// One mean vector per class; outputs are a softmax over negative mean
/// squared distances.
#[derive(Clone, Debug, Default)]
pub struct NearestMean {
    state: NearestMeanState,
    means: Vec<(i32, Vec<f32>)>,
}

impl NearestMean {
    pub fn new(config: NearestMeanConfig) -> Self {
        NearestMean {
            state: NearestMeanState {
                config,
                ..NearestMeanState::default()
            },
            means: vec![],
        }
    }

    fn from_state(state: NearestMeanState) -> Self {
        let mut classifier = NearestMean {
            state,
            means: vec![],
        };
        if classifier.state.trained {
            classifier.compute_means();
        }
        classifier
    }

    pub fn config(&self) -> &NearestMeanConfig {
        &self.state.config
    }

    /// Number of classes with a mean vector.
    pub fn n_classes(&self) -> usize {
        self.means.len()
    }

    fn check_dim(&self, features: &[f32]) -> Result<()> {
        match self.state.dim {
            Some(expected) if expected != features.len() => Err(Error::FeatureDimension {
                expected,
                actual: features.len(),
            }),
            _ => Ok(()),
        }
    }

    fn compute_means(&mut self) {
        self.means = self
            .state
            .sums
            .iter()
            .filter(|(_, s)| s.count > 0)
            .map(|(&class, s)| {
                let n = s.count as f64;
                (class, s.sum.iter().map(|&x| (x / n) as f32).collect())
            })
            .collect();
    }
}

impl Classifier for NearestMean {
    fn name(&self) -> &'static str {
        "nearest-mean"
    }

    fn add(&mut self, features: &[f32], class: i32) -> Result<()> {
        self.check_dim(features)?;
        self.state.dim = Some(features.len());
        let entry = self.state.sums.entry(class).or_insert_with(|| ClassSum {
            count: 0,
            sum: vec![0.0; features.len()],
        });
        entry.count += 1;
        for (s, &x) in entry.sum.iter_mut().zip(features) {
            *s += x as f64;
        }
        Ok(())
    }

    fn update_model(&mut self) -> Result<()> {
        self.compute_means();
        self.state.trained = true;
        debug!("nearest-mean: {} classes", self.means.len());
        Ok(())
    }

    fn outputs(&self, features: &[f32]) -> Result<(f32, OutputVector)> {
        let mut result = OutputVector::new();
        if self.means.is_empty() {
            return Ok((0.0, result));
        }
        self.check_dim(features)?;
        let n = features.len().max(1) as f32;
        let distances: Vec<(i32, f32)> = self
            .means
            .iter()
            .map(|(class, mean)| {
                let d: f32 = mean
                    .iter()
                    .zip(features)
                    .map(|(m, x)| (m - x) * (m - x))
                    .sum();
                (*class, d / n)
            })
            .collect();
        let dmin = distances
            .iter()
            .map(|&(_, d)| d)
            .fold(f32::INFINITY, f32::min);
        let scale = self.state.config.scale.max(f32::EPSILON);
        for &(class, d) in distances.iter() {
            result.push(class, (-(d - dmin) / scale).exp());
        }
        result.normalize();
        Ok((dmin / scale, result))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        set_param(&mut self.state.config, key, value)
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_vector() {
        let mut v = OutputVector::new();
        v.push(65, 1.0);
        v.push(66, 3.0);
        v.normalize();
        assert_eq!(v.get(66), 0.75);
        assert_eq!(v.get(67), 0.0);
        v.retain(|c, _| c != 65);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_untrained_is_empty() {
        let c = NearestMean::default();
        let (cost, out) = c.outputs(&[1.0, 2.0]).unwrap();
        assert_eq!(cost, 0.0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_nearest_mean() {
        let mut c = NearestMean::default();
        c.add(&[0.0, 0.0], 'a' as i32).unwrap();
        c.add(&[0.2, 0.0], 'a' as i32).unwrap();
        c.add(&[1.0, 1.0], 'b' as i32).unwrap();
        // nothing is visible before the model is updated
        assert!(c.outputs(&[0.1, 0.0]).unwrap().1.is_empty());
        c.update_model().unwrap();
        assert_eq!(c.n_classes(), 2);
        let (cost, out) = c.outputs(&[0.1, 0.0]).unwrap();
        assert!(cost.abs() < 1e-6);
        assert!(out.get('a' as i32) > 0.99);
        let total: f32 = out.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-5);
        let (cost, _) = c.outputs(&[0.1, 1.0]).unwrap();
        assert!(cost > 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut c = NearestMean::default();
        c.add(&[0.0, 0.0], 1).unwrap();
        assert!(matches!(
            c.add(&[0.0], 1),
            Err(Error::FeatureDimension {
                expected: 2,
                actual: 1
            })
        ));
        c.update_model().unwrap();
        assert!(c.outputs(&[0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_restore() {
        let mut c = NearestMean::default();
        c.set("scale", "0.5").unwrap();
        c.add(&[1.0, 0.0], 7).unwrap();
        c.add(&[0.0, 1.0], 8).unwrap();
        c.update_model().unwrap();
        let saved = ComponentState {
            name: c.name().to_string(),
            state: c.state().unwrap(),
        };
        let restored = restore_classifier(&saved).unwrap();
        assert_eq!(
            restored.outputs(&[1.0, 0.0]).unwrap(),
            c.outputs(&[1.0, 0.0]).unwrap()
        );
        assert!(make_classifier("mlp").is_err());
    }
}
