use std::collections::BTreeMap;

use serde::Serialize;

use crate::dataset::{Dataset, Features};
use crate::error::M2eError;

pub trait TrainedModel {
    fn predict(&self, features: &Features) -> Result<Vec<f64>, M2eError>;
}

pub trait Regressor {
    fn fit(&self, features: &Features, target: &[f64]) -> Result<Box<dyn TrainedModel>, M2eError>;
}

pub type ParamGrid = BTreeMap<String, Vec<f64>>;

pub trait ParamSearch {
    fn search(
        &self,
        grid: &ParamGrid,
        features: &Features,
        target: &[f64],
    ) -> Result<Box<dyn TrainedModel>, M2eError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
}

pub fn evaluate(model: &dyn TrainedModel, features: &Features, target: &[f64]) -> Result<Metrics, M2eError> {
    let predicted = model.predict(features)?;
    metrics(&predicted, target)
}

pub fn metrics(predicted: &[f64], target: &[f64]) -> Result<Metrics, M2eError> {
    if predicted.len() != target.len() {
        return Err(M2eError::Model(format!(
            "{} predictions for {} targets",
            predicted.len(),
            target.len()
        )));
    }
    if target.is_empty() {
        return Err(M2eError::Model("cannot score an empty target".to_string()));
    }

    let n = target.len() as f64;
    let mean = target.iter().sum::<f64>() / n;
    let mut abs_err = 0.0;
    let mut sq_err = 0.0;
    let mut total = 0.0;
    for (p, y) in predicted.iter().zip(target) {
        abs_err += (p - y).abs();
        sq_err += (p - y).powi(2);
        total += (y - mean).powi(2);
    }
    // constant targets: perfect fit scores 1, anything else 0
    let r2 = if total == 0.0 {
        if sq_err == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - sq_err / total
    };
    Ok(Metrics {
        mae: abs_err / n,
        mse: sq_err / n,
        r2,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanRegressor;

#[derive(Debug, Clone, Copy)]
struct MeanModel {
    mean: f64,
}

impl TrainedModel for MeanModel {
    fn predict(&self, features: &Features) -> Result<Vec<f64>, M2eError> {
        Ok(vec![self.mean; features.len()])
    }
}

impl Regressor for MeanRegressor {
    fn fit(&self, features: &Features, target: &[f64]) -> Result<Box<dyn TrainedModel>, M2eError> {
        if features.len() != target.len() {
            return Err(M2eError::Model(format!(
                "{} feature rows for {} targets",
                features.len(),
                target.len()
            )));
        }
        let finite: Vec<f64> = target.iter().copied().filter(|value| value.is_finite()).collect();
        if finite.is_empty() {
            return Err(M2eError::Model("no finite training targets".to_string()));
        }
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        Ok(Box::new(MeanModel { mean }))
    }
}

pub fn hyperparam_opt(
    search: &dyn ParamSearch,
    grid: &ParamGrid,
    train: &Dataset,
) -> Result<Box<dyn TrainedModel>, M2eError> {
    search.search(grid, &train.features()?, &train.target()?)
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub train_rows: usize,
    pub test_rows: usize,
    pub metrics: Metrics,
}

pub fn train_and_evaluate(
    regressor: &dyn Regressor,
    train: &Dataset,
    test: &Dataset,
) -> Result<Evaluation, M2eError> {
    let (x_train, y_train) = (train.features()?, train.target()?);
    let (x_test, y_test) = (test.features()?, test.target()?);
    let model = regressor.fit(&x_train, &y_train)?;
    let metrics = evaluate(model.as_ref(), &x_test, &y_test)?;
    Ok(Evaluation {
        train_rows: x_train.len(),
        test_rows: x_test.len(),
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_of_known_predictions() {
        let m = metrics(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]).unwrap();
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.mse - 4.0 / 3.0).abs() < 1e-12);
        // total sum of squares around 8/3 is 78/9
        assert!((m.r2 - (1.0 - 4.0 / (78.0 / 9.0))).abs() < 1e-12);
        assert!((m.r2 - 7.0 / 13.0).abs() < 1e-12);
    }

    #[test]
    fn mean_baseline_predicts_training_mean() {
        let features = Features {
            columns: vec!["cg1".to_string()],
            rows: vec![vec![0.1], vec![0.2], vec![0.3]],
        };
        let model = MeanRegressor.fit(&features, &[1.0, 2.0, 6.0]).unwrap();
        assert_eq!(model.predict(&features).unwrap(), vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(metrics(&[1.0], &[1.0, 2.0]).is_err());
    }
}
