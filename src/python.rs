//! Python bindings for loading trained models and scoring feature tables

use crate::core::classifier::{score_batch, TrainedModel};
use crate::core::schema::FeatureVector;
use crate::io::sites::SiteReader;
use crate::types::ScoutError;
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyIOError, PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;

fn to_py_err(e: ScoutError) -> PyErr {
    match e {
        ScoutError::Io(_) => PyIOError::new_err(e.to_string()),
        ScoutError::SchemaMismatch { .. } => PyKeyError::new_err(e.to_string()),
        ScoutError::InvalidParameter(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyTrainedModel>()?;
    m.add_function(wrap_pyfunction!(read_sites_kml, m)?)?;
    Ok(())
}

/// Python wrapper for TrainedModel
#[pyclass(name = "TrainedModel")]
struct PyTrainedModel {
    inner: TrainedModel,
}

#[pymethods]
impl PyTrainedModel {
    #[staticmethod]
    fn load(path: String) -> PyResult<Self> {
        let inner = TrainedModel::load_json(&path).map_err(to_py_err)?;
        Ok(PyTrainedModel { inner })
    }

    fn save(&self, path: String) -> PyResult<()> {
        self.inner.save_json(&path).map_err(to_py_err)
    }

    #[getter]
    fn feature_names(&self) -> Vec<String> {
        self.inner.schema().names().to_vec()
    }

    #[getter]
    fn mean_auc(&self) -> f64 {
        self.inner.metrics().mean_auc
    }

    #[getter]
    fn std_auc(&self) -> f64 {
        self.inner.metrics().std_auc
    }

    #[getter]
    fn fold_auc(&self) -> Vec<f64> {
        self.inner.metrics().fold_auc.clone()
    }

    #[getter]
    fn feature_importance(&self) -> Vec<(String, f64)> {
        self.inner
            .metrics()
            .feature_importance
            .iter()
            .map(|f| (f.feature.clone(), f.importance))
            .collect()
    }

    #[getter]
    fn trained_at(&self) -> String {
        self.inner.trained_at().to_rfc3339()
    }

    /// Score one location given as a name -> value mapping
    fn score(&self, features: HashMap<String, f64>) -> PyResult<f64> {
        let vector = FeatureVector::from_pairs(features).map_err(to_py_err)?;
        self.inner.score(&vector).map_err(to_py_err)
    }

    /// Score every row of a matrix whose columns are named by `columns`
    fn score_matrix<'py>(
        &self,
        py: Python<'py>,
        rows: PyReadonlyArray2<'py, f64>,
        columns: Vec<String>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let array = rows.as_array();
        if array.ncols() != columns.len() {
            return Err(PyValueError::new_err(format!(
                "{} columns named for a matrix with {} columns",
                columns.len(),
                array.ncols()
            )));
        }
        let vectors = array
            .rows()
            .into_iter()
            .map(|row| FeatureVector::from_pairs(columns.iter().cloned().zip(row.iter().copied())))
            .collect::<Result<Vec<_>, _>>()
            .map_err(to_py_err)?;
        let scores = score_batch(&self.inner, &vectors).map_err(to_py_err)?;
        Ok(scores.into_pyarray(py))
    }

    fn __repr__(&self) -> String {
        format!(
            "TrainedModel(features={}, mean_auc={:.4}, std_auc={:.4})",
            self.inner.schema().len(),
            self.inner.metrics().mean_auc,
            self.inner.metrics().std_auc
        )
    }
}

/// Known-site coordinates from a KML file as (lat, lon) pairs
#[pyfunction]
fn read_sites_kml(path: String) -> PyResult<Vec<(f64, f64)>> {
    let sites = SiteReader::read_kml(&path).map_err(to_py_err)?;
    Ok(sites.points.iter().map(|p| (p.lat, p.lon)).collect())
}
