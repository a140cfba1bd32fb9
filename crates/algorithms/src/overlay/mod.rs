//! Weighted overlay
//!
//! Linear combination of aligned rasters, the scoring step of a
//! multi-criteria suitability analysis:
//!
//! ```text
//! output[i][j] = Σ_k input_k[i][j] * weight_k
//! ```
//!
//! Weights need not sum to one. Nodata is not special-cased: a NaN cell
//! propagates, any other sentinel is weighted like a value.

use crate::maybe_rayon::*;
use mcda_core::{Algorithm, Error, Raster, Result};
use ndarray::Array2;

/// Weighted overlay algorithm over `(raster, weight)` pairs
#[derive(Debug, Clone, Default)]
pub struct WeightedOverlay;

impl Algorithm for WeightedOverlay {
    type Input = Vec<(Raster<f64>, f64)>;
    type Output = Raster<f64>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "WeightedOverlay"
    }

    fn description(&self) -> &'static str {
        "Cell-wise weighted sum of aligned rasters"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        let (rasters, weights): (Vec<_>, Vec<_>) = input.into_iter().unzip();
        weighted_overlay(&rasters, &weights)
    }
}

/// Weighted sum of `rasters` by `weights`.
///
/// The output takes its transform, CRS and nodata from the first raster.
/// Every raster must have the first one's shape.
pub fn weighted_overlay(rasters: &[Raster<f64>], weights: &[f64]) -> Result<Raster<f64>> {
    let first = rasters
        .first()
        .ok_or_else(|| Error::Algorithm("weighted overlay needs at least one raster".to_string()))?;

    if rasters.len() != weights.len() {
        return Err(Error::InvalidParameter {
            name: "weights",
            value: weights.len().to_string(),
            reason: format!("expected one weight per raster ({})", rasters.len()),
        });
    }

    let (rows, cols) = first.shape();
    for r in &rasters[1..] {
        if r.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: r.rows(),
                ac: r.cols(),
            });
        }
    }

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0.0; cols];
            for (raster, &weight) in rasters.iter().zip(weights) {
                for (col, acc) in row_data.iter_mut().enumerate() {
                    *acc += unsafe { raster.get_unchecked(row, col) } * weight;
                }
            }
            row_data
        })
        .collect();

    let mut output = first.with_same_meta::<f64>(rows, cols);
    output.set_nodata(first.nodata());
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}
