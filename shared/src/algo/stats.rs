//! Statistical functions for aggregating repeated measurements
//!
//! All helpers skip NaN entries so that failed fits can be mixed freely with
//! valid ones. When no valid entries remain the result is NaN.

/// Collect the non-NaN values of a slice (infinities are kept).
pub fn non_nan_values(values: &[f64]) -> Vec<f64> {
    values.iter().filter(|v| !v.is_nan()).copied().collect()
}

/// Mean of the non-NaN entries, NaN if there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let valid = non_nan_values(values);
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.iter().sum::<f64>() / valid.len() as f64
}

/// Population standard deviation (divides by N) of the non-NaN entries.
///
/// A single valid entry has zero spread; no valid entries gives NaN.
pub fn nan_population_std(values: &[f64]) -> f64 {
    let valid = non_nan_values(values);
    if valid.is_empty() {
        return f64::NAN;
    }
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let variance = valid.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Standard error of the mean of the non-NaN entries.
///
/// Uses the population standard deviation divided by the square root of
/// the number of valid entries.
pub fn nan_standard_error(values: &[f64]) -> f64 {
    let count = values.iter().filter(|v| !v.is_nan()).count();
    if count == 0 {
        return f64::NAN;
    }
    nan_population_std(values) / (count as f64).sqrt()
}

/// Calculate median of a slice of f64 values
///
/// This function computes the median while filtering out NaN values but including
/// infinite values (±inf). For even-length data, returns the average of the two
/// middle values.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(message)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, String> {
    let mut valid_values = non_nan_values(values);

    if valid_values.is_empty() {
        return Err(format!(
            "Insufficient data points to compute median: {} total values, 0 valid (all NaN)",
            values.len()
        ));
    }

    valid_values.sort_by(|a, b| a.total_cmp(b));

    let median_value = if valid_values.len() % 2 == 0 {
        let mid = valid_values.len() / 2;
        (valid_values[mid - 1] + valid_values[mid]) / 2.0
    } else {
        valid_values[valid_values.len() / 2]
    };

    Ok(median_value)
}
