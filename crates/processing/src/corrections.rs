//! Correction calculators.
//!
//! All calculators are pure functions over [`Table`]: they take the active
//! snapshot's table plus typed parameters and mutate a copy in place. The
//! executor owns loading, dispatch, and appending the result.
//!
//! Concentration arithmetic follows the instrument conventions:
//!
//! - weight:  `new_conc = old_conc * (old_weight / new_weight)`
//! - volume:  `new_conc = old_conc * (new_volume / old_volume)`
//! - dilution: `new_conc = old_conc * (new_df / old_df)`
//! - drift: per-segment ratio between consecutive standards, linearly
//!   interpolated across the rows in between.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use labtrace_core::ProcessingType;

use crate::error::ProcessingError;
use crate::table::{columns, is_sample, num_cell, set_num, solution_label, Table};

/// Parse `params` for `processing_type` and apply the calculator. Returns a
/// human-readable description of what changed, for the snapshot node.
pub fn apply(
    table: &mut Table,
    processing_type: ProcessingType,
    params: &JsonValue,
) -> Result<String, ProcessingError> {
    match processing_type {
        ProcessingType::WeightCorrection => {
            let p: WeightParams = parse_params(params)?;
            let n = apply_weight(table, &p)?;
            Ok(format!(
                "Weight correction on '{}' ({n} rows, new weight {})",
                p.solution_label, p.new_weight
            ))
        }
        ProcessingType::VolumeCorrection => {
            let p: VolumeParams = parse_params(params)?;
            let n = apply_volume(table, &p)?;
            Ok(format!(
                "Volume correction on '{}' ({n} rows, new volume {})",
                p.solution_label, p.new_volume
            ))
        }
        ProcessingType::DfCorrection => {
            let p: DfParams = parse_params(params)?;
            let n = apply_df(table, &p)?;
            Ok(format!(
                "Dilution factor correction on '{}' ({n} rows, new DF {})",
                p.solution_label, p.new_df
            ))
        }
        ProcessingType::DriftCorrection => {
            let p: DriftParams = parse_params(params)?;
            let n = apply_drift(table, &p)?;
            Ok(format!("Drift correction ({n} rows interpolated)"))
        }
        ProcessingType::CrmCheck | ProcessingType::RmCheck => {
            let p: CrmCheckParams = parse_params(params)?;
            let n = apply_crm_check(table, &p)?;
            Ok(format!("Reference material check ({n} standards checked)"))
        }
        ProcessingType::EmptyRowRemoval => {
            let n = remove_empty_rows(table);
            Ok(format!("Removed {n} empty rows"))
        }
        ProcessingType::ManualEdit => {
            let p: EditParams = parse_params(params)?;
            let n = apply_edits(table, &p)?;
            Ok(format!("Manual edit ({n} cells changed)"))
        }
        ProcessingType::Optimization => {
            let p: OptimizationParams = parse_params(params)?;
            let n = apply_slope_optimization(table, &p)?;
            Ok(format!(
                "Slope optimization on {} ({n} rows rescaled)",
                p.element
            ))
        }
        ProcessingType::Import => Err(ProcessingError::bad_params(
            "import is not a correction step",
        )),
    }
}

fn parse_params<'de, T: Deserialize<'de>>(params: &'de JsonValue) -> Result<T, ProcessingError> {
    T::deserialize(params).map_err(|e| ProcessingError::bad_params(e.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightParams {
    pub solution_label: String,
    pub new_weight: f64,
}

/// Rescale a mis-weighed sample: concentrations shrink in proportion to how
/// much heavier the true weight is.
pub fn apply_weight(table: &mut Table, params: &WeightParams) -> Result<usize, ProcessingError> {
    if !(params.new_weight > 0.0) {
        return Err(ProcessingError::bad_params("new weight must be positive"));
    }
    rescale_samples(table, &params.solution_label, columns::ACT_WGT, |old| {
        old / params.new_weight
    })
    .map(|n| {
        set_matching(table, &params.solution_label, columns::ACT_WGT, params.new_weight);
        n
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeParams {
    pub solution_label: String,
    pub new_volume: f64,
}

pub fn apply_volume(table: &mut Table, params: &VolumeParams) -> Result<usize, ProcessingError> {
    if !(params.new_volume > 0.0) {
        return Err(ProcessingError::bad_params("new volume must be positive"));
    }
    rescale_samples(table, &params.solution_label, columns::ACT_VOL, |old| {
        params.new_volume / old
    })
    .map(|n| {
        set_matching(table, &params.solution_label, columns::ACT_VOL, params.new_volume);
        n
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct DfParams {
    pub solution_label: String,
    pub new_df: f64,
}

pub fn apply_df(table: &mut Table, params: &DfParams) -> Result<usize, ProcessingError> {
    if !(params.new_df > 0.0) {
        return Err(ProcessingError::bad_params(
            "new dilution factor must be positive",
        ));
    }
    rescale_samples(table, &params.solution_label, columns::DF, |old| {
        params.new_df / old
    })
    .map(|n| {
        set_matching(table, &params.solution_label, columns::DF, params.new_df);
        n
    })
}

/// Shared weight/volume/DF machinery: for each matching sample row, derive a
/// factor from the old metadata value and multiply every element column.
fn rescale_samples(
    table: &mut Table,
    label: &str,
    metadata_column: &str,
    factor_from_old: impl Fn(f64) -> f64,
) -> Result<usize, ProcessingError> {
    let elements = table.element_columns();
    let mut touched = 0;

    for row in &mut table.rows {
        if !is_sample(row) || solution_label(row) != Some(label) {
            continue;
        }
        let old = num_cell(row, metadata_column).ok_or_else(|| {
            ProcessingError::bad_data(format!("row '{label}' has no {metadata_column}"))
        })?;
        if old == 0.0 {
            return Err(ProcessingError::bad_data(format!(
                "row '{label}' has zero {metadata_column}"
            )));
        }
        let factor = factor_from_old(old);
        for element in &elements {
            if let Some(value) = num_cell(row, element) {
                set_num(row, element, value * factor);
            }
        }
        touched += 1;
    }

    if touched == 0 {
        return Err(ProcessingError::bad_params(format!(
            "no sample row labelled '{label}'"
        )));
    }
    Ok(touched)
}

fn set_matching(table: &mut Table, label: &str, column: &str, value: f64) {
    for row in &mut table.rows {
        if is_sample(row) && solution_label(row) == Some(label) {
            set_num(row, column, value);
        }
    }
}

fn default_standard_prefixes() -> Vec<String> {
    ["STD", "BASE", "STANDARD", "CRM", "SRM", "OREAS", "RM"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftParams {
    /// Solution-label prefixes that mark drift standards.
    #[serde(default = "default_standard_prefixes")]
    pub standard_prefixes: Vec<String>,
}

impl Default for DriftParams {
    fn default() -> Self {
        Self {
            standard_prefixes: default_standard_prefixes(),
        }
    }
}

/// Piecewise-linear drift correction.
///
/// Standards split the run into segments; each segment's drift ratio is
/// `end_standard / start_standard` per element, interpolated linearly across
/// the rows between the two standards.
pub fn apply_drift(table: &mut Table, params: &DriftParams) -> Result<usize, ProcessingError> {
    let standards: Vec<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            solution_label(row).is_some_and(|label| {
                let label = label.to_uppercase();
                params
                    .standard_prefixes
                    .iter()
                    .any(|p| label.starts_with(&p.to_uppercase()))
            })
        })
        .map(|(i, _)| i)
        .collect();

    if standards.len() < 2 {
        return Err(ProcessingError::bad_data(
            "drift correction needs at least two standards in the run",
        ));
    }

    let elements = table.element_columns();
    let mut touched = 0;

    for window in standards.windows(2) {
        let (start, end) = (window[0], window[1]);
        let span = (end - start) as f64;

        // Per-element segment ratios from the bracketing standards.
        let mut ratios: HashMap<&str, f64> = HashMap::new();
        for element in &elements {
            let start_value = num_cell(&table.rows[start], element);
            let end_value = num_cell(&table.rows[end], element);
            let ratio = match (start_value, end_value) {
                (Some(s), Some(e)) if s != 0.0 => e / s,
                _ => 1.0,
            };
            ratios.insert(element.as_str(), ratio);
        }

        // start row stays as-is (progress 0); the shared boundary row belongs
        // to the segment it ends.
        for i in (start + 1)..=end {
            let progress = (i - start) as f64 / span;
            let mut row_touched = false;
            for element in &elements {
                let ratio = ratios[element.as_str()];
                let effective = 1.0 + (ratio - 1.0) * progress;
                if let Some(value) = num_cell(&table.rows[i], element) {
                    set_num(&mut table.rows[i], element, value * effective);
                    row_touched = true;
                }
            }
            if row_touched {
                touched += 1;
            }
        }
    }

    Ok(touched)
}

fn default_tolerance() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmCheckParams {
    /// Certified concentrations: solution label -> element -> value.
    pub standards: HashMap<String, HashMap<String, f64>>,
    /// Allowed deviation from 100% recovery, in percent points.
    #[serde(default = "default_tolerance")]
    pub tolerance_percent: f64,
}

/// QC check against certified reference materials. Annotates each matching
/// row with per-element recovery percentages and a pass/fail status; no
/// concentration is modified.
pub fn apply_crm_check(table: &mut Table, params: &CrmCheckParams) -> Result<usize, ProcessingError> {
    if params.standards.is_empty() {
        return Err(ProcessingError::bad_params("no certified standards given"));
    }

    let mut checked = 0;
    let mut new_columns: Vec<String> = Vec::new();

    for row in &mut table.rows {
        let Some(certified) = solution_label(row).and_then(|l| params.standards.get(l)) else {
            continue;
        };

        let mut passed = true;
        for (element, certified_value) in certified {
            if *certified_value == 0.0 {
                return Err(ProcessingError::bad_params(format!(
                    "certified value for {element} must be non-zero"
                )));
            }
            let Some(measured) = num_cell(row, element) else {
                passed = false;
                continue;
            };
            let recovery = measured / certified_value * 100.0;
            let column = format!("{element} Recovery %");
            set_num(row, &column, recovery);
            if !new_columns.contains(&column) {
                new_columns.push(column);
            }
            if (recovery - 100.0).abs() > params.tolerance_percent {
                passed = false;
            }
        }

        row.insert(
            "QC Status".to_string(),
            JsonValue::String(if passed { "Passed" } else { "Failed" }.to_string()),
        );
        checked += 1;
    }

    if checked == 0 {
        return Err(ProcessingError::bad_params(
            "none of the certified standards appear in the run",
        ));
    }

    for column in new_columns {
        if !table.columns.contains(&column) {
            table.columns.push(column);
        }
    }
    if !table.columns.iter().any(|c| c == "QC Status") {
        table.columns.push("QC Status".to_string());
    }

    Ok(checked)
}

/// Drop rows with no measurable value in any element column.
pub fn remove_empty_rows(table: &mut Table) -> usize {
    let elements = table.element_columns();
    let before = table.rows.len();
    table
        .rows
        .retain(|row| elements.iter().any(|e| num_cell(row, e).is_some()));
    before - table.rows.len()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualEdit {
    pub solution_label: String,
    pub field: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditParams {
    pub edits: Vec<ManualEdit>,
}

/// Apply explicit cell edits. Every edit must hit an existing column and at
/// least one row; an analyst typo should fail loudly, not silently no-op.
pub fn apply_edits(table: &mut Table, params: &EditParams) -> Result<usize, ProcessingError> {
    if params.edits.is_empty() {
        return Err(ProcessingError::bad_params("no edits given"));
    }

    let mut applied = 0;
    for edit in &params.edits {
        if !table.columns.contains(&edit.field) {
            return Err(ProcessingError::bad_params(format!(
                "unknown column '{}'",
                edit.field
            )));
        }
        let mut hit = false;
        for row in &mut table.rows {
            if solution_label(row) == Some(edit.solution_label.as_str()) {
                row.insert(edit.field.clone(), edit.value.clone());
                hit = true;
                applied += 1;
            }
        }
        if !hit {
            return Err(ProcessingError::bad_params(format!(
                "no row labelled '{}'",
                edit.solution_label
            )));
        }
    }
    Ok(applied)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationParams {
    pub element: String,
    /// Target regression slope; defaults to flattening the trend entirely.
    #[serde(default)]
    pub target_slope: f64,
}

/// Slope optimization: fit a line over run order for one element, then
/// rescale every value by `new_fit / old_fit` so the trend matches the target
/// slope while the run's center point is preserved.
pub fn apply_slope_optimization(
    table: &mut Table,
    params: &OptimizationParams,
) -> Result<usize, ProcessingError> {
    if !table.columns.contains(&params.element) {
        return Err(ProcessingError::bad_params(format!(
            "unknown element '{}'",
            params.element
        )));
    }

    let points: Vec<(f64, f64)> = table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| num_cell(row, &params.element).map(|v| (i as f64, v)))
        .collect();
    if points.len() < 2 {
        return Err(ProcessingError::bad_data(
            "not enough data points for slope optimization",
        ));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return Err(ProcessingError::bad_data("degenerate run order"));
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let new_slope = params.target_slope;
    let new_intercept = mean_y - new_slope * mean_x;

    let mut touched = 0;
    for (i, row) in table.rows.iter_mut().enumerate() {
        let Some(value) = num_cell(row, &params.element) else {
            continue;
        };
        let fitted = intercept + slope * i as f64;
        if fitted == 0.0 {
            continue;
        }
        let factor = (new_intercept + new_slope * i as f64) / fitted;
        set_num(row, &params.element, value * factor);
        touched += 1;
    }

    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures;
    use serde_json::json;

    fn cu(table: &Table, row: usize) -> f64 {
        num_cell(&table.rows[row], "Cu").unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn weight_correction_rescales_by_old_over_new() {
        let mut table = fixtures::run();
        let n = apply_weight(
            &mut table,
            &WeightParams {
                solution_label: "S-001".into(),
                new_weight: 1.0,
            },
        )
        .unwrap();

        assert_eq!(n, 1);
        // old weight 0.5, new 1.0 -> factor 0.5
        assert!(close(cu(&table, 1), 6.25));
        assert!(close(num_cell(&table.rows[1], "Zn").unwrap(), 3.75));
        assert!(close(num_cell(&table.rows[1], "Act Wgt").unwrap(), 1.0));
        // Other rows untouched.
        assert!(close(cu(&table, 2), 30.0));
    }

    #[test]
    fn volume_correction_rescales_by_new_over_old() {
        let mut table = fixtures::run();
        apply_volume(
            &mut table,
            &VolumeParams {
                solution_label: "S-001".into(),
                new_volume: 50.0,
            },
        )
        .unwrap();

        // old volume 100, new 50 -> factor 0.5
        assert!(close(cu(&table, 1), 6.25));
        assert!(close(num_cell(&table.rows[1], "Act Vol").unwrap(), 50.0));
    }

    #[test]
    fn df_correction_rescales_by_new_over_old() {
        let mut table = fixtures::run();
        apply_df(
            &mut table,
            &DfParams {
                solution_label: "S-001".into(),
                new_df: 4.0,
            },
        )
        .unwrap();

        // old DF 2, new 4 -> factor 2
        assert!(close(cu(&table, 1), 25.0));
        assert!(close(num_cell(&table.rows[1], "DF").unwrap(), 4.0));
    }

    #[test]
    fn corrections_only_touch_sample_rows() {
        let mut table = fixtures::run();
        // "STD 1" exists but is Type "Std", not "Samp".
        let err = apply_weight(
            &mut table,
            &WeightParams {
                solution_label: "STD 1".into(),
                new_weight: 1.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::BadParams(_)));
    }

    #[test]
    fn nonpositive_factor_inputs_are_rejected() {
        let mut table = fixtures::run();
        assert!(apply_weight(
            &mut table,
            &WeightParams {
                solution_label: "S-001".into(),
                new_weight: 0.0
            }
        )
        .is_err());
        assert!(apply_df(
            &mut table,
            &DfParams {
                solution_label: "S-001".into(),
                new_df: -1.0
            }
        )
        .is_err());
    }

    #[test]
    fn drift_interpolates_linearly_between_standards() {
        let mut table = fixtures::run();
        let n = apply_drift(&mut table, &DriftParams::default()).unwrap();

        // Standards at rows 0 and 4; Cu drifts 50 -> 55, ratio 1.1 over 4 rows.
        // Row 1: 12.5 * (1 + 0.1 * 0.25), row 2: 30 * (1 + 0.1 * 0.5).
        assert!(close(cu(&table, 1), 12.5 * 1.025));
        assert!(close(cu(&table, 2), 30.0 * 1.05));
        // Zn has no drift (20 -> 20), so it stays put.
        assert!(close(num_cell(&table.rows[1], "Zn").unwrap(), 7.5));
        // Rinse row has no values, so it does not count as touched.
        assert_eq!(n, 3);
    }

    #[test]
    fn drift_needs_two_standards() {
        let mut table = fixtures::run();
        table.rows.truncate(3); // drop STD 2 and the rinse
        let err = apply_drift(&mut table, &DriftParams::default()).unwrap_err();
        assert!(matches!(err, ProcessingError::BadData(_)));
    }

    #[test]
    fn crm_check_annotates_recovery_and_status() {
        let mut table = fixtures::run();
        let params: CrmCheckParams = serde_json::from_value(json!({
            "standards": {"STD 2": {"Cu": 50.0}},
            "tolerance_percent": 5.0
        }))
        .unwrap();

        let checked = apply_crm_check(&mut table, &params).unwrap();
        assert_eq!(checked, 1);

        let row = &table.rows[4];
        // measured 55 vs certified 50 -> 110% recovery, outside 5%.
        assert!(close(num_cell(row, "Cu Recovery %").unwrap(), 110.0));
        assert_eq!(row.get("QC Status").unwrap(), "Failed");
        assert!(table.columns.contains(&"Cu Recovery %".to_string()));

        // Concentrations are untouched by a check.
        assert!(close(cu(&table, 4), 55.0));
    }

    #[test]
    fn empty_row_removal_drops_valueless_rows() {
        let mut table = fixtures::run();
        let removed = remove_empty_rows(&mut table);
        assert_eq!(removed, 1);
        assert!(table
            .rows
            .iter()
            .all(|r| solution_label(r) != Some("RINSE")));
    }

    #[test]
    fn manual_edits_hit_existing_rows_and_columns() {
        let mut table = fixtures::run();
        let applied = apply_edits(
            &mut table,
            &EditParams {
                edits: vec![ManualEdit {
                    solution_label: "S-002".into(),
                    field: "Cu".into(),
                    value: json!(29.5),
                }],
            },
        )
        .unwrap();
        assert_eq!(applied, 1);
        assert!(close(cu(&table, 2), 29.5));

        let err = apply_edits(
            &mut table,
            &EditParams {
                edits: vec![ManualEdit {
                    solution_label: "S-002".into(),
                    field: "Nope".into(),
                    value: json!(1),
                }],
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::BadParams(_)));
    }

    #[test]
    fn slope_optimization_flattens_the_trend() {
        let mut table = Table::new(
            vec!["Solution Label".into(), "Type".into(), "Cu".into()],
            (0..3)
                .map(|i| {
                    let v = json!({
                        "Solution Label": format!("S-{i}"),
                        "Type": "Samp",
                        "Cu": 10.0 * (i + 1) as f64,
                    });
                    match v {
                        JsonValue::Object(m) => m,
                        _ => unreachable!(),
                    }
                })
                .collect(),
        );

        let n = apply_slope_optimization(
            &mut table,
            &OptimizationParams {
                element: "Cu".into(),
                target_slope: 0.0,
            },
        )
        .unwrap();

        assert_eq!(n, 3);
        // 10, 20, 30 fits slope 10 through (1, 20); zeroing the slope pivots
        // every value onto the mean.
        for i in 0..3 {
            assert!(close(cu(&table, i), 20.0));
        }
    }

    #[test]
    fn dispatch_parses_params_and_describes_the_change() {
        let mut table = fixtures::run();
        let description = apply(
            &mut table,
            ProcessingType::WeightCorrection,
            &json!({"solution_label": "S-001", "new_weight": 1.0}),
        )
        .unwrap();
        assert!(description.contains("Weight correction"));
        assert!(close(cu(&table, 1), 6.25));

        let err = apply(&mut table, ProcessingType::WeightCorrection, &json!({})).unwrap_err();
        assert!(matches!(err, ProcessingError::BadParams(_)));

        let err = apply(&mut table, ProcessingType::Import, &json!({})).unwrap_err();
        assert!(matches!(err, ProcessingError::BadParams(_)));
    }
}
