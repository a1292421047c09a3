//! Assertions over the Prometheus text exposition.
//!
//! A *series* is the metric name plus its rendered label set exactly as it
//! appears on the line, e.g. `stai_crawler_country_node_count{country="US",country_display="United States"}`.

/// Value of `series` in `export`, if present.
pub fn sample_value(export: &str, series: &str) -> Option<f64> {
    export
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let value = line.strip_prefix(series)?.strip_prefix(' ')?;
            value.trim().parse().ok()
        })
}

/// Assert that `series` is exported with `expected`.
pub fn assert_sample(export: &str, series: &str, expected: f64) {
    match sample_value(export, series) {
        Some(value) => assert!(
            (value - expected).abs() < f64::EPSILON,
            "{series}: expected {expected}, got {value}"
        ),
        None => panic!("{series} not exported:\n{export}"),
    }
}

/// Assert that no sample of metric `name` is exported, under any labels.
pub fn assert_absent(export: &str, name: &str) {
    let present = export.lines().any(|line| {
        !line.starts_with('#')
            && line
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with(' ') || rest.starts_with('{'))
    });
    assert!(!present, "{name} should not be exported:\n{export}");
}
