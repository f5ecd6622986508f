//! Config validation: unknown-key detection with Levenshtein suggestions
//! and physical range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " — did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for MonitorConfig.
///
/// Maintained by hand to match the struct hierarchy in monitor_config.rs.
/// Any new field added to MonitorConfig must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [vehicle]
        "vehicle",
        "vehicle.name",
        "vehicle.driver",
        // [drowsiness]
        "drowsiness",
        "drowsiness.ear_threshold",
        "drowsiness.consecutive_frames",
        // [yawn]
        "yawn",
        "yawn.mar_multiplier",
        "yawn.calibration_frames",
        "yawn.smoothing_window",
        // [intoxication]
        "intoxication",
        "intoxication.alcohol_threshold_volts",
        "intoxication.ambient_warmup_samples",
        // [impact]
        "impact",
        "impact.tilt_threshold_degrees",
        "impact.zero_reference_samples",
        // [escalation]
        "escalation",
        "escalation.warning_window_secs",
        "escalation.notify_grace_secs",
        "escalation.drowsiness_rearm_secs",
        "escalation.accident_rearm_secs",
        "escalation.sobriety_rearm_secs",
        // [verification]
        "verification",
        "verification.response_window_secs",
        "verification.listen_timeout_secs",
        "verification.min_word_match_ratio",
        "verification.prompt_words",
        "verification.word_bank",
        // [location]
        "location",
        "location.stale_after_secs",
        // [notification]
        "notification",
        "notification.recipient",
        "notification.webhook_url",
        "notification.dispatch_timeout_secs",
        // [capture]
        "capture",
        "capture.frame_rate_hz",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Physical Range Validation
// ============================================================================

/// Validate physical ranges on a parsed MonitorConfig.
///
/// Returns (errors, warnings). Errors are impossible values that must
/// prevent startup; warnings are suspicious but not fatal.
pub fn validate_physical_ranges(
    config: &super::MonitorConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // EAR is a ratio of eyelid gap to eye width; open eyes sit around 0.3
    let ear = config.drowsiness.ear_threshold;
    if ear >= 1.0 {
        errors.push(format!(
            "drowsiness.ear_threshold = {ear:.2} is outside physical range (0-1)"
        ));
    } else if !(0.15..=0.35).contains(&ear) {
        warnings.push(ValidationWarning {
            field: "drowsiness.ear_threshold".to_string(),
            message: format!("ear_threshold = {ear:.2} is outside typical range (0.15-0.35)"),
            suggestion: None,
        });
    }

    // Gas sensor output is bounded by the ADC reference
    let volts = config.intoxication.alcohol_threshold_volts;
    if volts > 5.0 {
        errors.push(format!(
            "intoxication.alcohol_threshold_volts = {volts:.2} exceeds ADC reference range (0-5 V)"
        ));
    }

    let tilt = config.impact.tilt_threshold_degrees;
    if !(20.0..=90.0).contains(&tilt) {
        warnings.push(ValidationWarning {
            field: "impact.tilt_threshold_degrees".to_string(),
            message: format!("tilt_threshold_degrees = {tilt:.1} is outside typical range (20-90°)"),
            suggestion: None,
        });
    }

    let fps = config.capture.frame_rate_hz;
    if !(5.0..=60.0).contains(&fps) {
        warnings.push(ValidationWarning {
            field: "capture.frame_rate_hz".to_string(),
            message: format!("frame_rate_hz = {fps:.1} is outside typical camera range (5-60 fps)"),
            suggestion: None,
        });
    }

    // Persistence window implied by the frame count
    let persistence_secs = f64::from(config.drowsiness.consecutive_frames) / fps;
    if persistence_secs > 5.0 {
        warnings.push(ValidationWarning {
            field: "drowsiness.consecutive_frames".to_string(),
            message: format!(
                "consecutive_frames = {} at {fps:.1} fps is a {persistence_secs:.1}s eye-closure window (typical ≈ 2s)",
                config.drowsiness.consecutive_frames
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("treshold", "threshold"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [impact]
            tilt_threshold_degrees = 45.0
        "#
        .parse()
        .expect("valid toml");
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"impact".to_string()));
        assert!(keys.contains(&"impact.tilt_threshold_degrees".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[drowsiness]
ear_treshold = 0.2
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("drowsiness.ear_threshold")
        );
    }

    #[test]
    fn test_word_bank_array_is_known() {
        let toml_str = r#"
[verification]
word_bank = ["alpha", "bravo", "charlie", "delta"]
"#;
        assert!(validate_unknown_keys(toml_str).is_empty());
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_physical_range_defaults_clean() {
        let (errors, warnings) = validate_physical_ranges(&MonitorConfig::default());
        assert!(errors.is_empty(), "Defaults should produce no errors: {:?}", errors);
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {:?}", warnings);
    }

    #[test]
    fn test_physical_range_impossible_ear() {
        let mut config = MonitorConfig::default();
        config.drowsiness.ear_threshold = 1.5;
        let (errors, _) = validate_physical_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("ear_threshold")));
    }

    #[test]
    fn test_long_eye_closure_window_warns() {
        let mut config = MonitorConfig::default();
        config.drowsiness.consecutive_frames = 100;
        let (_, warnings) = validate_physical_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "drowsiness.consecutive_frames"));
    }
}
