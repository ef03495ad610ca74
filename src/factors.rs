use crate::models::FeatureVector;

// Uncalibrated. Changing these changes the factors stored with new records.
pub const ANXIETY_THRESHOLD: i64 = 10;
pub const SLEEP_QUALITY_FLOOR: i64 = 3;
pub const STUDY_LOAD_THRESHOLD: i64 = 3;
pub const DEPRESSION_THRESHOLD: i64 = 10;
pub const SOCIAL_SUPPORT_FLOOR: i64 = 2;
pub const BULLYING_THRESHOLD: i64 = 2;

pub const HIGH_ANXIETY: &str = "High Anxiety";
pub const POOR_SLEEP: &str = "Poor Sleep";
pub const HEAVY_WORKLOAD: &str = "Heavy Workload";
pub const DEPRESSION_SYMPTOMS: &str = "Depression Symptoms";
pub const LOW_SOCIAL_SUPPORT: &str = "Low Social Support";
pub const BULLYING: &str = "Bullying";
pub const GENERAL_STRESS: &str = "General Stress";

const FACTOR_SEPARATOR: &str = ", ";

/// Explains an assessment with every rule that fires, in rule order. Falls
/// back to `General Stress` so the list is never empty.
pub fn attribute(features: &FeatureVector) -> Vec<String> {
    let rules: [(bool, &str); 6] = [
        (features.anxiety_level > ANXIETY_THRESHOLD, HIGH_ANXIETY),
        (features.sleep_quality < SLEEP_QUALITY_FLOOR, POOR_SLEEP),
        (features.study_load > STUDY_LOAD_THRESHOLD, HEAVY_WORKLOAD),
        (features.depression > DEPRESSION_THRESHOLD, DEPRESSION_SYMPTOMS),
        (features.social_support < SOCIAL_SUPPORT_FLOOR, LOW_SOCIAL_SUPPORT),
        (features.bullying > BULLYING_THRESHOLD, BULLYING),
    ];

    let mut factors: Vec<String> = rules
        .iter()
        .filter(|(fires, _)| *fires)
        .map(|(_, factor)| factor.to_string())
        .collect();

    if factors.is_empty() {
        factors.push(GENERAL_STRESS.to_string());
    }
    factors
}

pub fn join_factors(factors: &[String]) -> String {
    factors.join(FACTOR_SEPARATOR)
}

pub fn split_factors(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|factor| !factor.is_empty())
        .map(str::to_string)
        .collect()
}
