use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 20;

/// Column order the classifier was trained on. Any artifact we load must
/// declare exactly this order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "anxiety_level",
    "self_esteem",
    "mental_health_history",
    "depression",
    "headache",
    "blood_pressure",
    "sleep_quality",
    "breathing_problem",
    "noise_level",
    "living_conditions",
    "safety",
    "basic_needs",
    "academic_performance",
    "study_load",
    "teacher_student_relationship",
    "future_career_concerns",
    "social_support",
    "peer_pressure",
    "extracurricular_activities",
    "bullying",
];

/// Self-reported wellbeing signals for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub anxiety_level: i64,
    pub self_esteem: i64,
    pub mental_health_history: i64,
    pub depression: i64,
    pub headache: i64,
    pub blood_pressure: i64,
    pub sleep_quality: i64,
    pub breathing_problem: i64,
    pub noise_level: i64,
    pub living_conditions: i64,
    pub safety: i64,
    pub basic_needs: i64,
    pub academic_performance: i64,
    pub study_load: i64,
    pub teacher_student_relationship: i64,
    pub future_career_concerns: i64,
    pub social_support: i64,
    pub peer_pressure: i64,
    pub extracurricular_activities: i64,
    pub bullying: i64,
}

impl FeatureVector {
    /// Values in `FEATURE_NAMES` order.
    pub fn values(&self) -> [i64; FEATURE_COUNT] {
        [
            self.anxiety_level,
            self.self_esteem,
            self.mental_health_history,
            self.depression,
            self.headache,
            self.blood_pressure,
            self.sleep_quality,
            self.breathing_problem,
            self.noise_level,
            self.living_conditions,
            self.safety,
            self.basic_needs,
            self.academic_performance,
            self.study_load,
            self.teacher_student_relationship,
            self.future_career_concerns,
            self.social_support,
            self.peer_pressure,
            self.extracurricular_activities,
            self.bullying,
        ]
    }

    pub fn from_values(values: [i64; FEATURE_COUNT]) -> Self {
        let [
            anxiety_level,
            self_esteem,
            mental_health_history,
            depression,
            headache,
            blood_pressure,
            sleep_quality,
            breathing_problem,
            noise_level,
            living_conditions,
            safety,
            basic_needs,
            academic_performance,
            study_load,
            teacher_student_relationship,
            future_career_concerns,
            social_support,
            peer_pressure,
            extracurricular_activities,
            bullying,
        ] = values;
        Self {
            anxiety_level,
            self_esteem,
            mental_health_history,
            depression,
            headache,
            blood_pressure,
            sleep_quality,
            breathing_problem,
            noise_level,
            living_conditions,
            safety,
            basic_needs,
            academic_performance,
            study_load,
            teacher_student_relationship,
            future_career_concerns,
            social_support,
            peer_pressure,
            extracurricular_activities,
            bullying,
        }
    }

    /// Classifier input row, ordered like the training columns.
    pub fn to_row(&self) -> [f64; FEATURE_COUNT] {
        self.values().map(|value| value as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StressLabel {
    Low,
    Medium,
    High,
    Unknown,
}

impl StressLabel {
    pub fn from_class_id(class_id: i64) -> Self {
        match class_id {
            0 => StressLabel::Low,
            1 => StressLabel::Medium,
            2 => StressLabel::High,
            _ => StressLabel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StressLabel::Low => "Low Stress",
            StressLabel::Medium => "Medium Stress",
            StressLabel::High => "High Stress",
            StressLabel::Unknown => "Unknown",
        }
    }

    /// Reads a persisted label back. Anything unrecognised is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "Low Stress" => StressLabel::Low,
            "Medium Stress" => StressLabel::Medium,
            "High Stress" => StressLabel::High,
            _ => StressLabel::Unknown,
        }
    }
}

impl std::fmt::Display for StressLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StressLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentResult {
    #[serde(rename = "classId")]
    pub class_id: i64,
    pub label: StressLabel,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringRow {
    pub id: i64,
    pub predicted_label: String,
    pub anxiety_level: i64,
    pub sleep_quality: i64,
    pub study_load: i64,
}

#[derive(Debug, Clone)]
pub struct StoredAssessment {
    pub id: i64,
    pub features: FeatureVector,
    pub label: StressLabel,
    pub factors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredAssessment {
    pub fn monitoring_row(&self) -> MonitoringRow {
        MonitoringRow {
            id: self.id,
            predicted_label: self.label.as_str().to_string(),
            anxiety_level: self.features.anxiety_level,
            sleep_quality: self.features.sleep_quality,
            study_load: self.features.study_load,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelSummary {
    pub label: StressLabel,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone)]
pub struct FactorSummary {
    pub factor: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ids_map_to_fixed_labels() {
        assert_eq!(StressLabel::from_class_id(0).as_str(), "Low Stress");
        assert_eq!(StressLabel::from_class_id(1).as_str(), "Medium Stress");
        assert_eq!(StressLabel::from_class_id(2).as_str(), "High Stress");
        assert_eq!(StressLabel::from_class_id(3), StressLabel::Unknown);
        assert_eq!(StressLabel::from_class_id(-1), StressLabel::Unknown);
    }

    #[test]
    fn row_follows_training_column_order() {
        let features = FeatureVector {
            anxiety_level: 1,
            study_load: 14,
            bullying: 20,
            ..Default::default()
        };
        let row = features.to_row();
        assert_eq!(row[0], 1.0);
        assert_eq!(row[13], 14.0);
        assert_eq!(row[19], 20.0);
        assert_eq!(FEATURE_NAMES[13], "study_load");
        assert_eq!(FeatureVector::from_values(features.values()), features);
    }

    #[test]
    fn deserialization_requires_every_field() {
        let missing = serde_json::json!({ "anxiety_level": 3 });
        assert!(serde_json::from_value::<FeatureVector>(missing).is_err());

        let mut full = serde_json::Map::new();
        for name in FEATURE_NAMES {
            full.insert(name.to_string(), serde_json::json!(2));
        }
        let parsed: FeatureVector = serde_json::from_value(full.into()).unwrap();
        assert_eq!(parsed.values(), [2; FEATURE_COUNT]);
    }

    #[test]
    fn values_beyond_32_bits_are_accepted() {
        let mut full = serde_json::Map::new();
        for name in FEATURE_NAMES {
            full.insert(name.to_string(), serde_json::json!(0));
        }
        full.insert("anxiety_level".to_string(), serde_json::json!(3_000_000_000i64));
        full.insert("bullying".to_string(), serde_json::json!(-3_000_000_000i64));
        let parsed: FeatureVector = serde_json::from_value(full.into()).unwrap();
        assert_eq!(parsed.anxiety_level, 3_000_000_000);
        assert_eq!(parsed.to_row()[19], -3_000_000_000.0);
    }

    #[test]
    fn non_integer_fields_are_rejected() {
        let mut full = serde_json::Map::new();
        for name in FEATURE_NAMES {
            full.insert(name.to_string(), serde_json::json!(1));
        }
        full.insert("sleep_quality".to_string(), serde_json::json!("poor"));
        assert!(serde_json::from_value::<FeatureVector>(full.into()).is_err());
    }

    #[test]
    fn labels_round_trip_through_text() {
        for label in [StressLabel::Low, StressLabel::Medium, StressLabel::High] {
            assert_eq!(StressLabel::parse(label.as_str()), label);
        }
        assert_eq!(StressLabel::parse("Severe"), StressLabel::Unknown);
    }
}
