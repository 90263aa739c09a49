use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Region of operation as understood by the scoring models.
///
/// The ordinal is the feature value the premium model was trained on, so the
/// mapping must stay fixed: gb 0, usa 1, eu 2, asia 3, africa 4, other 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Gb,
    Usa,
    Eu,
    Asia,
    Africa,
    Other,
}

impl Region {
    pub const ALL: [Region; 6] =
        [Self::Gb, Self::Usa, Self::Eu, Self::Asia, Self::Africa, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gb => "gb",
            Self::Usa => "usa",
            Self::Eu => "eu",
            Self::Asia => "asia",
            Self::Africa => "africa",
            Self::Other => "other",
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Gb => 0,
            Self::Usa => 1,
            Self::Eu => 2,
            Self::Asia => 3,
            Self::Africa => 4,
            Self::Other => 5,
        }
    }

    /// Total mapping from a free-form label. Anything that is not one of the
    /// five known codes lands in `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "gb" => Self::Gb,
            "usa" => Self::Usa,
            "eu" => Self::Eu,
            "asia" => Self::Asia,
            "africa" => Self::Africa,
            _ => Self::Other,
        }
    }
}

/// Ordinal for an optional region label; absence maps to the reserved
/// `other` ordinal.
pub fn region_ordinal(label: Option<&str>) -> u8 {
    label.map(Region::from_label).unwrap_or(Region::Other).ordinal()
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Region {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

/// Canonical structured claim extracted from free text.
///
/// Every field is either present or explicitly absent (`null` on the wire).
/// Records are never mutated after creation; merging produces a new record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub organisation_name: Option<String>,
    pub claimant_name: Option<String>,
    pub policy_number: Option<String>,
    pub coverage_amount: Option<f64>,
    pub region_of_operation: Option<Region>,
    pub description: Option<String>,
    #[serde(default)]
    pub extraction_failed: bool,
}

impl ClaimRecord {
    /// Marker record returned when the extraction capability failed.
    pub fn extraction_failed() -> Self {
        Self { extraction_failed: true, ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.organisation_name.is_none()
            && self.claimant_name.is_none()
            && self.policy_number.is_none()
            && self.coverage_amount.is_none()
            && self.region_of_operation.is_none()
            && self.description.is_none()
    }

    /// Downstream tools treat an empty or failed record as "no structured
    /// data available".
    pub fn is_usable(&self) -> bool {
        !self.extraction_failed && !self.is_empty()
    }

    /// Identity-based lookups need at least one of policy number or claimant.
    pub fn has_identity(&self) -> bool {
        self.policy_number.is_some() || self.claimant_name.is_some()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.organisation_name.is_none() {
            missing.push("organisation_name");
        }
        if self.claimant_name.is_none() {
            missing.push("claimant_name");
        }
        if self.policy_number.is_none() {
            missing.push("policy_number");
        }
        if self.coverage_amount.is_none() {
            missing.push("coverage_amount");
        }
        if self.region_of_operation.is_none() {
            missing.push("region_of_operation");
        }
        if self.description.is_none() {
            missing.push("description");
        }
        missing
    }

    /// False when any identity field present in both records disagrees.
    /// Records that share no identity fields describe the same party.
    pub fn same_party(&self, other: &ClaimRecord) -> bool {
        fn agrees(left: Option<&String>, right: Option<&String>) -> bool {
            match (left, right) {
                (Some(left), Some(right)) => left.trim().eq_ignore_ascii_case(right.trim()),
                _ => true,
            }
        }
        agrees(self.policy_number.as_ref(), other.policy_number.as_ref())
            && agrees(self.claimant_name.as_ref(), other.claimant_name.as_ref())
            && agrees(self.organisation_name.as_ref(), other.organisation_name.as_ref())
    }

    /// Returns a new record that keeps every present field of `self` and
    /// fills absent ones from `other`.
    pub fn merged_with(&self, other: &ClaimRecord) -> ClaimRecord {
        ClaimRecord {
            organisation_name: self
                .organisation_name
                .clone()
                .or_else(|| other.organisation_name.clone()),
            claimant_name: self.claimant_name.clone().or_else(|| other.claimant_name.clone()),
            policy_number: self.policy_number.clone().or_else(|| other.policy_number.clone()),
            coverage_amount: self.coverage_amount.or(other.coverage_amount),
            region_of_operation: self.region_of_operation.or(other.region_of_operation),
            description: self.description.clone().or_else(|| other.description.clone()),
            extraction_failed: self.extraction_failed && other.extraction_failed,
        }
    }

    /// Lenient conversion from a JSON object as produced by a language model
    /// or supplied as tool arguments. Blank strings count as absent and
    /// amounts may carry currency symbols, separators or `k`/`m` suffixes.
    /// Returns `None` when the value is not an object.
    pub fn from_json(value: &Value) -> Option<ClaimRecord> {
        let object = value.as_object()?;
        Some(ClaimRecord {
            organisation_name: text_field(object, "organisation_name"),
            claimant_name: text_field(object, "claimant_name"),
            policy_number: text_field(object, "policy_number"),
            coverage_amount: object.get("coverage_amount").and_then(amount_value),
            region_of_operation: text_field(object, "region_of_operation")
                .map(|label| Region::from_label(&label)),
            description: text_field(object, "description"),
            extraction_failed: object
                .get("extraction_failed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(text) => {
            let trimmed = text.trim();
            let placeholder = matches!(
                trimmed.to_ascii_lowercase().as_str(),
                "" | "n/a" | "null" | "none" | "unknown"
            );
            (!placeholder).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn amount_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|amount| amount.is_finite()),
        Value::String(text) => parse_amount(text),
        _ => None,
    }
}

/// Parses amounts such as `1500000`, `£1,500,000`, `2.5m` or `750k`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|character| !matches!(character, ',' | ' ' | '_'))
        .collect();
    let trimmed = cleaned
        .trim_start_matches(|character: char| !character.is_ascii_digit() && character != '.')
        .trim_end_matches(|character: char| {
            !character.is_ascii_digit() && character != 'k' && character != 'm'
        });
    if trimmed.is_empty() {
        return None;
    }

    let (number_part, multiplier) = if let Some(prefix) = trimmed.strip_suffix('k') {
        (prefix, 1_000.0)
    } else if let Some(prefix) = trimmed.strip_suffix('m') {
        (prefix, 1_000_000.0)
    } else {
        (trimmed, 1.0)
    };

    let amount = number_part.parse::<f64>().ok()?;
    amount.is_finite().then_some(amount * multiplier)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_amount, region_ordinal, ClaimRecord, Region};

    #[test]
    fn region_ordinals_are_fixed_and_total() {
        let expected =
            [("gb", 0), ("usa", 1), ("eu", 2), ("asia", 3), ("africa", 4), ("mars", 5), ("", 5)];
        for (label, ordinal) in expected {
            assert_eq!(region_ordinal(Some(label)), ordinal, "label `{label}`");
        }
        assert_eq!(region_ordinal(None), 5);
        assert_eq!(Region::from_label("  GB "), Region::Gb);
    }

    #[test]
    fn lenient_json_conversion_treats_placeholders_as_absent() {
        let record = ClaimRecord::from_json(&json!({
            "organisation_name": "Acme Widgets Ltd",
            "claimant_name": "N/A",
            "policy_number": "POL-123",
            "coverage_amount": "£1,250,000",
            "region_of_operation": "Antarctica",
            "description": ""
        }))
        .expect("object converts");

        assert_eq!(record.organisation_name.as_deref(), Some("Acme Widgets Ltd"));
        assert_eq!(record.claimant_name, None);
        assert_eq!(record.policy_number.as_deref(), Some("POL-123"));
        assert_eq!(record.coverage_amount, Some(1_250_000.0));
        assert_eq!(record.region_of_operation, Some(Region::Other));
        assert_eq!(record.description, None);
        assert!(record.has_identity());
        assert!(record.is_usable());
    }

    #[test]
    fn failed_marker_is_not_usable() {
        let record = ClaimRecord::extraction_failed();
        assert!(record.is_empty());
        assert!(!record.is_usable());
        assert!(!record.has_identity());
        assert_eq!(record.missing_fields().len(), 6);
    }

    #[test]
    fn merge_keeps_present_fields_and_fills_absent_ones() {
        let extracted = ClaimRecord {
            policy_number: Some("POL-9".to_string()),
            coverage_amount: Some(10_000.0),
            ..ClaimRecord::default()
        };
        let supplied = ClaimRecord {
            policy_number: Some("POL-OTHER".to_string()),
            region_of_operation: Some(Region::Eu),
            ..ClaimRecord::default()
        };

        let merged = extracted.merged_with(&supplied);
        assert_eq!(merged.policy_number.as_deref(), Some("POL-9"));
        assert_eq!(merged.region_of_operation, Some(Region::Eu));
        assert_eq!(merged.coverage_amount, Some(10_000.0));
        assert!(!merged.extraction_failed);
    }

    #[test]
    fn conflicting_identity_fields_are_different_parties() {
        let jane = ClaimRecord {
            claimant_name: Some("Jane Doe".to_string()),
            policy_number: Some("POL-1".to_string()),
            ..ClaimRecord::default()
        };
        let bob = ClaimRecord {
            claimant_name: Some("Bob Smith".to_string()),
            ..ClaimRecord::default()
        };
        let jane_again = ClaimRecord {
            claimant_name: Some(" jane doe ".to_string()),
            coverage_amount: Some(5_000.0),
            ..ClaimRecord::default()
        };
        let amount_only = ClaimRecord { coverage_amount: Some(1.0), ..ClaimRecord::default() };

        assert!(!bob.same_party(&jane));
        assert!(jane_again.same_party(&jane));
        assert!(amount_only.same_party(&jane));
    }

    #[test]
    fn absent_fields_serialize_as_explicit_nulls() {
        let value = ClaimRecord::default().to_json();
        assert_eq!(value["policy_number"], serde_json::Value::Null);
        assert_eq!(value["extraction_failed"], json!(false));
    }

    #[test]
    fn parses_amounts_with_suffixes() {
        assert_eq!(parse_amount("750k"), Some(750_000.0));
        assert_eq!(parse_amount("$2.5m"), Some(2_500_000.0));
        assert_eq!(parse_amount("GBP 40,000"), Some(40_000.0));
        assert_eq!(parse_amount("unknown"), None);
    }
}
