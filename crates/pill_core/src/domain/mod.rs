use serde::{Deserialize, Deserializer, Serialize};

/// Structured answer about a medicine, decoded from a grounded generation.
///
/// Fields the reference context does not cover come back as `null` (or absent) and decode to
/// `None` / an empty list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicineDetail {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(rename = "sideEffects", default, deserialize_with = "null_as_empty")]
    pub side_effects: Vec<String>,
}

/// Medicine line read off a prescription image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrescriptionRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub frequency_per_day: Option<u32>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub duration_of_intake: Option<u32>,
    #[serde(default)]
    pub extra_information: Option<String>,
}

impl PrescriptionRecord {
    pub const DEFAULT_FREQUENCY_PER_DAY: u32 = 1;
    pub const DEFAULT_DURATION_DAYS: u32 = 7;

    pub fn frequency_or_default(&self) -> u32 {
        self.frequency_per_day
            .filter(|n| *n > 0)
            .unwrap_or(Self::DEFAULT_FREQUENCY_PER_DAY)
    }

    pub fn duration_or_default(&self) -> u32 {
        self.duration_of_intake
            .filter(|n| *n > 0)
            .unwrap_or(Self::DEFAULT_DURATION_DAYS)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Min,
    Low,
    #[default]
    Default,
    High,
    Urgent,
}

/// Title/body pair handed to a notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

// Models occasionally quote numbers ("2") even when asked for integers.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(u64),
        Text(String),
    }

    match Option::<NumOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrText::Num(n)) => u32::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("value out of range: {n}"))),
        Some(NumOrText::Text(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(None);
            }
            t.parse::<u32>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {t:?}")))
        }
    }
}
