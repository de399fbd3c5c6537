//! Quote model for backoffice-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Quote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Quoted,
    Accepted,
    Declined,
    Expired,
    Converted,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Quoted => "quoted",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Declined => "declined",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Converted => "converted",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "quoted" => QuoteStatus::Quoted,
            "accepted" => QuoteStatus::Accepted,
            "declined" => QuoteStatus::Declined,
            "expired" => QuoteStatus::Expired,
            "converted" => QuoteStatus::Converted,
            _ => QuoteStatus::Pending,
        }
    }
}

/// Service type offered by the company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    LawnCare,
    FlowerBeds,
    SeasonalCleanup,
    PressureWashing,
    Other,
}

/// Whether a service type carries a mandatory deposit.
///
/// This is a closed-set business rule: install-style work takes a 50%
/// deposit, recurring maintenance never does. It is not inferred from price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositPolicy {
    Required,
    NotAllowed,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::LawnCare => "lawn_care",
            ServiceType::FlowerBeds => "flower_beds",
            ServiceType::SeasonalCleanup => "seasonal_cleanup",
            ServiceType::PressureWashing => "pressure_washing",
            ServiceType::Other => "other",
        }
    }

    /// Parse a service type, tolerating either separator spelling
    /// (`flower-beds` and `flower_beds` are equivalent input).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "lawn_care" => Some(ServiceType::LawnCare),
            "flower_beds" => Some(ServiceType::FlowerBeds),
            "seasonal_cleanup" => Some(ServiceType::SeasonalCleanup),
            "pressure_washing" => Some(ServiceType::PressureWashing),
            "other" => Some(ServiceType::Other),
            _ => None,
        }
    }

    pub fn deposit_policy(&self) -> DepositPolicy {
        match self {
            ServiceType::FlowerBeds | ServiceType::PressureWashing => DepositPolicy::Required,
            ServiceType::LawnCare | ServiceType::SeasonalCleanup | ServiceType::Other => {
                DepositPolicy::NotAllowed
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::LawnCare => "Lawn Care",
            ServiceType::FlowerBeds => "Flower Beds",
            ServiceType::SeasonalCleanup => "Seasonal Cleanup",
            ServiceType::PressureWashing => "Pressure Washing",
            ServiceType::Other => "Other",
        }
    }
}

/// Property size bucket supplied on intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl PropertySize {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertySize::Small => "small",
            PropertySize::Medium => "medium",
            PropertySize::Large => "large",
            PropertySize::ExtraLarge => "extra_large",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "small" => Some(PropertySize::Small),
            "medium" => Some(PropertySize::Medium),
            "large" => Some(PropertySize::Large),
            "extra_large" | "xl" => Some(PropertySize::ExtraLarge),
            _ => None,
        }
    }
}

/// Quote record.
///
/// The contact fields are a snapshot taken at submission time so guest
/// quotes survive even when no customer row exists yet.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quote {
    pub quote_id: i64,
    pub customer_id: Option<i64>,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_address: Option<String>,
    pub service_type: String,
    pub property_size: Option<String>,
    pub description: String,
    pub photo_urls: Vec<String>,
    pub amount: Option<Decimal>,
    pub quote_notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: String,
    pub quoted_utc: Option<DateTime<Utc>>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Quote {
    pub fn status(&self) -> QuoteStatus {
        QuoteStatus::from_string(&self.status)
    }

    pub fn notes(&self) -> QuoteNotes {
        self.quote_notes
            .as_deref()
            .map(QuoteNotes::unpack)
            .unwrap_or_default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|deadline| deadline < now).unwrap_or(false)
    }
}

/// Input for creating a quote from the public intake form.
#[derive(Debug, Clone)]
pub struct CreateQuote {
    pub customer_id: Option<i64>,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_address: Option<String>,
    pub service_type: ServiceType,
    pub property_size: Option<PropertySize>,
    pub description: String,
    pub photo_urls: Vec<String>,
}

/// The three logical sub-fields packed into the single `quote_notes` text
/// column. Pack/unpack happens only at the persistence boundary; business
/// logic always sees this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteNotes {
    pub notes: Option<String>,
    pub timeline: Option<String>,
    pub terms: Option<String>,
}

const NOTES_MARKER: &str = "NOTES:";
const TIMELINE_MARKER: &str = "TIMELINE:";
const TERMS_MARKER: &str = "TERMS:";

impl QuoteNotes {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none() && self.timeline.is_none() && self.terms.is_none()
    }

    /// Pack into the line-prefixed blob stored in the database. Returns
    /// `None` when every sub-field is empty so the column stays NULL.
    pub fn pack(&self) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(notes) = self.notes.as_deref().filter(|s| !s.trim().is_empty()) {
            sections.push(format!("{} {}", NOTES_MARKER, notes.trim()));
        }
        if let Some(timeline) = self.timeline.as_deref().filter(|s| !s.trim().is_empty()) {
            sections.push(format!("{} {}", TIMELINE_MARKER, timeline.trim()));
        }
        if let Some(terms) = self.terms.as_deref().filter(|s| !s.trim().is_empty()) {
            sections.push(format!("{} {}", TERMS_MARKER, terms.trim()));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n"))
        }
    }

    /// Unpack the stored blob. Lines without a marker continue the current
    /// section; a blob with no markers at all is treated as plain notes.
    pub fn unpack(blob: &str) -> Self {
        #[derive(Clone, Copy)]
        enum Section {
            Notes,
            Timeline,
            Terms,
        }

        let mut notes: Vec<String> = Vec::new();
        let mut timeline: Vec<String> = Vec::new();
        let mut terms: Vec<String> = Vec::new();
        let mut current = Section::Notes;

        for line in blob.lines() {
            let (section, rest) = if let Some(rest) = line.strip_prefix(NOTES_MARKER) {
                (Section::Notes, rest)
            } else if let Some(rest) = line.strip_prefix(TIMELINE_MARKER) {
                (Section::Timeline, rest)
            } else if let Some(rest) = line.strip_prefix(TERMS_MARKER) {
                (Section::Terms, rest)
            } else {
                (current, line)
            };
            current = section;
            let rest = rest.trim();
            if rest.is_empty() {
                continue;
            }
            match section {
                Section::Notes => notes.push(rest.to_string()),
                Section::Timeline => timeline.push(rest.to_string()),
                Section::Terms => terms.push(rest.to_string()),
            }
        }

        let join = |parts: Vec<String>| {
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        };

        QuoteNotes {
            notes: join(notes),
            timeline: join(timeline),
            terms: join(terms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_all_sections() {
        let notes = QuoteNotes {
            notes: Some("Includes edging".to_string()),
            timeline: Some("2-3 weeks out".to_string()),
            terms: Some("50% deposit".to_string()),
        };
        let blob = notes.pack().unwrap();
        assert_eq!(QuoteNotes::unpack(&blob), notes);
    }

    #[test]
    fn empty_notes_pack_to_none() {
        assert_eq!(QuoteNotes::default().pack(), None);
        let blank = QuoteNotes {
            notes: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.pack(), None);
    }

    #[test]
    fn packs_only_present_sections() {
        let notes = QuoteNotes {
            timeline: Some("Next Tuesday".to_string()),
            ..Default::default()
        };
        let blob = notes.pack().unwrap();
        assert_eq!(blob, "TIMELINE: Next Tuesday");
        assert_eq!(QuoteNotes::unpack(&blob), notes);
    }

    #[test]
    fn unmarked_blob_is_plain_notes() {
        let parsed = QuoteNotes::unpack("call before arriving\ngate code 4411");
        assert_eq!(
            parsed.notes.as_deref(),
            Some("call before arriving\ngate code 4411")
        );
        assert!(parsed.timeline.is_none());
        assert!(parsed.terms.is_none());
    }

    #[test]
    fn service_type_parse_accepts_both_separators() {
        assert_eq!(ServiceType::parse("flower-beds"), Some(ServiceType::FlowerBeds));
        assert_eq!(ServiceType::parse("flower_beds"), Some(ServiceType::FlowerBeds));
        assert_eq!(ServiceType::parse("Pressure-Washing"), Some(ServiceType::PressureWashing));
        assert_eq!(ServiceType::parse("paving"), None);
    }

    #[test]
    fn deposit_policy_is_a_closed_set() {
        assert_eq!(ServiceType::FlowerBeds.deposit_policy(), DepositPolicy::Required);
        assert_eq!(ServiceType::PressureWashing.deposit_policy(), DepositPolicy::Required);
        assert_eq!(ServiceType::LawnCare.deposit_policy(), DepositPolicy::NotAllowed);
        assert_eq!(ServiceType::SeasonalCleanup.deposit_policy(), DepositPolicy::NotAllowed);
        assert_eq!(ServiceType::Other.deposit_policy(), DepositPolicy::NotAllowed);
    }
}
