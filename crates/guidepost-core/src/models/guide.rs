use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Which entrance ticket a person needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum TicketClass {
    None,
    Adult,
    Child,
}

/// Guide classification. The set is closed; anything unrecognised is
/// treated as [`GuideType::AdultTicket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum GuideType {
    /// Licensed to guide inside; enters without a ticket.
    GuidesInside,
    /// Over the age threshold.
    #[default]
    AdultTicket,
    /// Under the age threshold.
    ChildTicket,
}

impl GuideType {
    /// Parse a stored type string. Handles the canonical snake_case names as
    /// well as free-text labels like "Free entry (licensed)" or "Under 26".
    /// Labels are matched by whole words; anything else is an adult ticket.
    pub fn parse(s: Option<&str>) -> Self {
        let Some(raw) = s else {
            return GuideType::AdultTicket;
        };
        let lower = raw.trim().to_lowercase();
        let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
        if words.is_empty() {
            return GuideType::AdultTicket;
        }
        let has = |word: &str| words.iter().any(|w| *w == word);
        let age = |word: &str| followed_by(&words, word, |next| next.chars().all(|c| c.is_ascii_digit()));

        if has("inside")
            || has("licensed")
            || followed_by(&words, "free", |next| next == "entry")
            || followed_by(&words, "no", |next| next == "ticket")
        {
            GuideType::GuidesInside
        } else if has("child") || age("under") {
            GuideType::ChildTicket
        } else if has("adult") || age("over") {
            GuideType::AdultTicket
        } else {
            debug!(guide_type = %raw, "Unrecognised guide type, assuming adult ticket");
            GuideType::AdultTicket
        }
    }

    pub fn ticket_class(&self) -> TicketClass {
        match self {
            GuideType::GuidesInside => TicketClass::None,
            GuideType::AdultTicket => TicketClass::Adult,
            GuideType::ChildTicket => TicketClass::Child,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GuideType::GuidesInside => "Guides inside",
            GuideType::AdultTicket => "Adult ticket",
            GuideType::ChildTicket => "Child ticket",
        }
    }
}

impl<'de> Deserialize<'de> for GuideType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(GuideType::parse(raw.as_deref()))
    }
}

/// `word` appears directly before a word accepted by `next`.
fn followed_by(words: &[&str], word: &str, next: impl Fn(&str) -> bool) -> bool {
    words.windows(2).any(|pair| pair[0] == word && next(pair[1]))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Guide {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub guide_type: GuideType,
}
