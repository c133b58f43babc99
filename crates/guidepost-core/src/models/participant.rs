use serde::{Deserialize, Serialize};

/// A booking unit: one or more travelers who always move together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub booking_ref: Option<String>,
    /// Total head-count, children included.
    pub count: u32,
    #[serde(default)]
    pub child_count: u32,
    /// Owning group. Only the transfer path rewrites this.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Participant {
    pub fn adult_count(&self) -> u32 {
        self.count.saturating_sub(self.child_count)
    }

    /// `count` must be at least 1 and `child_count` may not exceed it.
    pub fn counts_valid(count: u32, child_count: u32) -> bool {
        count >= 1 && child_count <= count
    }

    pub fn has_valid_counts(&self) -> bool {
        Self::counts_valid(self.count, self.child_count)
    }

    pub fn display_count(&self) -> String {
        crate::utils::format_counts(self.count, self.child_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(count: u32, child_count: u32) -> Participant {
        Participant {
            id: "p1".to_string(),
            name: "Dupont".to_string(),
            booking_ref: Some("BK-100".to_string()),
            count,
            child_count,
            group_id: None,
        }
    }

    #[test]
    fn test_adult_count() {
        assert_eq!(participant(4, 1).adult_count(), 3);
        assert_eq!(participant(2, 2).adult_count(), 0);
    }

    #[test]
    fn test_counts_valid() {
        assert!(Participant::counts_valid(1, 0));
        assert!(Participant::counts_valid(3, 3));
        assert!(!Participant::counts_valid(0, 0));
        assert!(!Participant::counts_valid(2, 3));
    }

    #[test]
    fn test_deserialize_minimal_row() {
        let json = r#"{"id": "p9", "name": "Rossi", "count": 2}"#;
        let p: Participant = serde_json::from_str(json).unwrap();
        assert_eq!(p.child_count, 0);
        assert!(p.group_id.is_none());
        assert!(p.has_valid_counts());
    }
}
