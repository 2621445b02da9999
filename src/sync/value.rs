use serde::{Serialize, Serializer};

pub const UNSURE: &str = "?";
pub const NEEDS_BREAK: &str = "☕";

/// The deck offered to every participant.
pub const POKER_VALUES: [&str; 10] = ["0", "1", "2", "3", "5", "8", "13", "21", UNSURE, NEEDS_BREAK];

/// A vote as the core sees it. The store keeps plain strings; conversion
/// happens only at the gateway edge.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VoteValue {
    #[default]
    Unset,
    Numeric(Estimate),
    Unsure,
    NeedsBreak,
}

/// A numeric card. Equality follows the stored string, so `"5"` and `"5.0"`
/// are different votes even though they average the same.
#[derive(Debug, Clone)]
pub struct Estimate {
    raw: String,
    value: f64,
}

impl Estimate {
    fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().parse::<f64>().ok()?;
        (value.is_finite() && value >= 0.0).then(|| Self {
            raw: raw.to_owned(),
            value,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Estimate {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl VoteValue {
    /// Accepts only cards from [`POKER_VALUES`].
    pub fn from_card(card: &str) -> Option<Self> {
        if !POKER_VALUES.contains(&card) {
            return None;
        }
        Some(Self::from_wire(Some(card)))
    }

    /// Decodes a stored value. Anything that is neither a sentinel nor a
    /// non-negative number counts as an opinion without an estimate.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Unset,
            Some(UNSURE) => Self::Unsure,
            Some(NEEDS_BREAK) => Self::NeedsBreak,
            Some(raw) => match Estimate::parse(raw) {
                Some(estimate) => Self::Numeric(estimate),
                None => {
                    tracing::warn!(value = raw, "unrecognised vote value, treating it as unsure");
                    Self::Unsure
                }
            },
        }
    }

    pub fn as_wire(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Numeric(estimate) => Some(estimate.raw()),
            Self::Unsure => Some(UNSURE),
            Self::NeedsBreak => Some(NEEDS_BREAK),
        }
    }

    pub fn is_cast(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(estimate) => Some(estimate.value()),
            _ => None,
        }
    }
}

impl Serialize for VoteValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_wire() {
            Some(raw) => serializer.serialize_str(raw),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_card_decodes_to_a_cast_vote() {
        for card in POKER_VALUES {
            let value = VoteValue::from_card(card).unwrap();
            assert!(value.is_cast());
            assert_eq!(value.as_wire(), Some(card));
        }
        assert_eq!(VoteValue::from_card("4"), None);
        assert_eq!(VoteValue::from_card(""), None);
    }

    #[test]
    fn sentinels_are_not_numeric() {
        assert_eq!(VoteValue::from_wire(Some("?")), VoteValue::Unsure);
        assert_eq!(VoteValue::from_wire(Some("☕")), VoteValue::NeedsBreak);
        assert_eq!(VoteValue::from_wire(Some("13")).numeric(), Some(13.0));
        assert_eq!(VoteValue::from_wire(None), VoteValue::Unset);
    }

    #[test]
    fn garbage_on_the_wire_reads_as_unsure() {
        assert_eq!(VoteValue::from_wire(Some("banana")), VoteValue::Unsure);
        assert_eq!(VoteValue::from_wire(Some("NaN")), VoteValue::Unsure);
        assert_eq!(VoteValue::from_wire(Some("-3")), VoteValue::Unsure);
    }

    #[test]
    fn numeric_equality_is_by_raw_string() {
        assert_ne!(VoteValue::from_wire(Some("5")), VoteValue::from_wire(Some("5.0")));
        assert_eq!(VoteValue::from_wire(Some("5")), VoteValue::from_card("5").unwrap());
    }

    #[test]
    fn serializes_as_the_wire_string() {
        let json = serde_json::to_string(&[VoteValue::from_card("8").unwrap(), VoteValue::Unset]).unwrap();
        assert_eq!(json, r#"["8",null]"#);
    }
}
