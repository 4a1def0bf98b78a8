//! Ordered safety verdicts assigned to every classified instruction.

use std::fmt;

/// How (il)legal an instruction is, ordered from most to least permissive.
///
/// Only [`SafetyLevel::Safe`] and [`SafetyLevel::ImplementationSafe`] are
/// acceptable inside a validated segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum SafetyLevel {
    /// Provably confined.
    #[default]
    Safe = 0,
    /// Confined on every implementation the sandbox supports.
    ImplementationSafe = 1,
    /// The classifier has not produced a verdict.
    Uninitialized = 2,
    /// Architecturally deprecated.
    Deprecated = 3,
    /// Architecturally UNPREDICTABLE.
    Unpredictable = 4,
    /// Architecturally UNDEFINED or not decodable.
    Undefined = 5,
    /// A legal instruction whose operands break the sandbox policy.
    ForbiddenOperands = 6,
    /// Never allowed inside the sandbox.
    Forbidden = 7,
}

impl SafetyLevel {
    /// Every level in ascending order.
    pub const ALL: [Self; 8] = [
        Self::Safe,
        Self::ImplementationSafe,
        Self::Uninitialized,
        Self::Deprecated,
        Self::Unpredictable,
        Self::Undefined,
        Self::ForbiddenOperands,
        Self::Forbidden,
    ];

    /// True when a segment may contain an instruction at this level.
    #[must_use]
    pub const fn is_acceptable(self) -> bool {
        matches!(self, Self::Safe | Self::ImplementationSafe)
    }

    /// Combines two verdicts, keeping the stricter one.
    ///
    /// Narrowing never yields a level more permissive than `self`.
    #[must_use]
    pub const fn narrow(self, other: Self) -> Self {
        if other.as_u8() > self.as_u8() {
            other
        } else {
            self
        }
    }

    /// Stable numeric value of this level.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable numeric value back into a level.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Safe),
            1 => Some(Self::ImplementationSafe),
            2 => Some(Self::Uninitialized),
            3 => Some(Self::Deprecated),
            4 => Some(Self::Unpredictable),
            5 => Some(Self::Undefined),
            6 => Some(Self::ForbiddenOperands),
            7 => Some(Self::Forbidden),
            _ => None,
        }
    }

    /// Upper-case name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::ImplementationSafe => "IMPLEMENTATION_SAFE",
            Self::Uninitialized => "UNINITIALIZED",
            Self::Deprecated => "DEPRECATED",
            Self::Unpredictable => "UNPREDICTABLE",
            Self::Undefined => "UNDEFINED",
            Self::ForbiddenOperands => "FORBIDDEN_OPERANDS",
            Self::Forbidden => "FORBIDDEN",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::SafetyLevel;
    use proptest::prelude::*;

    #[test]
    fn levels_are_totally_ordered_from_safe_to_forbidden() {
        for pair in SafetyLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should precede {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn only_safe_levels_are_acceptable() {
        let acceptable: Vec<_> = SafetyLevel::ALL
            .into_iter()
            .filter(|level| level.is_acceptable())
            .collect();
        assert_eq!(
            acceptable,
            vec![SafetyLevel::Safe, SafetyLevel::ImplementationSafe]
        );
    }

    #[test]
    fn stable_values_roundtrip() {
        for level in SafetyLevel::ALL {
            assert_eq!(SafetyLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(SafetyLevel::from_u8(8), None);
    }

    #[test]
    fn display_uses_report_names() {
        assert_eq!(
            SafetyLevel::ForbiddenOperands.to_string(),
            "FORBIDDEN_OPERANDS"
        );
    }

    proptest! {
        #[test]
        fn narrowing_never_loosens(a in 0u8..8, b in 0u8..8) {
            let a = SafetyLevel::from_u8(a).unwrap();
            let b = SafetyLevel::from_u8(b).unwrap();
            let narrowed = a.narrow(b);
            prop_assert!(narrowed >= a);
            prop_assert!(narrowed >= b);
            prop_assert_eq!(narrowed, a.max(b));
        }
    }
}
