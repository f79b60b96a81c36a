//! Pseudo-terminal geometry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Character dimensions of a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl Dimensions {
    /// Create new dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Whether both axes are non-zero.
    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(40, 120)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_default() {
        let dims = Dimensions::default();
        assert_eq!(dims.rows, 40);
        assert_eq!(dims.cols, 120);
        assert!(dims.is_valid());
    }

    #[test]
    fn test_dimensions_zero_is_invalid() {
        assert!(!Dimensions::new(0, 80).is_valid());
        assert!(!Dimensions::new(24, 0).is_valid());
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(Dimensions::new(24, 80).to_string(), "24x80");
    }
}
