//! User input mapped to Nuimo sensor notifications

pub mod encoder;

pub use encoder::{InputEventEncoder, RotationAccumulator};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Swipe gesture on the touch surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SwipeDirection {
    /// Byte sent on the Touch characteristic
    pub fn gatt_value(&self) -> u8 {
        match self {
            SwipeDirection::Left => 0,
            SwipeDirection::Right => 1,
            SwipeDirection::Up => 2,
            SwipeDirection::Down => 3,
        }
    }
}

impl fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
        };
        f.write_str(name)
    }
}

impl FromStr for SwipeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(SwipeDirection::Left),
            "right" | "r" => Ok(SwipeDirection::Right),
            "up" | "u" => Ok(SwipeDirection::Up),
            "down" | "d" => Ok(SwipeDirection::Down),
            other => Err(format!("unknown swipe direction: {}", other)),
        }
    }
}

/// Payload destined for one characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swipe_codes() {
        assert_eq!(SwipeDirection::Left.gatt_value(), 0);
        assert_eq!(SwipeDirection::Right.gatt_value(), 1);
        assert_eq!(SwipeDirection::Up.gatt_value(), 2);
        assert_eq!(SwipeDirection::Down.gatt_value(), 3);
    }

    #[test]
    fn test_swipe_parse() {
        assert_eq!("LEFT".parse::<SwipeDirection>(), Ok(SwipeDirection::Left));
        assert_eq!(" d ".parse::<SwipeDirection>(), Ok(SwipeDirection::Down));
        assert!("sideways".parse::<SwipeDirection>().is_err());
        assert_eq!(SwipeDirection::Up.to_string(), "up");
    }
}
