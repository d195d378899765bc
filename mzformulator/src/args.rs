use std::{error::Error, fmt::Display, num::ParseIntError, str::FromStr};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mzformula::{ElementRange, ErrorMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgErrorMethod {
    /// Use the configured ppm window for every peak
    None,
    /// Re-center on the accepted error of smallest magnitude
    Distance,
    /// Re-center on the lowest accepted error
    Lowest,
    /// Re-center on the mean of the accepted errors
    Average,
    /// A fixed window around the configured average error
    Symmetrical,
}

impl From<ArgErrorMethod> for ErrorMethod {
    fn from(value: ArgErrorMethod) -> Self {
        match value {
            ArgErrorMethod::None => ErrorMethod::None,
            ArgErrorMethod::Distance => ErrorMethod::Distance,
            ArgErrorMethod::Lowest => ErrorMethod::Lowest,
            ArgErrorMethod::Average => ErrorMethod::Average,
            ArgErrorMethod::Symmetrical => ErrorMethod::Symmetrical,
        }
    }
}

impl Display for ArgErrorMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgIonType {
    /// Gain or loss of a proton
    Protonated,
    /// Gain or loss of an electron
    Radical,
    /// Attachment of one of the configured adduct atoms
    Adduct,
}

impl Display for ArgIonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgOutputFormat {
    #[default]
    /// Tab-separated rows with a header
    Tsv,
    /// A JSON array of row objects
    Json,
}

impl Display for ArgOutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An element's count range denoted (symbol):(min)-(max), or (symbol):(max)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgElementRange {
    pub symbol: String,
    pub min: i32,
    pub max: i32,
}

impl From<ArgElementRange> for ElementRange {
    fn from(value: ArgElementRange) -> Self {
        ElementRange::new(value.symbol, value.min, value.max)
    }
}

impl Display for ArgElementRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.symbol, self.min, self.max)
    }
}

#[derive(Debug)]
pub enum ElementRangeParseError {
    MissingSymbol(String),
    MalformedMin(ParseIntError),
    MalformedMax(ParseIntError),
}

impl Display for ElementRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementRangeParseError::MissingSymbol(s) => {
                write!(f, "Expected an element symbol before ':' in `{s}`")
            }
            ElementRangeParseError::MalformedMin(e) => {
                write!(f, "Failed to parse element range minimum {e}")
            }
            ElementRangeParseError::MalformedMax(e) => {
                write!(f, "Failed to parse element range maximum {e}")
            }
        }
    }
}

impl Error for ElementRangeParseError {}

impl FromStr for ArgElementRange {
    type Err = ElementRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, range) = match s.split_once(':') {
            Some((symbol, range)) if !symbol.trim().is_empty() => (symbol.trim(), range.trim()),
            _ => return Err(ElementRangeParseError::MissingSymbol(s.to_string())),
        };
        let (min, max) = match range.split_once('-') {
            Some((min, max)) => (
                min.trim()
                    .parse()
                    .map_err(ElementRangeParseError::MalformedMin)?,
                max.trim()
                    .parse()
                    .map_err(ElementRangeParseError::MalformedMax)?,
            ),
            None => (
                0,
                range.parse().map_err(ElementRangeParseError::MalformedMax)?,
            ),
        };
        Ok(Self {
            symbol: symbol.to_string(),
            min,
            max,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_element_range() {
        let r: ArgElementRange = "C:1-50".parse().unwrap();
        assert_eq!(r.symbol, "C");
        assert_eq!((r.min, r.max), (1, 50));
        assert_eq!(r.to_string(), "C:1-50");

        let r: ArgElementRange = "Cl:2".parse().unwrap();
        assert_eq!((r.min, r.max), (0, 2));

        assert!(matches!(
            "5-10".parse::<ArgElementRange>(),
            Err(ElementRangeParseError::MissingSymbol(_))
        ));
        assert!(matches!(
            "N:a-3".parse::<ArgElementRange>(),
            Err(ElementRangeParseError::MalformedMin(_))
        ));
        assert!(matches!(
            "N:1-b".parse::<ArgElementRange>(),
            Err(ElementRangeParseError::MalformedMax(_))
        ));
    }
}
