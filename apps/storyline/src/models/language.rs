use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages a story or a tag label can be written in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    He,
    Ru,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::He, Language::Ru];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::He => "he",
            Language::Ru => "ru",
        }
    }

    /// Hebrew is the only right-to-left language we publish in.
    pub fn is_rtl(&self) -> bool {
        matches!(self, Language::He)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "he" => Ok(Language::He),
            "ru" => Ok(Language::Ru),
            other => Err(format!("unsupported language '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("HE".parse::<Language>().unwrap(), Language::He);
        assert_eq!(" ru ".parse::<Language>().unwrap(), Language::Ru);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Language::En).unwrap(), "\"en\"");
        let langs: Vec<Language> = serde_json::from_str("[\"he\",\"ru\"]").unwrap();
        assert_eq!(langs, vec![Language::He, Language::Ru]);
    }
}
