use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UiMode {
    #[default]
    Basic,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocsLocation {
    #[default]
    Local,
    Remote,
}

/// Per-identity preferences. Always written whole; there is no field merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub mode: UiMode,
    #[serde(default)]
    pub canary_mode: bool,
    #[serde(default)]
    pub docs_location: DocsLocation,
}

impl UiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiMode::Basic => "BASIC",
            UiMode::Advanced => "ADVANCED",
        }
    }
}

impl DocsLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocsLocation::Local => "LOCAL",
            DocsLocation::Remote => "REMOTE",
        }
    }
}

impl fmt::Display for UiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DocsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UiMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BASIC" => Ok(UiMode::Basic),
            "ADVANCED" => Ok(UiMode::Advanced),
            other => Err(AppError::InvalidArgument(format!("unknown mode: {}", other))),
        }
    }
}

impl FromStr for DocsLocation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(DocsLocation::Local),
            "REMOTE" => Ok(DocsLocation::Remote),
            other => Err(AppError::InvalidArgument(format!(
                "unknown docs location: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = UserSettings::default();
        assert_eq!(settings.mode, UiMode::Basic);
        assert!(!settings.canary_mode);
        assert_eq!(settings.docs_location, DocsLocation::Local);
    }

    #[test]
    fn test_wire_form() {
        let settings = UserSettings {
            mode: UiMode::Advanced,
            canary_mode: true,
            docs_location: DocsLocation::Remote,
        };
        let json = serde_json::to_value(settings).unwrap();
        assert_eq!(json["mode"], "ADVANCED");
        assert_eq!(json["canary_mode"], true);
        assert_eq!(json["docs_location"], "REMOTE");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: UserSettings = serde_json::from_str(r#"{"canary_mode": true}"#).unwrap();
        assert_eq!(
            settings,
            UserSettings {
                canary_mode: true,
                ..UserSettings::default()
            }
        );
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("advanced".parse::<UiMode>().unwrap(), UiMode::Advanced);
        assert_eq!("Remote".parse::<DocsLocation>().unwrap(), DocsLocation::Remote);
        assert!("expert".parse::<UiMode>().is_err());
    }
}
