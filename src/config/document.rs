//! Per-camera setup documents.
//!
//! A setup document names a camera and lists the feature commands that
//! bring it into shape, in order:
//!
//! ```toml
//! serial = "18295345"
//! init = [
//!     { UserSetSelector = { value = "Sim.UserSetSelector_Default" } },
//!     { UserSetLoad = {} },
//!     { "TLStream.StreamBufferCountMode" = { value = "Sim.StreamBufferCountMode_Manual" } },
//!     { ExposureTime = { value = 10000.0, access = "RW" } },
//! ]
//! ```
//!
//! An entry with a `value` writes it (checked against `RW` unless
//! `access` says otherwise); an entry without one executes the feature
//! as a command (checked against `WO`). A bare string entry is shorthand
//! for an execute.

use crate::device::{AccessMode, FeatureValue, Method};
use crate::session::SessionError;
use std::path::Path;

/// What a [`FeatureCommand`] does to its feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureAction {
    /// Write the argument.
    SetValue,
    /// Run the feature as a command.
    Execute,
}

impl FeatureAction {
    /// Gateway method for this action.
    pub fn method(self) -> Method {
        match self {
            Self::SetValue => Method::SetValue,
            Self::Execute => Method::Execute,
        }
    }

    /// Access mode required unless the document overrides it.
    pub fn default_access(self) -> AccessMode {
        match self {
            Self::SetValue => AccessMode::ReadWrite,
            Self::Execute => AccessMode::WriteOnly,
        }
    }
}

/// One step of a setup document.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCommand {
    /// Dotted feature path.
    pub path: String,
    /// Write or execute.
    pub action: FeatureAction,
    /// Value to write; `None` for executes.
    pub argument: Option<FeatureValue>,
    /// Access mode the feature must report.
    pub access: AccessMode,
}

/// A parsed setup document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupDocument {
    /// Camera the document is meant for.
    pub serial: Option<String>,
    /// Commands to apply after initialization.
    pub init: Vec<FeatureCommand>,
}

impl SetupDocument {
    /// Reads and parses a TOML setup document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SessionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse().map_err(|e| match e {
            SessionError::MalformedConfig(msg) => {
                SessionError::MalformedConfig(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Interprets an already parsed TOML table.
    pub fn from_table(table: &toml::Table) -> Result<Self, SessionError> {
        let serial = match table.get("serial") {
            None => None,
            Some(toml::Value::String(serial)) => Some(serial.clone()),
            // Numeric serials are common when documents are written by hand
            Some(toml::Value::Integer(serial)) => Some(serial.to_string()),
            Some(other) => {
                return Err(SessionError::MalformedConfig(format!(
                    "serial must be a string or an integer, got {}",
                    other.type_str()
                )))
            }
        };

        let init = match table.get("init") {
            None => Vec::new(),
            Some(toml::Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(i, entry)| parse_entry(i, entry))
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(SessionError::MalformedConfig(format!(
                    "init must be an array, got {}",
                    other.type_str()
                )))
            }
        };

        Ok(Self { serial, init })
    }
}

impl std::str::FromStr for SetupDocument {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table: toml::Table = s
            .parse()
            .map_err(|e: toml::de::Error| SessionError::MalformedConfig(e.message().to_owned()))?;
        Self::from_table(&table)
    }
}

fn parse_entry(index: usize, entry: &toml::Value) -> Result<FeatureCommand, SessionError> {
    let malformed = |msg: String| SessionError::MalformedConfig(format!("init entry {index}: {msg}"));

    let (path, body) = match entry {
        toml::Value::String(path) => (path.as_str(), None),
        toml::Value::Table(table) => {
            let mut keys = table.iter();
            match (keys.next(), keys.next()) {
                (Some((path, body)), None) => (path.as_str(), Some(body)),
                (None, _) => return Err(malformed("names no feature".to_owned())),
                (Some(_), Some(_)) => {
                    return Err(malformed(format!(
                        "names {} features, expected exactly one",
                        table.len()
                    )))
                }
            }
        }
        other => {
            return Err(malformed(format!(
                "expected a table or a string, got {}",
                other.type_str()
            )))
        }
    };

    let body = match body {
        None => None,
        Some(toml::Value::Table(body)) => Some(body),
        Some(other) => {
            return Err(malformed(format!(
                "{path} must map to a table, got {}",
                other.type_str()
            )))
        }
    };

    let mut argument = None;
    let mut access = None;
    for (key, value) in body.into_iter().flatten() {
        match key.as_str() {
            "value" => argument = Some(to_feature_value(path, value)?),
            "access" => {
                let code = value
                    .as_str()
                    .ok_or_else(|| malformed(format!("{path}: access must be a string")))?;
                access = Some(
                    code.parse::<AccessMode>()
                        .map_err(|e| malformed(format!("{path}: {e}")))?,
                );
            }
            other => return Err(malformed(format!("{path}: unexpected key {other}"))),
        }
    }

    let action = if argument.is_some() {
        FeatureAction::SetValue
    } else {
        FeatureAction::Execute
    };
    Ok(FeatureCommand {
        path: path.to_owned(),
        action,
        argument,
        access: access.unwrap_or_else(|| action.default_access()),
    })
}

fn to_feature_value(path: &str, value: &toml::Value) -> Result<FeatureValue, SessionError> {
    match value {
        toml::Value::Integer(v) => Ok(FeatureValue::Integer(*v)),
        toml::Value::Float(v) => Ok(FeatureValue::Float(*v)),
        toml::Value::Boolean(v) => Ok(FeatureValue::Boolean(*v)),
        toml::Value::String(v) => Ok(FeatureValue::String(v.clone())),
        other => Err(SessionError::UnsupportedArgument(format!(
            "{path}: {} values are not supported",
            other.type_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_without_value_execute() {
        let doc: SetupDocument = r#"
            serial = 18295345
            init = [
                { UserSetSelector = { value = "Sim.UserSetSelector_Default" } },
                { UserSetLoad = {} },
                "TimestampLatch",
                { Gain = { value = 3.5, access = "rw" } },
                { "TLStream.StreamBufferCountManual" = { value = 10 } },
            ]
        "#
        .parse()
        .unwrap();

        assert_eq!(doc.serial.as_deref(), Some("18295345"));
        let summary: Vec<_> = doc
            .init
            .iter()
            .map(|c| (c.path.as_str(), c.action, c.access))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("UserSetSelector", FeatureAction::SetValue, AccessMode::ReadWrite),
                ("UserSetLoad", FeatureAction::Execute, AccessMode::WriteOnly),
                ("TimestampLatch", FeatureAction::Execute, AccessMode::WriteOnly),
                ("Gain", FeatureAction::SetValue, AccessMode::ReadWrite),
                (
                    "TLStream.StreamBufferCountManual",
                    FeatureAction::SetValue,
                    AccessMode::ReadWrite
                ),
            ]
        );
        assert_eq!(doc.init[3].argument, Some(FeatureValue::Float(3.5)));
    }

    #[test]
    fn test_access_override() {
        let doc: SetupDocument = r#"init = [{ TimestampLatchValue = { value = 1, access = "RO" } }]"#
            .parse()
            .unwrap();
        assert_eq!(doc.init[0].access, AccessMode::ReadOnly);
        assert!(doc.serial.is_none());
    }

    #[test]
    fn test_two_keys_in_entry_is_malformed() {
        let err = r#"init = [{ Gain = { value = 1.0 }, ExposureTime = { value = 5.0 } }]"#
            .parse::<SetupDocument>()
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedConfig(_)));
    }

    #[test]
    fn test_unknown_key_is_malformed() {
        let err = r#"init = [{ Gain = { value = 1.0, unit = "dB" } }]"#
            .parse::<SetupDocument>()
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedConfig(ref m) if m.contains("unit")));
    }

    #[test]
    fn test_bad_shapes_are_malformed() {
        for text in [
            r#"init = "UserSetLoad""#,
            r#"init = [{ Gain = 1.0 }]"#,
            r#"init = [42]"#,
            r#"serial = 1.5"#,
            r#"init = [{ Gain = { value = 1.0, access = "XX" } }]"#,
            "not toml at all = = =",
        ] {
            assert!(
                matches!(text.parse::<SetupDocument>(), Err(SessionError::MalformedConfig(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_array_value_unsupported() {
        let err = r#"init = [{ Gain = { value = [1, 2] } }]"#
            .parse::<SetupDocument>()
            .unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedArgument(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = SetupDocument::from_file("/nonexistent/setup.toml").unwrap_err();
        assert!(matches!(err, SessionError::ConfigRead { .. }));
    }
}
