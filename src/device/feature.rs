//! Typed feature tree exposed by a camera binding.
//!
//! Camera SDKs present their registers as a tree of named nodes
//! (categories, values, enumerations, commands). Commands address a
//! node by a dotted path such as `TLStream.StreamBufferCountMode`; the
//! path is resolved by walking the tree one segment at a time.

use super::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access mode reported by a feature node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Not implemented by this device.
    NotImplemented,
    /// Implemented but currently unavailable (e.g. device not initialized).
    NotAvailable,
    /// Write only.
    WriteOnly,
    /// Read only.
    ReadOnly,
    /// Read and write.
    ReadWrite,
}

impl AccessMode {
    /// Short code used in configuration documents (`RO`, `WO`, `RW`, ...).
    pub fn code(self) -> &'static str {
        match self {
            Self::NotImplemented => "NI",
            Self::NotAvailable => "NA",
            Self::WriteOnly => "WO",
            Self::ReadOnly => "RO",
            Self::ReadWrite => "RW",
        }
    }

    /// Returns true if values can be read in this mode.
    pub fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Returns true if values can be written (or commands executed).
    pub fn is_writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when an access mode code cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown access mode: {0} (expected one of NI, NA, WO, RO, RW)")]
pub struct ParseAccessModeError(pub String);

impl FromStr for AccessMode {
    type Err = ParseAccessModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NI" => Ok(Self::NotImplemented),
            "NA" => Ok(Self::NotAvailable),
            "WO" => Ok(Self::WriteOnly),
            "RO" => Ok(Self::ReadOnly),
            "RW" => Ok(Self::ReadWrite),
            _ => Err(ParseAccessModeError(s.to_owned())),
        }
    }
}

/// A value read from or written to a feature node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    /// Integer register.
    Integer(i64),
    /// Floating point register.
    Float(f64),
    /// Boolean register.
    Boolean(bool),
    /// Free-form string.
    String(String),
    /// Symbolic enumeration entry (already resolved).
    Enumeration(String),
}

impl FeatureValue {
    /// Parses a command-line literal: integer, float, boolean, or string.
    pub fn parse_literal(text: &str) -> Self {
        if let Ok(value) = text.parse::<i64>() {
            Self::Integer(value)
        } else if let Ok(value) = text.parse::<f64>() {
            Self::Float(value)
        } else if let Ok(value) = text.parse::<bool>() {
            Self::Boolean(value)
        } else {
            Self::String(text.to_owned())
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Enumeration(_) => "enumeration",
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::String(value) | Self::Enumeration(value) => f.write_str(value),
        }
    }
}

/// Operation invoked on a feature node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read the current value.
    GetValue,
    /// Write a new value.
    SetValue,
    /// Run a command node.
    Execute,
}

impl Method {
    /// SDK-style method name.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetValue => "GetValue",
            Self::SetValue => "SetValue",
            Self::Execute => "Execute",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a method name is not one of the supported methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported method: {0} (expected GetValue, SetValue or Execute)")]
pub struct ParseMethodError(pub String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "GetValue" => Ok(Self::GetValue),
            "SetValue" => Ok(Self::SetValue),
            "Execute" => Ok(Self::Execute),
            _ => Err(ParseMethodError(s.to_owned())),
        }
    }
}

/// A node in a camera's feature tree.
///
/// Category nodes only have children; leaf nodes implement the
/// value/command operations. Operations that a node does not support
/// return [`DeviceError::Unsupported`].
pub trait Feature: Send {
    /// Node name (one segment of a dotted path).
    fn name(&self) -> &str;

    /// Current access mode. May change with device state.
    fn access_mode(&self) -> AccessMode;

    /// Looks up a direct child by name.
    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Feature>;

    /// Reads the node's value.
    fn get_value(&self) -> Result<FeatureValue, DeviceError>;

    /// Writes the node's value.
    fn set_value(&mut self, value: FeatureValue) -> Result<(), DeviceError>;

    /// Runs a command node.
    fn execute(&mut self) -> Result<(), DeviceError>;
}

/// Resolves a dotted feature path starting at `root`.
///
/// Returns `None` when any segment is missing (including empty
/// segments such as in `"a..b"`).
pub fn resolve<'a>(root: &'a mut dyn Feature, path: &str) -> Option<&'a mut dyn Feature> {
    let segments: Vec<&str> = path.split('.').collect();
    walk(root, &segments)
}

fn walk<'a>(node: &'a mut dyn Feature, segments: &[&str]) -> Option<&'a mut dyn Feature> {
    match segments.split_first() {
        None => Some(node),
        Some((head, rest)) => walk(node.child_mut(head)?, rest),
    }
}
