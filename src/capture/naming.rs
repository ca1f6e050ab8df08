//! File name templates for captured frames.
//!
//! A template is free text with placeholders in braces. Each placeholder
//! expands to a tagged value, e.g. `{serial}` becomes `SERIAL_18295345`,
//! so names stay self-describing whatever order the fields are in.

use chrono::{DateTime, TimeZone};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = "{serial}_{datetime}_{cam}_{frameid}_{counter}";

/// Error returned for malformed templates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseNameTemplateError {
    #[error("unknown placeholder {{{0}}} (expected serial, datetime, cam, frameid or counter)")]
    UnknownField(String),
    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),
    #[error("unmatched '}}' at byte {0}")]
    Unmatched(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Serial,
    Datetime,
    Cam,
    FrameId,
    Counter,
}

impl FromStr for Field {
    type Err = ParseNameTemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(Self::Serial),
            "datetime" => Ok(Self::Datetime),
            "cam" => Ok(Self::Cam),
            "frameid" => Ok(Self::FrameId),
            "counter" => Ok(Self::Counter),
            other => Err(ParseNameTemplateError::UnknownField(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Values substituted into a [`NameTemplate`].
#[derive(Debug, Clone)]
pub struct NameFields<'a, Tz: TimeZone> {
    /// Camera serial.
    pub serial: &'a str,
    /// Capture time of the frame.
    pub datetime: DateTime<Tz>,
    /// One-based camera position in the capture request.
    pub cam: usize,
    /// Device frame id.
    pub frame_id: u64,
    /// Per-image counter.
    pub counter: u64,
}

/// A parsed file name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    segments: Vec<Segment>,
}

impl NameTemplate {
    /// Renders the template for one frame.
    pub fn render<Tz>(&self, fields: &NameFields<'_, Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Serial) => {
                    out.push_str("SERIAL_");
                    out.push_str(fields.serial);
                }
                Segment::Field(Field::Datetime) => {
                    out.push_str("DATETIME_");
                    out.push_str(&datetime_token(&fields.datetime));
                }
                Segment::Field(Field::Cam) => out.push_str(&format!("CAM_{}", fields.cam)),
                Segment::Field(Field::FrameId) => {
                    out.push_str(&format!("FRAMEID_{}", fields.frame_id));
                }
                Segment::Field(Field::Counter) => {
                    out.push_str(&format!("COUNTER_{}", fields.counter));
                }
            }
        }
        out
    }
}

impl Default for NameTemplate {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Field(Field::Serial),
                Segment::Literal("_".to_owned()),
                Segment::Field(Field::Datetime),
                Segment::Literal("_".to_owned()),
                Segment::Field(Field::Cam),
                Segment::Literal("_".to_owned()),
                Segment::Field(Field::FrameId),
                Segment::Literal("_".to_owned()),
                Segment::Field(Field::Counter),
            ],
        }
    }
}

/// `2024-03-01 14:05:09.123456` with separators made file-name safe.
fn datetime_token<Tz>(datetime: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    datetime
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
        .replace(['.', ' ', '_'], "-")
}

impl FromStr for NameTemplate {
    type Err = ParseNameTemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = s.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let rest = &s[pos + 1..];
                    let end = rest.find('}').ok_or(ParseNameTemplateError::Unclosed(pos))?;
                    let field: Field = rest[..end].parse()?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                    // Skip the field name and the closing brace
                    for _ in 0..=rest[..end].chars().count() {
                        chars.next();
                    }
                }
                '}' => return Err(ParseNameTemplateError::Unmatched(pos)),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(&text.replace('{', "{{").replace('}', "}}"))?,
                Segment::Field(field) => {
                    let name = match field {
                        Field::Serial => "serial",
                        Field::Datetime => "datetime",
                        Field::Cam => "cam",
                        Field::FrameId => "frameid",
                        Field::Counter => "counter",
                    };
                    write!(f, "{{{name}}}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fields() -> NameFields<'static, Utc> {
        NameFields {
            serial: "18295345",
            datetime: Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap()
                + chrono::Duration::microseconds(123_456),
            cam: 2,
            frame_id: 4,
            counter: 11,
        }
    }

    #[test]
    fn test_default_template_rendering() {
        let template: NameTemplate = DEFAULT_TEMPLATE.parse().unwrap();
        assert_eq!(template, NameTemplate::default());
        assert_eq!(
            template.render(&fields()),
            "SERIAL_18295345_DATETIME_2024-03-01-14:05:09-123456_CAM_2_FRAMEID_4_COUNTER_11"
        );
    }

    #[test]
    fn test_literals_and_escapes() {
        let template: NameTemplate = "run{{1}}/{cam}.raw".parse().unwrap();
        assert_eq!(template.render(&fields()), "run{1}/CAM_2.raw");
        assert_eq!(template.to_string(), "run{{1}}/{cam}.raw");
    }

    #[test]
    fn test_rejects_bad_templates() {
        assert_eq!(
            "{serial}_{exposure}".parse::<NameTemplate>(),
            Err(ParseNameTemplateError::UnknownField("exposure".to_owned()))
        );
        assert_eq!(
            "{serial".parse::<NameTemplate>(),
            Err(ParseNameTemplateError::Unclosed(0))
        );
        assert_eq!(
            "a}b".parse::<NameTemplate>(),
            Err(ParseNameTemplateError::Unmatched(1))
        );
    }
}
