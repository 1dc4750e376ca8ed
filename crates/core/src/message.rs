//! The message exchanged with a flow under test.
//!
//! A [`Message`] mirrors a NiFi flowfile: a text body plus string
//! attributes. Test input is built by the caller; test output is
//! rebuilt from the scaffold's HTTP response, where the echoed
//! attributes arrive as headers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Attribute names stamped and echoed by the scaffold.
pub mod attributes {
    pub const TEST_INPUT_NAME: &str = "test_input_name";
    pub const TEST_OUTPUT_NAME: &str = "test_output_name";
    pub const TEST_START_TIME: &str = "test_start_time";
    pub const TEST_END_TIME: &str = "test_end_time";
    pub const TEST_DURATION: &str = "test_duration";

    /// Every attribute the egress echoes by default.
    pub const ECHOED: &[&str] = &[
        TEST_INPUT_NAME,
        TEST_OUTPUT_NAME,
        TEST_START_TIME,
        TEST_END_TIME,
        TEST_DURATION,
    ];
}

/// Flowfile content plus attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    content: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl Message {
    pub fn new<I, K, V>(content: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            content: content.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// A message with content and no attributes.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// A copy of this message with one more attribute set.
    pub fn with_attribute(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.attributes.insert(key.into(), value.into());
        next
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn into_parts(self) -> (String, BTreeMap<String, String>) {
        (self.content, self.attributes)
    }

    /// The declared input the scaffold routed this message to.
    pub fn input_name(&self) -> Option<&str> {
        self.attribute(attributes::TEST_INPUT_NAME)
    }

    /// The declared output this message was captured at.
    pub fn output_name(&self) -> Option<&str> {
        self.attribute(attributes::TEST_OUTPUT_NAME)
    }

    /// Parse the scaffold's timing attributes.
    pub fn timings(&self) -> Result<TestTimings, CoreError> {
        let start = self.integer(attributes::TEST_START_TIME)?;
        let end = self.integer(attributes::TEST_END_TIME)?;
        let duration_ms = self.integer(attributes::TEST_DURATION)?;

        let to_ts = |ms: i64| {
            chrono::DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| CoreError::Validation(format!("timestamp {ms} out of range")))
        };

        Ok(TestTimings {
            start_ms: start,
            end_ms: end,
            duration_ms,
            started_at: to_ts(start)?,
            ended_at: to_ts(end)?,
        })
    }

    fn integer(&self, name: &'static str) -> Result<i64, CoreError> {
        let raw = self
            .attribute(name)
            .ok_or(CoreError::MissingAttribute(name))?;
        raw.trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} is not an integer: {raw:?}")))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{content: {:?}, attributes: {:?}}}", self.content, self.attributes)
    }
}

/// Start/end stamps recorded by the scaffold, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestTimings {
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
}

impl TestTimings {
    /// `duration == end - start` and the duration is non-negative.
    pub fn is_consistent(&self) -> bool {
        self.duration_ms >= 0 && self.duration_ms == self.end_ms - self.start_ms
    }
}
