use std::time::Duration;

use jiff::{Span, SpanRelativeTo};
use serde::{Deserialize, Deserializer};

use crate::error::Error;

/// Parse a duration like `3s`, `1m 30s` or `PT10S`.
pub fn parse_duration(value: &str) -> Result<Duration, Error> {
    let span: Span = value
        .parse()
        .map_err::<Error, _>(|e| format!("unable to parse {value} as duration: {e}").into())?;
    let signed = span
        .to_duration(SpanRelativeTo::days_are_24_hours())
        .map_err::<Error, _>(|e| format!("unable to convert duration: {e}").into())?;
    Duration::try_from(signed).map_err(|e| format!("unable to convert duration: {e}").into())
}

/// Deserialize a duration from the notation accepted by [`parse_duration`].
pub fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(d)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}
