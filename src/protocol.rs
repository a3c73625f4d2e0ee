use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::events::RawEvent;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid utf-8")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no string `type` tag")]
    MissingType,
    #[error("`{kind}` payload has an unexpected shape: {source}")]
    Shape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn parse_event(text: &str) -> Result<RawEvent, ParseError> {
    parse_value(serde_json::from_str(text)?)
}

/// Same as [`parse_event`] for payloads that arrive already decoded.
pub fn parse_value(value: Value) -> Result<RawEvent, ParseError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingType)?
        .to_owned();

    let event = match kind.as_str() {
        "state" | "player_update" => RawEvent::State(payload(&kind, value)?),
        "xp_gain" => RawEvent::XpGain(payload(&kind, value)?),
        "level_up" => RawEvent::LevelUp(payload(&kind, value)?),
        "zombie_kill" => RawEvent::ZombieKill(payload(&kind, value)?),
        "attack" | "hit" => RawEvent::Attack(payload(&kind, value)?),
        "pickup" => RawEvent::Pickup(payload(&kind, value)?),
        "equip" => RawEvent::Equip(payload(&kind, value)?),
        "sprite_sheet_updated" => RawEvent::SpriteSheetUpdated(payload(&kind, value)?),
        _ => RawEvent::Unknown { kind },
    };
    Ok(event)
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ParseError> {
    serde_json::from_value(value).map_err(|source| ParseError::Shape {
        kind: kind.to_owned(),
        source,
    })
}

/// Splits a frame carrying newline-delimited JSON into per-line parse results.
pub fn parse_frame(text: &str) -> Vec<Result<RawEvent, ParseError>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_event)
        .collect()
}

pub fn parse_binary_frame(bytes: Vec<u8>) -> Vec<Result<RawEvent, ParseError>> {
    match String::from_utf8(bytes) {
        Ok(text) => parse_frame(&text),
        Err(err) => vec![Err(ParseError::Encoding(err))],
    }
}
