//! Action string grammar:
//!
//! ```text
//! action := "MOVE " dir | "PAINT " color [" " int " " int] | "SPEAK " text | "WAIT" | "SKIP"
//! dir    := "N" | "S" | "E" | "W"
//! color  := "#" HEX{6}
//! ```
//!
//! Keyword resolution is split from parameter parsing so the scope check can
//! run on the intent before parameters are validated.

use serde_json::{json, Value};

use crate::{Color, Direction, GridPos, Intent};

pub const MAX_SPEAK_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { direction: Direction },
    Paint { color: Color, target: Option<GridPos> },
    Speak { message: String },
    Wait,
    Skip,
}

impl Action {
    /// Resolve only the intent keyword; an unknown keyword is a grammar
    /// failure before scopes are even consulted.
    pub fn intent_of(raw: &str) -> Result<Intent, String> {
        let keyword = raw.trim().split_whitespace().next().unwrap_or("");
        Intent::from_keyword(&keyword.to_ascii_uppercase()).ok_or_else(|| {
            format!("unknown intent '{keyword}'; must be one of MOVE, PAINT, SPEAK, WAIT, SKIP")
        })
    }

    /// Parse the parameter tail for an already-resolved intent.
    pub fn parse_params(intent: Intent, raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let tail = trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or("");

        match intent {
            Intent::Move => {
                let direction = Direction::from_str(&tail.to_ascii_uppercase())
                    .ok_or_else(|| format!("MOVE requires direction N, S, E, or W; got '{tail}'"))?;
                Ok(Self::Move { direction })
            }
            Intent::Paint => {
                if tail.is_empty() {
                    return Err("PAINT requires format 'PAINT #RRGGBB [x y]'".to_string());
                }
                let mut parts = tail.split_whitespace();
                let color = Color::parse(parts.next().unwrap_or(""))?;
                let target = match (parts.next(), parts.next()) {
                    (Some(raw_x), Some(raw_y)) => {
                        let x = raw_x
                            .parse::<u32>()
                            .map_err(|_| format!("PAINT target x must be an integer; got '{raw_x}'"))?;
                        let y = raw_y
                            .parse::<u32>()
                            .map_err(|_| format!("PAINT target y must be an integer; got '{raw_y}'"))?;
                        Some(GridPos::new(x, y))
                    }
                    (Some(raw_x), None) => {
                        return Err(format!("PAINT target needs both x and y; got only '{raw_x}'"))
                    }
                    _ => None,
                };
                if parts.next().is_some() {
                    return Err(format!("PAINT has trailing input: '{tail}'"));
                }
                Ok(Self::Paint { color, target })
            }
            Intent::Speak => {
                if tail.is_empty() {
                    return Err("SPEAK requires a message".to_string());
                }
                if tail.len() > MAX_SPEAK_LEN {
                    return Err(format!(
                        "SPEAK message exceeds {MAX_SPEAK_LEN} bytes ({})",
                        tail.len()
                    ));
                }
                Ok(Self::Speak {
                    message: tail.to_string(),
                })
            }
            Intent::Wait => {
                if tail.is_empty() {
                    Ok(Self::Wait)
                } else {
                    Err(format!("WAIT takes no parameters; got '{tail}'"))
                }
            }
            Intent::Skip => {
                if tail.is_empty() {
                    Ok(Self::Skip)
                } else {
                    Err(format!("SKIP takes no parameters; got '{tail}'"))
                }
            }
        }
    }

    /// Full parse: keyword then parameters.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let intent = Self::intent_of(raw)?;
        Self::parse_params(intent, raw)
    }

    pub fn intent(&self) -> Intent {
        match self {
            Self::Move { .. } => Intent::Move,
            Self::Paint { .. } => Intent::Paint,
            Self::Speak { .. } => Intent::Speak,
            Self::Wait => Intent::Wait,
            Self::Skip => Intent::Skip,
        }
    }

    /// Typed params payload stored in the journal.
    pub fn params_value(&self) -> Value {
        match self {
            Self::Move { direction } => json!({ "direction": direction.as_str() }),
            Self::Paint { color, target } => match target {
                Some(pos) => json!({ "color": color.as_str(), "x": pos.x, "y": pos.y }),
                None => json!({ "color": color.as_str() }),
            },
            Self::Speak { message } => json!({ "message": message }),
            Self::Wait | Self::Skip => json!({}),
        }
    }

    /// Rebuild an action from a journal row's `(intent, params)` pair for
    /// re-validation against the snapshot during MERGE.
    pub fn from_journal(intent: Intent, params: &Value) -> Result<Self, String> {
        match intent {
            Intent::Move => {
                let direction = params
                    .get("direction")
                    .and_then(Value::as_str)
                    .and_then(Direction::from_str)
                    .ok_or_else(|| format!("journal MOVE params missing direction: {params}"))?;
                Ok(Self::Move { direction })
            }
            Intent::Paint => {
                let color = params
                    .get("color")
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("journal PAINT params missing color: {params}"))
                    .and_then(|raw| Color::parse(raw))?;
                let target = match (
                    params.get("x").and_then(Value::as_u64),
                    params.get("y").and_then(Value::as_u64),
                ) {
                    (Some(x), Some(y)) => Some(GridPos::new(x as u32, y as u32)),
                    _ => None,
                };
                Ok(Self::Paint { color, target })
            }
            Intent::Speak => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("journal SPEAK params missing message: {params}"))?;
                Ok(Self::Speak {
                    message: message.to_string(),
                })
            }
            Intent::Wait => Ok(Self::Wait),
            Intent::Skip => Ok(Self::Skip),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move { direction } => write!(f, "MOVE {direction}"),
            Self::Paint {
                color,
                target: Some(pos),
            } => write!(f, "PAINT {color} {} {}", pos.x, pos.y),
            Self::Paint {
                color,
                target: None,
            } => write!(f, "PAINT {color}"),
            Self::Speak { message } => write!(f, "SPEAK {message}"),
            Self::Wait => f.write_str("WAIT"),
            Self::Skip => f.write_str("SKIP"),
        }
    }
}
