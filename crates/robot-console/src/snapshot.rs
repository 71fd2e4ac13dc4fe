//! Controller state document parsing.
//!
//! A `getEstado` reply is an XML-RPC struct: repeated `<member>` elements,
//! each with a `<name>` and a `<value>`. The members are flattened into a
//! name/value map and folded into a [`Snapshot`]; absent members take their
//! documented defaults. A document that is not well-formed XML, or carries
//! a coordinate that is not a number, yields no snapshot at all.

#![allow(missing_docs)]

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::ConsoleError;
use crate::state::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Absolute,
    Relative,
}

impl PositionMode {
    /// `ABS` (or an empty value) is absolute; anything else is relative.
    #[must_use]
    pub fn from_wire(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("ABS") {
            Self::Absolute
        } else {
            Self::Relative
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absolute => "ABS",
            Self::Relative => "REL",
        }
    }
}

impl fmt::Display for PositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time authoritative reading from the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Position,
    pub mode: PositionMode,
    pub motors: bool,
    pub gripper: bool,
    pub emergency: bool,
    pub remote: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            position: Position::default(),
            mode: PositionMode::Absolute,
            motors: false,
            gripper: false,
            emergency: false,
            remote: false,
        }
    }
}

/// Flatten every `<member>` into `name -> value` (later duplicates win).
pub fn parse_members(xml: &str) -> Result<IndexMap<SmolStr, SmolStr>, ConsoleError> {
    let document =
        roxmltree::Document::parse(xml).map_err(|err| ConsoleError::Parse(err.to_string().into()))?;
    let mut members = IndexMap::new();
    for member in document
        .descendants()
        .filter(|node| is_element_named(*node, "member"))
    {
        let name = member
            .descendants()
            .find(|node| is_element_named(*node, "name"))
            .map(text_content);
        let value = member
            .descendants()
            .find(|node| is_element_named(*node, "value"))
            .map(text_content);
        if let (Some(name), Some(value)) = (name, value) {
            members.insert(name, value);
        }
    }
    Ok(members)
}

/// Parse a state poll reply into a [`Snapshot`].
pub fn parse_state_document(xml: &str) -> Result<Snapshot, ConsoleError> {
    let members = parse_members(xml)?;
    let field = |name: &str| members.get(name).map(SmolStr::as_str);
    let coordinate = |name: &str| -> Result<f64, ConsoleError> {
        match field(name) {
            None => Ok(0.0),
            Some(text) => text.parse::<f64>().map_err(|_| {
                ConsoleError::Parse(format!("coordinate {name}='{text}' is not a number").into())
            }),
        }
    };
    let switch = |name: &str| field(name).is_some_and(|text| text.eq_ignore_ascii_case("ON"));

    Ok(Snapshot {
        position: Position::new(coordinate("x")?, coordinate("y")?, coordinate("z")?),
        mode: field("modo").map_or(PositionMode::Absolute, PositionMode::from_wire),
        motors: switch("motores"),
        gripper: switch("garra"),
        emergency: field("emergencia").is_some_and(is_tripped_flag),
        remote: switch("remoto"),
    })
}

// The controller reports `SI`; `YES` is accepted as well.
fn is_tripped_flag(text: &str) -> bool {
    text.eq_ignore_ascii_case("SI") || text.eq_ignore_ascii_case("YES")
}

fn is_element_named(node: roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn text_content(node: roxmltree::Node<'_, '_>) -> SmolStr {
    let text = node
        .descendants()
        .filter(|entry| entry.is_text())
        .filter_map(|entry| entry.text())
        .collect::<String>();
    SmolStr::new(text.trim())
}
