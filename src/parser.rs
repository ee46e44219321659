//! Line parser for the transition table text format, built on `pest`.
//! Tables are parsed one line at a time so the loader can report a bad
//! line and carry on with the rest of the file.

use crate::types::{Direction, MachineError, Transition};
use pest::iterators::Pair;
use pest::Parser as PestParser;
use pest_derive::Parser as PestParser;

/// Derives a `PestParser` for the line grammar defined in `grammar.pest`.
#[derive(PestParser)]
#[grammar = "grammar.pest"]
pub struct TableParser;

/// A classified source line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Whitespace only. Blank lines break comment anchoring.
    Blank,
    /// A `#` comment, kept verbatim including the marker.
    Comment(String),
    /// A `#!` directive.
    Directive(Directive),
    /// A five-field transition line.
    Transition {
        state: String,
        symbol: char,
        transition: Transition,
    },
}

/// The directives a table file may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `#! start <state>` names the start state.
    Start(String),
    /// `#! fill <symbol>` changes the fill symbol for subsequent writes.
    Fill(char),
    /// `#! write [offset[<]] <symbols>` seeds the tape. A `<` suffix on the
    /// offset right-aligns the symbols so the last one lands at the offset.
    Write {
        offset: i64,
        right_aligned: bool,
        symbols: String,
    },
    /// `#! delete <state> <symbol>` removes an entry from the table.
    Delete { state: String, symbol: char },
}

/// Parses a single source line. Trailing carriage returns are tolerated so
/// files with Windows line endings load cleanly.
pub fn parse_line(input: &str) -> Result<Line, MachineError> {
    let text = input.trim_end_matches(['\r', '\n']);
    let mut pairs = TableParser::parse(Rule::line, text)
        .map_err(|e| MachineError::Parse(Box::new(e)))?;
    let line = pairs.next().unwrap();

    for part in line.into_inner() {
        match part.as_rule() {
            Rule::comment => return Ok(Line::Comment(part.as_str().to_string())),
            Rule::directive => return classify_directive(part),
            Rule::transition => return parse_transition(part),
            _ => {}
        }
    }
    Ok(Line::Blank)
}

fn classify_directive(pair: Pair<Rule>) -> Result<Line, MachineError> {
    let tokens: Vec<&str> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::token)
        .map(|p| p.as_str())
        .collect();

    let directive = match tokens.as_slice() {
        ["start", state] => Directive::Start(state.to_string()),
        ["fill", symbol] => Directive::Fill(single_char(symbol, "fill")?),
        ["write", symbols] => Directive::Write {
            offset: 0,
            right_aligned: false,
            symbols: symbols.to_string(),
        },
        ["write", offset, symbols] => {
            let (digits, right_aligned) = match offset.strip_suffix('<') {
                Some(digits) => (digits, true),
                None => (*offset, false),
            };
            let offset = digits.parse::<i64>().map_err(|_| {
                MachineError::Malformed(format!("write directive has a bad offset '{}'", digits))
            })?;
            Directive::Write {
                offset,
                right_aligned,
                symbols: symbols.to_string(),
            }
        }
        ["delete", state, symbol] => Directive::Delete {
            state: state.to_string(),
            symbol: single_char(symbol, "delete")?,
        },
        [] => {
            return Err(MachineError::Malformed("empty directive".to_string()));
        }
        [name, ..] => {
            return Err(MachineError::Malformed(format!(
                "unknown or malformed directive '{}'",
                name
            )));
        }
    };
    Ok(Line::Directive(directive))
}

fn single_char(token: &str, directive: &str) -> Result<char, MachineError> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(MachineError::Malformed(format!(
            "{} directive expects a single symbol, got '{}'",
            directive, token
        ))),
    }
}

fn parse_transition(pair: Pair<Rule>) -> Result<Line, MachineError> {
    let mut inner = pair.into_inner();
    let state = inner.next().unwrap().as_str().to_string();
    let symbol = inner.next().unwrap().as_str().chars().next().unwrap();
    let write = inner.next().unwrap().as_str().chars().next().unwrap();
    let direction = match inner.next().unwrap().as_str() {
        "l" | "L" | "<" => Direction::Left,
        _ => Direction::Right,
    };
    let next = inner.next().unwrap().as_str().to_string();

    Ok(Line::Transition {
        state,
        symbol,
        transition: Transition::new(write, direction, next),
    })
}
