// Licensed under the Apache-2.0 license

use std::collections::HashMap;

/// What the controller answers to one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Zero or more output lines, followed by an acknowledge.
    Lines(Vec<String>),
    /// An `ERRnnn` error.
    Error(u16),
}

/// Data error or unrecognized command.
pub const ERR_SYNTAX: u16 = 3;

/// The command interpreter behind every emulated ASCII interface.
pub trait Responder: Send {
    fn respond(&mut self, command: &str) -> Response;
}

/// Interprets I, P, Q and M variable queries (`P1`) and assignments
/// (`P1=2.5`). Several may share a line, separated by spaces; each query
/// produces one output line.
#[derive(Debug, Default, Clone)]
pub struct VariableStore {
    vars: HashMap<(char, u32), f64>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: char, number: u32) -> f64 {
        self.vars.get(&(kind, number)).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, kind: char, number: u32, value: f64) {
        self.vars.insert((kind, number), value);
    }

    fn parse_name(token: &str) -> Option<(char, u32)> {
        let mut chars = token.chars();
        let kind = chars.next()?.to_ascii_uppercase();
        if !matches!(kind, 'I' | 'P' | 'Q' | 'M') {
            return None;
        }
        let number = chars.as_str();
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((kind, number.parse().ok()?))
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Responder for VariableStore {
    fn respond(&mut self, command: &str) -> Response {
        let mut lines = Vec::new();
        let mut updates = Vec::new();
        for token in command.split_whitespace() {
            match token.split_once('=') {
                Some((name, value)) => {
                    let Some(var) = Self::parse_name(name) else {
                        return Response::Error(ERR_SYNTAX);
                    };
                    let Ok(value) = value.parse::<f64>() else {
                        return Response::Error(ERR_SYNTAX);
                    };
                    updates.push((var, value));
                }
                None => {
                    let Some((kind, number)) = Self::parse_name(token) else {
                        return Response::Error(ERR_SYNTAX);
                    };
                    let pending = updates
                        .iter()
                        .rev()
                        .find(|(var, _)| *var == (kind, number))
                        .map(|(_, v)| *v);
                    lines.push(format_value(pending.unwrap_or_else(|| self.get(kind, number))));
                }
            }
        }
        for ((kind, number), value) in updates {
            self.set(kind, number, value);
        }
        Response::Lines(lines)
    }
}
