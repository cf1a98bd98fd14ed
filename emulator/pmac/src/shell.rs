// Licensed under the Apache-2.0 license

//! A Power PMAC login shell behind a dumb pty, with `gpascii -2` as the only
//! program it knows.

use crate::responder::{Response, Responder, VariableStore};
use log::debug;
use pmac_common::mailbox::{TERM_ACK, TERM_BELL};
use pmac_common::ShellChannel;
use std::collections::VecDeque;
use std::io;

const BANNER: &str = "Power PMAC emulator\r\n";
const GPASCII_BANNER: &str = "STDIN Open for ASCII Input\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shell,
    Gpascii,
}

pub struct EmulatedShell {
    output: VecDeque<u8>,
    line: Vec<u8>,
    mode: Mode,
    prompt: String,
    responder: Box<dyn Responder>,
    echo_limit: Option<usize>,
}

impl Default for EmulatedShell {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedShell {
    pub fn new() -> Self {
        Self::with_responder(Box::new(VariableStore::new()))
    }

    pub fn with_responder(responder: Box<dyn Responder>) -> Self {
        let mut shell = Self {
            output: VecDeque::new(),
            line: Vec::new(),
            mode: Mode::Shell,
            prompt: "$ ".into(),
            responder,
            echo_limit: None,
        };
        shell.emit(BANNER.as_bytes());
        let prompt = shell.prompt.clone();
        shell.emit(prompt.as_bytes());
        shell
    }

    /// Echo at most `limit` bytes of each write, to model a lossy link.
    pub fn truncate_echo(mut self, limit: usize) -> Self {
        self.echo_limit = Some(limit);
        self
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    fn run_line(&mut self, line: &str) {
        match self.mode {
            Mode::Shell => {
                if let Some(prompt) = line.strip_prefix("PS1=") {
                    self.prompt = prompt.to_string();
                } else if line.starts_with("gpascii") {
                    debug!("emulated shell: starting gpascii");
                    self.mode = Mode::Gpascii;
                    self.emit(GPASCII_BANNER.as_bytes());
                    return;
                } else if !line.is_empty() {
                    let msg = format!("-sh: {}: not found\r\n", line);
                    self.emit(msg.as_bytes());
                }
                let prompt = self.prompt.clone();
                self.emit(prompt.as_bytes());
            }
            Mode::Gpascii => {
                let command = line.trim();
                if command.is_empty() || command == "#" {
                    self.emit(&[TERM_ACK, b'\r', b'\n']);
                    return;
                }
                match self.responder.respond(command) {
                    Response::Lines(lines) => {
                        for l in lines {
                            self.emit(l.as_bytes());
                            self.emit(b"\r\n");
                        }
                    }
                    Response::Error(code) => {
                        let msg = format!("{}ERR{:03}\r\n", TERM_BELL as char, code);
                        self.emit(msg.as_bytes());
                    }
                }
                self.emit(&[TERM_ACK, b'\r', b'\n']);
            }
        }
    }
}

impl ShellChannel for EmulatedShell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.output.len());
        for (dst, src) in buf.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut echo = Vec::with_capacity(buf.len() + 2);
        for &b in buf {
            if b == b'\n' {
                echo.extend_from_slice(b"\r\n");
            } else {
                echo.push(b);
            }
        }
        if let Some(limit) = self.echo_limit {
            echo.truncate(limit);
        }
        self.emit(&echo);

        for &b in buf {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                self.run_line(line.trim_end_matches('\r'));
            } else {
                self.line.push(b);
            }
        }
        Ok(buf.len())
    }
}
