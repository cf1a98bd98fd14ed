// Licensed under the Apache-2.0 license

//! How a response is cut up for the two host interfaces.

use crate::responder::Response;
use pmac_common::consts::dpram::ASCII_IN_LEN;
use pmac_common::mailbox::{MBX_REGS, TERM_ACK, TERM_BELL, TERM_CR};

pub type MailboxFrame = [u8; MBX_REGS];

fn frame(bytes: &[u8]) -> MailboxFrame {
    let mut f = [0u8; MBX_REGS];
    f[..bytes.len()].copy_from_slice(bytes);
    f
}

/// Register images the mailbox presents, one per readme. Each line ends in
/// CR and may span several frames; an ACK frame closes the reply. Errors are
/// a single `BELL ERRnnn CR` frame.
pub fn mailbox_frames(response: &Response) -> Vec<MailboxFrame> {
    match response {
        Response::Lines(lines) => {
            let mut frames = Vec::new();
            for line in lines {
                let mut data = line.as_bytes().to_vec();
                data.push(TERM_CR);
                frames.extend(data.chunks(MBX_REGS).map(frame));
            }
            frames.push(frame(&[TERM_ACK]));
            frames
        }
        Response::Error(code) => {
            let text = format!("{}ERR{:03}{}", TERM_BELL as char, code, TERM_CR as char);
            vec![frame(text.as_bytes())]
        }
    }
}

/// One DPRAM ASCII readme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsciiFrame {
    Line(Vec<u8>),
    Ack,
    Error(u16),
}

pub fn ascii_frames(response: &Response) -> Vec<AsciiFrame> {
    match response {
        Response::Lines(lines) => lines
            .iter()
            .map(|l| {
                let mut bytes = l.as_bytes().to_vec();
                bytes.truncate(ASCII_IN_LEN - 1);
                AsciiFrame::Line(bytes)
            })
            .chain(std::iter::once(AsciiFrame::Ack))
            .collect(),
        Response::Error(code) => vec![AsciiFrame::Error(*code)],
    }
}

/// ASCII input control word for an error: the high byte flags the error and
/// carries the hundreds digit, the low byte the other two digits in BCD.
pub fn error_control(code: u16) -> u16 {
    let hundreds = (code / 100) % 10;
    let bcd = ((code / 10) % 10) << 4 | (code % 10);
    ((0x80 | hundreds) << 8) | bcd
}
