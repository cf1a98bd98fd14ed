// Licensed under the Apache-2.0 license

//! Decoding of the `ERRnnn` codes a PMAC returns in a BELL error block.

use pmac_common::mailbox::TERM_BELL;

pub const BAD_ERROR_STRING: &str = "Not a valid PMAC error string";
pub const BAD_ERROR_NUMBER: &str = "Not a valid PMAC error number";

/// One documented controller error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmacError {
    pub code: u16,
    pub description: &'static str,
    /// Corrective action from the controller manual.
    pub remedy: &'static str,
}

const fn e(code: u16, description: &'static str, remedy: &'static str) -> PmacError {
    PmacError {
        code,
        description,
        remedy,
    }
}

pub const PMAC_ERRORS: [PmacError; 20] = [
    e(0, "No Error", ""),
    e(
        1,
        "Command not allowed during program execution",
        "should halt program execution before issuing command",
    ),
    e(2, "Password error", "should enter the proper password"),
    e(
        3,
        "Data error or unrecognized command",
        "should correct syntax of command",
    ),
    e(
        4,
        "Illegal character: bad value (>127 ASCII) or serial parity/framing error",
        "should correct the character and or check for noise on the serial cable",
    ),
    e(
        5,
        "Command not allowed unless buffer is open",
        "should open a buffer first",
    ),
    e(
        6,
        "No room in buffer for command",
        "should allow more room for buffer -- DELETE or CLEAR other buffers",
    ),
    e(
        7,
        "Buffer already in use",
        "should CLOSE currently open buffer first",
    ),
    e(
        8,
        "MACRO auxiliary communications error",
        "should check MACRO ring hardware and software setup",
    ),
    e(
        9,
        "Program structural error (e.g. ENDIF without IF)",
        "should correct structure of program",
    ),
    e(
        10,
        "Both overtravel limits set for a motor in the C. S.",
        "should correct or disable limits",
    ),
    e(
        11,
        "Previous move not completed",
        "should Abort it or allow it to complete",
    ),
    e(
        12,
        "A motor in the coordinate system is open-loop",
        "should close the loop on the motor",
    ),
    e(
        13,
        "A motor in the coordinate system is not activated",
        "should set Ix00 to 1 or remove motor from C.S.",
    ),
    e(
        14,
        "No motors in the coordinate system",
        "should define at least one motor in C.S.",
    ),
    e(
        15,
        "Not pointing to valid program buffer",
        "should use B command first, or clear out scrambled buffers",
    ),
    e(
        16,
        "Running improperly structured program (e.g.missing ENDWHILE)",
        "should correct structure of program",
    ),
    e(
        17,
        "Trying to resume after H or Q with motors out of stopped position",
        "should use J= to return motor[s] to stopped position",
    ),
    e(
        18,
        "Attempt to perform phase reference during move, move during phase reference., or enabling with phase clock error.",
        "should finish move before phase reference, finish phase reference before move, or fix phase clock source problem",
    ),
    e(
        19,
        "Illegal position-change command while moves stored in CCBUFFER",
        "should pass through section of Program requiring storage of moves in CCBUFFER, or abort",
    ),
];

/// Parses `ERRnnn`, optionally preceded by a BELL. Trailing bytes are
/// ignored.
pub fn parse_error_code(s: &str) -> Option<u16> {
    let s = s.strip_prefix(TERM_BELL as char).unwrap_or(s);
    let digits = s.strip_prefix("ERR")?.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Looks up a documented error. Code 0 is not an error and yields `None`.
pub fn lookup(code: u16) -> Option<&'static PmacError> {
    match code {
        1..=19 => PMAC_ERRORS.get(code as usize),
        _ => None,
    }
}

/// Description of an `ERRnnn` string. The remedy is not included; it is
/// available separately through `lookup`.
pub fn error_text(s: &str) -> &'static str {
    match parse_error_code(s) {
        None => BAD_ERROR_STRING,
        Some(code) => lookup(code).map_or(BAD_ERROR_NUMBER, |err| err.description),
    }
}
