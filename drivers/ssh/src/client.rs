// Licensed under the Apache-2.0 license

//! Line-protocol client over an interactive shell channel.
//!
//! The remote end is a pty, so everything written is echoed back with `\n`
//! turned into `\r\n`. `write` consumes that echo before returning, which
//! leaves only the program's own output for `read`.

use crate::config::SshPortConfig;
use crate::error::SshError;
use log::{debug, trace, warn};
use pmac_common::ShellChannel;
use std::thread;
use std::time::{Duration, Instant};

const POLL_SLEEP: Duration = Duration::from_micros(50);
const FLUSH_LEN: usize = 2048;
const READ_CHUNK: usize = 512;
const SYNC_ATTEMPTS: usize = 10;

/// Prompt characters cycled through while waiting for the login shell.
const PROMPT_MARKERS: &[u8] = b"!?%#";
const PROMPT_WRITE_MS: u64 = 1000;
const PROMPT_READ_MS: u64 = 3000;
const SYNC_MS: u64 = 1000;

/// Opens shell channels for a port.
pub trait Connector: Send {
    type Channel: ShellChannel;

    /// Authenticates, requests a `dumb` pty and starts a shell. The
    /// returned channel must not block on reads.
    fn connect(&mut self, config: &SshPortConfig) -> Result<Self::Channel, SshError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EchoStats {
    /// Echoes that started with a `\r` nobody wrote.
    pub potential_errors: usize,
    /// Echoes that differed from what was written.
    pub caught_errors: usize,
    /// Echoes that needed more than one poll.
    pub caught_delays: usize,
}

pub struct SshClient<C: ShellChannel> {
    channel: Option<C>,
    /// Bytes read past the last terminator.
    pending: Vec<u8>,
    error_checking: bool,
    stats: EchoStats,
}

impl<C: ShellChannel> SshClient<C> {
    /// Wraps an already started shell without touching it.
    pub fn new(channel: C) -> Self {
        Self {
            channel: Some(channel),
            pending: Vec::new(),
            error_checking: false,
            stats: EchoStats::default(),
        }
    }

    /// Opens a shell through `connector` and waits for it to settle by
    /// setting the prompt to each marker in turn and reading it back.
    pub fn connect<K>(connector: &mut K, config: &SshPortConfig) -> Result<Self, SshError>
    where
        K: Connector<Channel = C>,
    {
        let channel = connector.connect(config)?;
        let mut client = Self::new(channel);
        for &marker in PROMPT_MARKERS {
            let cmd = format!("PS1={}\n", marker as char);
            if let Err(e) = client.write(cmd.as_bytes(), PROMPT_WRITE_MS) {
                debug!("{}: prompt {} not echoed: {}", config.host, marker as char, e);
            }
            if let Err(e) = client.read(marker, PROMPT_READ_MS, false) {
                debug!("{}: prompt {} not seen: {}", config.host, marker as char, e);
            }
        }
        let _ = client.read(b'\n', PROMPT_WRITE_MS, false);
        debug!("{}: connection ready", config.host);
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Drops the channel; every later call fails with `NotConnected`.
    pub fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            debug!("ssh channel closed");
        }
        self.pending.clear();
    }

    pub fn set_error_checking(&mut self, enabled: bool) {
        self.error_checking = enabled;
    }

    pub fn stats(&self) -> EchoStats {
        self.stats
    }

    fn channel(&mut self) -> Result<&mut C, SshError> {
        self.channel.as_mut().ok_or(SshError::NotConnected)
    }

    /// Discards whatever is waiting on the channel, up to 2048 bytes.
    pub fn flush(&mut self) -> Result<(), SshError> {
        self.pending.clear();
        let channel = self.channel()?;
        channel.flush()?;
        let mut buf = [0u8; FLUSH_LEN];
        let n = channel.read(&mut buf)?;
        if n > 0 {
            trace!("flushed {:?}", String::from_utf8_lossy(&buf[..n]));
        }
        Ok(())
    }

    /// Writes `buf` and reads back its echo. Returns the number of bytes
    /// written; fails if the echo is not complete within `timeout_ms`.
    pub fn write(&mut self, buf: &[u8], timeout_ms: u64) -> Result<usize, SshError> {
        let start = Instant::now();
        let deadline = start + Duration::from_millis(timeout_ms);
        if let Err(e) = self.flush() {
            if e == SshError::NotConnected {
                return Err(e);
            }
            debug!("flush before write failed: {}", e);
        }
        trace!("write {:?}", String::from_utf8_lossy(buf));

        let channel = self.channel()?;
        let mut written = 0;
        while written < buf.len() {
            let n = channel.write(&buf[written..])?;
            if n == 0 {
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(POLL_SLEEP);
            }
            written += n;
        }
        if written == 0 {
            return Err(SshError::NothingWritten);
        }

        let sent = &buf[..written];
        let expected = written + sent.iter().filter(|&&b| b == b'\n').count();
        let mut echo = Vec::with_capacity(expected);
        let mut chunk = [0u8; READ_CHUNK];
        let mut polls = 0;
        while echo.len() < expected {
            let want = (expected - echo.len()).min(READ_CHUNK);
            let n = channel.read(&mut chunk[..want])?;
            echo.extend_from_slice(&chunk[..n]);
            polls += 1;
            if echo.len() < expected {
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(POLL_SLEEP);
            }
        }
        trace!("echo {:?}", String::from_utf8_lossy(&echo));

        if self.error_checking {
            self.check_echo(sent, &echo, polls);
        }
        if echo.len() < expected {
            return Err(SshError::WriteTimeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
                echoed: echo.len(),
                expected,
            });
        }
        Ok(written)
    }

    fn check_echo(&mut self, sent: &[u8], echo: &[u8], polls: usize) {
        if echo.first() == Some(&b'\r') && sent.first() != Some(&b'\r') {
            self.stats.potential_errors += 1;
        }
        let mut expected = Vec::with_capacity(echo.len());
        for &b in sent {
            if b == b'\n' {
                expected.push(b'\r');
            }
            expected.push(b);
        }
        if expected != echo {
            self.stats.caught_errors += 1;
            warn!(
                "ssh echo mismatch: wrote {:?}, got {:?}",
                String::from_utf8_lossy(sent),
                String::from_utf8_lossy(echo)
            );
        }
        if polls > 1 {
            self.stats.caught_delays += 1;
        }
    }

    /// Reads until `term`, returning everything up to and including it. In
    /// `crlf` mode the terminator only counts once `\r\n` follows it, and
    /// those two bytes are returned too. Bytes after the match are kept for
    /// the next read.
    pub fn read(&mut self, term: u8, timeout_ms: u64, crlf: bool) -> Result<Vec<u8>, SshError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut data = std::mem::take(&mut self.pending);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(end) = find_terminator(&data, term, crlf) {
                self.pending = data.split_off(end);
                trace!("read {:?}", String::from_utf8_lossy(&data));
                return Ok(data);
            }
            if Instant::now() >= deadline {
                return Err(SshError::ReadTimeout {
                    term,
                    partial: data,
                });
            }
            let n = match self.channel() {
                Ok(channel) => channel.read(&mut chunk)?,
                Err(e) => {
                    self.pending = data;
                    return Err(e);
                }
            };
            if n == 0 {
                thread::sleep(POLL_SLEEP);
            } else {
                data.extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Sends `send` until the reply, read up to the last byte of `expect`,
    /// equals `expect`.
    pub fn sync_interactive(&mut self, send: &str, expect: &str) -> Result<(), SshError> {
        let Some(&term) = expect.as_bytes().last() else {
            return Err(SshError::Config("empty sync string"));
        };
        for attempt in 1..=SYNC_ATTEMPTS {
            if let Err(e) = self.write(send.as_bytes(), SYNC_MS) {
                if e == SshError::NotConnected {
                    return Err(e);
                }
            }
            let reply = match self.read(term, SYNC_MS, false) {
                Ok(reply) => reply,
                Err(SshError::ReadTimeout { partial, .. }) => partial,
                Err(e) => return Err(e),
            };
            debug!(
                "sync attempt {}: sent {:?}, got {:?}",
                attempt,
                send,
                String::from_utf8_lossy(&reply)
            );
            if reply == expect.as_bytes() {
                return Ok(());
            }
        }
        Err(SshError::SyncFailed(expect.to_string()))
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "    connected={} error_checking={}\n",
            self.is_connected(),
            self.error_checking
        ));
        out.push_str(&format!(
            "    potential errors={} caught errors={} caught delays={}\n",
            self.stats.potential_errors, self.stats.caught_errors, self.stats.caught_delays
        ));
        out
    }
}

fn find_terminator(data: &[u8], term: u8, crlf: bool) -> Option<usize> {
    data.iter().enumerate().find_map(|(i, &b)| {
        if b != term {
            None
        } else if !crlf {
            Some(i + 1)
        } else if data.get(i + 1..i + 3) == Some(b"\r\n".as_slice()) {
            Some(i + 3)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Echoes writes and plays back scripted output after each one.
    #[derive(Default)]
    struct Script {
        out: VecDeque<u8>,
        replies: VecDeque<Vec<u8>>,
        stray_cr: bool,
    }

    impl ShellChannel for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.out.len());
            for (d, s) in buf.iter_mut().zip(self.out.drain(..n)) {
                *d = s;
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stray_cr {
                self.out.push_back(b'\r');
            }
            for &b in buf {
                if b == b'\n' {
                    self.out.push_back(b'\r');
                }
                self.out.push_back(b);
            }
            if let Some(reply) = self.replies.pop_front() {
                self.out.extend(reply);
            }
            Ok(buf.len())
        }
    }

    fn client(replies: &[&[u8]]) -> SshClient<Script> {
        SshClient::new(Script {
            out: VecDeque::new(),
            replies: replies.iter().map(|r| r.to_vec()).collect(),
            stray_cr: false,
        })
    }

    #[test]
    fn test_find_terminator() {
        assert_eq!(find_terminator(b"abc", b'b', false), Some(2));
        assert_eq!(find_terminator(b"abc", b'x', false), None);
        assert_eq!(find_terminator(b"1\r\n\x06", 0x06, true), None);
        assert_eq!(find_terminator(b"1\r\n\x06\r\nxx", 0x06, true), Some(6));
    }

    #[test]
    fn test_write_consumes_echo() {
        let mut c = client(&[b"reply\n"]);
        assert_eq!(c.write(b"P1\n", 100), Ok(3));
        assert_eq!(c.read(b'\n', 100, false).unwrap(), b"reply\n");
    }

    #[test]
    fn test_read_keeps_leftover() {
        let mut c = client(&[b"a;b;"]);
        c.write(b"x", 100).unwrap();
        assert_eq!(c.read(b';', 100, false).unwrap(), b"a;");
        assert_eq!(c.read(b';', 100, false).unwrap(), b"b;");
        match c.read(b';', 10, false) {
            Err(SshError::ReadTimeout { partial, .. }) => assert!(partial.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sync_interactive_retries() {
        let mut c = client(&[b"junk", b"\x06"]);
        assert_eq!(c.sync_interactive("#\n", "\x06"), Ok(()));

        let mut c = client(&[]);
        assert_eq!(
            c.sync_interactive("#\n", "\x06"),
            Err(SshError::SyncFailed("\x06".into()))
        );
    }

    #[test]
    fn test_error_checking_counts_mismatch() {
        let mut c = client(&[]);
        c.set_error_checking(true);
        c.write(b"P1\n", 100).unwrap();
        assert_eq!(c.stats(), EchoStats::default());

        c.channel().unwrap().stray_cr = true;
        assert_eq!(c.write(b"P2\n", 100), Ok(3));
        let stats = c.stats();
        assert_eq!(stats.potential_errors, 1);
        assert_eq!(stats.caught_errors, 1);
        assert!(c.report().contains("potential errors=1 caught errors=1"));
    }

    #[test]
    fn test_disconnected() {
        let mut c = client(&[]);
        c.disconnect();
        assert_eq!(c.write(b"P1\n", 10), Err(SshError::NotConnected));
        assert_eq!(c.flush(), Err(SshError::NotConnected));
        assert!(matches!(c.read(b'\n', 10, false), Err(SshError::NotConnected)));
    }
}
