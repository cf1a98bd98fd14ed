// Licensed under the Apache-2.0 license

//! A Power PMAC reached through `gpascii -2` on an SSH login shell, offered
//! as a mailbox transport.

use crate::client::{Connector, SshClient};
use crate::config::SshPortConfig;
use crate::error::SshError;
use log::{debug, error, info};
use pmac_common::mailbox::{TERM_ACK, TERM_BELL};
use pmac_common::{MailboxTransport, Reply, Terminator, TransportError};
use std::sync::Mutex;

const GPASCII: &str = "gpascii -2\n";
const GPASCII_MS: u64 = 1000;

struct PortState<K: Connector> {
    connector: K,
    client: Option<SshClient<K::Channel>>,
    written: usize,
    read: usize,
}

pub struct PowerPmacPort<K: Connector> {
    config: SshPortConfig,
    state: Mutex<PortState<K>>,
}

impl<K: Connector> PowerPmacPort<K> {
    pub fn new(config: SshPortConfig, connector: K) -> Result<Self, SshError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(PortState {
                connector,
                client: None,
                written: 0,
                read: 0,
            }),
        })
    }

    pub fn config(&self) -> &SshPortConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().client.is_some()
    }

    /// Closes the connection; the next request reopens it.
    pub fn disconnect(&self) {
        self.close(&mut self.state.lock().unwrap(), "disconnect request");
    }

    fn close(&self, state: &mut PortState<K>, why: &str) {
        if let Some(mut client) = state.client.take() {
            info!("close {} connection: {}", self.config.host, why);
            client.disconnect();
        }
    }

    fn open(&self, state: &mut PortState<K>) -> Result<(), SshError> {
        if state.client.is_some() {
            return Ok(());
        }
        debug!("open connection to {}", self.config.host);
        let mut client = SshClient::connect(&mut state.connector, &self.config)?;
        client.set_error_checking(self.config.error_checking);
        if let Err(e) = client.write(GPASCII.as_bytes(), GPASCII_MS) {
            debug!("{}: gpascii not echoed: {}", self.config.host, e);
        }
        let _ = client.read(b'\n', GPASCII_MS, false);
        client.sync_interactive("#\n", "\x06")?;
        info!("opened connection to {}", self.config.host);
        state.client = Some(client);
        Ok(())
    }

    fn transact(&self, state: &mut PortState<K>, command: &str) -> Result<Vec<u8>, SshError> {
        self.open(state)?;
        let timeout = self.config.timeout_ms;
        let line = format!("{}\n", command);
        let Some(client) = state.client.as_mut() else {
            return Err(SshError::NotConnected);
        };
        let written = match client.write(line.as_bytes(), timeout) {
            Ok(n) => n,
            Err(e) => {
                error!("{} write error: {}", self.config.host, e);
                self.close(state, "write error");
                return Err(e);
            }
        };
        state.written += written;
        let Some(client) = state.client.as_mut() else {
            return Err(SshError::NotConnected);
        };
        match client.read(TERM_ACK, timeout, true) {
            Ok(data) => {
                state.read += data.len();
                Ok(data)
            }
            Err(e) => {
                error!("{} read error: {}", self.config.host, e);
                self.close(state, "read error");
                Err(e)
            }
        }
    }

    pub fn report(&self, details: u32) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();
        out.push_str(&format!(
            "    Port {}: {}\n",
            self.config.host,
            if state.client.is_some() { "Connected" } else { "Disconnected" }
        ));
        if details >= 2 {
            out.push_str(&format!("    Characters written: {}\n", state.written));
            out.push_str(&format!("       Characters read: {}\n", state.read));
        }
        if let Some(client) = &state.client {
            out.push_str(&client.report());
        }
        out
    }
}

/// Splits a gpascii reply (lines ending in `\r\n`, then ACK `\r\n`) into a
/// mailbox reply. Lines are joined with CR as the mailbox does.
pub fn parse_reply(data: &[u8]) -> Reply {
    let end = data.iter().position(|&b| b == TERM_ACK).unwrap_or(data.len());
    let body = String::from_utf8_lossy(&data[..end]);
    if let Some(bell) = body.find(TERM_BELL as char) {
        let error: String = body[bell + 1..]
            .chars()
            .take_while(|&c| c != '\r' && c != '\n')
            .collect();
        let mut reply = Reply::error(error);
        reply.response = join_lines(&body[..bell]);
        return reply;
    }
    Reply::ack(join_lines(&body))
}

fn join_lines(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\r")
}

impl<K: Connector> MailboxTransport for PowerPmacPort<K> {
    fn write_read(&self, command: &str) -> Result<Reply, TransportError> {
        let mut state = self.state.lock().unwrap();
        let data = self.transact(&mut state, command)?;
        let reply = parse_reply(&data);
        if reply.terminator == Terminator::Bell {
            debug!("{} [{}] -> {}", self.config.host, command, reply.error_message);
        }
        Ok(reply)
    }
}
