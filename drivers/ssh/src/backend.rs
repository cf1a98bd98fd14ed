// Licensed under the Apache-2.0 license

//! libssh2 sessions through the `ssh2` crate.

use crate::client::Connector;
use crate::config::SshPortConfig;
use crate::error::SshError;
use log::debug;
use pmac_common::ShellChannel;
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;

const SSH_PORT: u16 = 22;

#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Connector;

pub struct Ssh2Shell {
    session: Session,
    channel: Channel,
}

fn connect_error(config: &SshPortConfig, e: impl ToString) -> SshError {
    SshError::Connect {
        host: config.host.clone(),
        reason: e.to_string(),
    }
}

impl Connector for Ssh2Connector {
    type Channel = Ssh2Shell;

    fn connect(&mut self, config: &SshPortConfig) -> Result<Ssh2Shell, SshError> {
        let tcp = TcpStream::connect((config.host.as_str(), SSH_PORT))
            .map_err(|e| connect_error(config, e))?;
        let mut session = Session::new().map_err(|e| connect_error(config, e))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| connect_error(config, e))?;
        if let Some((hash, _)) = session.host_key() {
            debug!("{}: host key {} bytes", config.host, hash.len());
        }

        let auth = match &config.password {
            Some(password) => session.userauth_password(&config.username, password),
            None => {
                let dir = PathBuf::from("/home").join(&config.username).join(".ssh");
                let public = dir.join("id_rsa.pub");
                let private = dir.join("id_rsa");
                session.userauth_pubkey_file(
                    &config.username,
                    Some(public.as_path()),
                    private.as_path(),
                    None,
                )
            }
        };
        auth.map_err(|_| SshError::Auth(config.username.clone()))?;

        let mut channel = session
            .channel_session()
            .map_err(|e| connect_error(config, e))?;
        channel
            .request_pty("dumb", None, None)
            .map_err(|e| connect_error(config, e))?;
        channel.shell().map_err(|e| connect_error(config, e))?;
        session.set_blocking(false);
        Ok(Ssh2Shell { session, channel })
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl ShellChannel for Ssh2Shell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.channel.read(buf) {
            Err(e) if would_block(&e) => Ok(0),
            other => other,
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.channel.write(buf) {
            Err(e) if would_block(&e) => Ok(0),
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.channel.flush() {
            Err(e) if would_block(&e) => Ok(()),
            other => other,
        }
    }
}

impl Drop for Ssh2Shell {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "Normal Shutdown", None);
    }
}
