/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Line-protocol client for Power PMAC controllers reached over SSH, and a
    mailbox transport built on it.

--*/

#[cfg(feature = "ssh")]
mod backend;
mod client;
mod config;
mod error;
mod port;

#[cfg(feature = "ssh")]
pub use backend::{Ssh2Connector, Ssh2Shell};
pub use client::{Connector, EchoStats, SshClient};
pub use config::SshPortConfig;
pub use error::SshError;
pub use port::{parse_reply, PowerPmacPort};
