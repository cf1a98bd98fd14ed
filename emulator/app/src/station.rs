/*++

Licensed under the Apache-2.0 license.

File Name:

    station.rs

Abstract:

    Wires the PMAC driver to emulated controllers: one simulated VME PMAC
    per configured controller, plus an optional Power PMAC reached through
    the shell transport.

--*/

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, LevelFilter};
use pmac_common::{Reply, Value};
use pmac_driver::{
    ControllerConfig, ControllerRegistry, DriverConfig, DriverError, ErrorSink, Subscriber,
    Transport,
};
use pmac_emulator::{EmulatedPmac, EmulatedShell};
use pmac_ssh::{Connector, PowerPmacPort, SshError, SshPortConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, name = "PMAC Emulator")]
pub struct PmacEmulatorArgs {
    /// Driver configuration with `[[controller]]` tables. Controller 0 with
    /// default settings when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// ASCII command to run once the driver is up. May be repeated.
    #[arg(long = "command")]
    pub commands: Vec<String>,

    /// Controller the commands are sent to.
    #[arg(long, default_value_t = 0)]
    pub card: usize,

    /// Exit after this long instead of waiting for Ctrl-C.
    #[arg(long)]
    pub run_for_ms: Option<u64>,

    /// Serve this controller index from an emulated Power PMAC shell.
    #[arg(long)]
    pub power_pmac: Option<usize>,

    /// Period at which the emulated controllers refresh their buffers.
    #[arg(long, default_value_t = 10)]
    pub publish_ms: u64,

    /// Detail level of the report printed at exit.
    #[arg(long, default_value_t = 1)]
    pub report: u32,

    /// Serve `--power-pmac` from a real controller at this address.
    #[cfg(feature = "ssh")]
    #[arg(long, requires_all = ["power_pmac", "ssh_user"])]
    pub ssh_host: Option<String>,

    #[cfg(feature = "ssh")]
    #[arg(long)]
    pub ssh_user: Option<String>,

    #[cfg(feature = "ssh")]
    #[arg(long)]
    pub ssh_password: Option<String>,
}

/// Opens emulated Power PMAC login shells.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmulatedConnector;

impl Connector for EmulatedConnector {
    type Channel = EmulatedShell;

    fn connect(&mut self, config: &SshPortConfig) -> Result<EmulatedShell, SshError> {
        debug!("emulated login to {} as {}", config.host, config.username);
        Ok(EmulatedShell::new())
    }
}

/// Logs every value a monitored address delivers.
struct Monitor {
    card: usize,
    name: String,
}

impl Subscriber for Monitor {
    fn on_data(&self, value: Value) {
        debug!(
            "card {} {} = {} ({})",
            self.card, self.name, value.long, value.double
        );
    }
}

struct LogSink;

impl ErrorSink for LogSink {
    fn publish(&self, line: &str) {
        info!("{}", line);
    }
}

fn power_pmac_transport(args: &PmacEmulatorArgs) -> Result<Transport, DriverError> {
    #[cfg(feature = "ssh")]
    if let (Some(host), Some(user)) = (&args.ssh_host, &args.ssh_user) {
        let mut config = SshPortConfig::new(host.clone(), user.clone());
        config.password = args.ssh_password.clone();
        let port = PowerPmacPort::new(config, pmac_ssh::Ssh2Connector)
            .map_err(pmac_common::TransportError::from)?;
        return Ok(Transport::Remote(Arc::new(port)));
    }
    let _ = args;
    let port = PowerPmacPort::new(SshPortConfig::new("localhost", "root"), EmulatedConnector)
        .map_err(pmac_common::TransportError::from)?;
    Ok(Transport::Remote(Arc::new(port)))
}

pub struct Station {
    registry: ControllerRegistry,
    pmacs: Vec<EmulatedPmac>,
}

impl Station {
    pub fn from_args(args: &PmacEmulatorArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => DriverConfig::from_file(path)?,
            None => DriverConfig::parse("[[controller]]\nindex = 0\n")?,
        };
        Self::new(&config, args)
    }

    pub fn new(config: &DriverConfig, args: &PmacEmulatorArgs) -> Result<Self> {
        let registry = ControllerRegistry::new();
        let mut pmacs = Vec::new();
        for entry in &config.controllers {
            let transport = if Some(entry.index) == args.power_pmac {
                power_pmac_transport(args)?
            } else {
                let pmac = EmulatedPmac::new(entry.index);
                let transport = Transport::Vme {
                    dpram: Arc::new(pmac.dpram()),
                    mailbox: pmac.mailbox(),
                };
                pmacs.push(pmac);
                transport
            };
            let controller = registry
                .configure(entry.index, transport, entry.config.clone())
                .with_context(|| format!("controller {}", entry.index))?;
            for spec in &entry.addresses {
                let monitor = Arc::new(Monitor {
                    card: entry.index,
                    name: spec.clone(),
                });
                controller
                    .register(entry.address_offset, spec, Some(monitor))
                    .with_context(|| format!("address {} on controller {}", spec, entry.index))?;
            }
        }

        if let Some(index) = args.power_pmac {
            if registry.controller(index).is_err() {
                registry.configure(index, power_pmac_transport(args)?, ControllerConfig::default())?;
            }
        }

        for pmac in &pmacs {
            let controller = registry.controller(pmac.card())?;
            pmac.attach(controller.interrupts());
            pmac.set_auto_publish(Some(Duration::from_millis(args.publish_ms)));
        }
        for controller in registry.controllers() {
            controller.set_error_sink(Some(Arc::new(LogSink)));
        }
        Ok(Self { registry, pmacs })
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn emulated(&self, card: usize) -> Option<&EmulatedPmac> {
        self.pmacs.iter().find(|p| p.card() == card)
    }

    pub fn start(&self) -> Result<()> {
        self.registry.startup()?;
        Ok(())
    }

    /// Runs `commands` one by one on controller `card`.
    pub fn run_commands(&self, card: usize, commands: &[String]) -> Result<Vec<Reply>> {
        let controller = self.registry.controller(card)?;
        if !controller.mailbox_enabled() && !commands.is_empty() {
            bail!("controller {} has no mailbox", card);
        }
        commands
            .iter()
            .map(|cmd| {
                controller
                    .write_read(cmd)
                    .with_context(|| format!("command {:?} on controller {}", cmd, card))
            })
            .collect()
    }

    pub fn report(&self, level: u32) -> String {
        self.registry.report(level)
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
        for pmac in &self.pmacs {
            pmac.set_auto_publish(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmac_common::Terminator;
    use std::io::Write;

    fn args(extra: &[&str]) -> PmacEmulatorArgs {
        let mut argv = vec!["pmac-emulator"];
        argv.extend_from_slice(extra);
        PmacEmulatorArgs::parse_from(argv)
    }

    #[test]
    fn test_args() {
        let a = args(&["--command", "P1=1", "--command", "P1", "--run-for-ms", "10"]);
        assert_eq!(a.commands, vec!["P1=1".to_string(), "P1".to_string()]);
        assert_eq!(a.run_for_ms, Some(10));
        assert_eq!(a.log_level, LevelFilter::Info);
        assert_eq!(a.card, 0);
    }

    #[test]
    fn test_default_station() {
        let station = Station::from_args(&args(&[])).unwrap();
        station.start().unwrap();
        let replies = station
            .run_commands(0, &["P9=12".into(), "P9".into(), "XYZ".into()])
            .unwrap();
        assert_eq!(replies[1].response, "12");
        assert_eq!(replies[2].terminator, Terminator::Bell);
        assert!(station.report(1).contains("card 0: enabledMbx=true"));
        station.shutdown();
    }

    #[test]
    fn test_station_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[controller]]\nindex = 1\nvariable_period_ms = 5.0\naddresses = [\"Y:$6001D\", \"L:$C000\"]"
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let station =
            Station::from_args(&args(&["--config", &path, "--power-pmac", "3"])).unwrap();
        assert!(station.emulated(1).is_some());
        assert!(station.emulated(3).is_none());
        station.start().unwrap();

        let replies = station
            .run_commands(3, &["P2=4".into(), "P2".into()])
            .unwrap();
        assert_eq!(replies[1].response, "4");
        let report = station.report(2);
        assert!(report.contains("2 controller(s) configured, running"));
        assert!(report.contains("numMtrIo=1 numBkgIo=0 numVarIo=1"));
        station.shutdown();
    }
}
