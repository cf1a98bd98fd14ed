/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the PMAC emulator: runs the driver
    against emulated controllers and sends ASCII commands to them.

--*/

use clap::Parser;
use pmac_emulator_app::{PmacEmulatorArgs, Station};
use simple_logger::SimpleLogger;
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    let cli = PmacEmulatorArgs::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;

    let running = Arc::new(AtomicBool::new(true));
    // exit cleanly on Ctrl-C so the scan tasks are joined.
    if io::stdout().is_terminal() {
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::Relaxed);
        })?;
    }

    let station = Station::from_args(&cli)?;
    station.start()?;

    for (command, reply) in cli
        .commands
        .iter()
        .zip(station.run_commands(cli.card, &cli.commands)?)
    {
        if reply.is_error() {
            println!("{} -> {}", command, reply.error_message);
        } else {
            println!("{} -> {}", command, reply.response.replace('\r', " "));
        }
    }

    let deadline = cli
        .run_for_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    while running.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    print!("{}", station.report(cli.report));
    station.shutdown();
    Ok(())
}
