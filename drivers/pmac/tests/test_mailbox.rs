// Licensed under the Apache-2.0 license

#[cfg(test)]
mod common;

#[cfg(test)]
mod test {
    use crate::common::{quiet_config, wait_until, Bench, Client, Lines, WAIT};
    use pmac_common::{Terminator, TransportError};
    use pmac_driver::{ControllerConfig, DeviceError, DeviceHandle, DriverError, Ioctl};
    use std::thread;
    use std::time::Instant;

    fn read_reply(handle: &DeviceHandle) -> Vec<u8> {
        let deadline = Instant::now() + WAIT;
        let mut reply = Vec::new();
        let mut buf = [0u8; 64];
        while Instant::now() < deadline {
            let n = handle.read(&mut buf);
            reply.extend_from_slice(&buf[..n]);
            if reply.last() == Some(&0x06) {
                break;
            }
        }
        reply
    }

    #[test]
    fn test_write_read() {
        let bench = Bench::new(quiet_config());
        let c = &bench.controller;

        let reply = c.write_read("P1=5").unwrap();
        assert_eq!(reply.terminator, Terminator::Ack);
        assert_eq!(reply.response, "");

        let reply = c.write_read("P1").unwrap();
        assert_eq!(reply.response, "5");
        assert!(reply.error_message.is_empty());

        // Only the first line of a multi-line response is kept.
        let reply = c.write_read("P2=2 P1 P2").unwrap();
        assert_eq!(reply.response, "5");

        // Commands that span several register blocks.
        let reply = c.write_read("P100=1.25 P101=2 P102=3 P100").unwrap();
        assert_eq!(reply.response, "1.25");
    }

    #[test]
    fn test_error_reply() {
        let bench = Bench::new(quiet_config());
        let reply = bench.controller.write_read("BOGUS").unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.error_message, "ERR003");
        assert_eq!(reply.response, "");

        // The mailbox recovers for the next command.
        let reply = bench.controller.write_read("P7=7 P7").unwrap();
        assert_eq!(reply.response, "7");
    }

    #[test]
    fn test_command_too_long() {
        let bench = Bench::new(quiet_config());
        let command = "P1".repeat(40);
        assert_eq!(
            bench.controller.write_read(&command),
            Err(DriverError::Transport(TransportError::CommandTooLong(80)))
        );
    }

    #[test]
    fn test_mailbox_disabled() {
        let bench = Bench::new(ControllerConfig {
            mailbox_enabled: false,
            ..quiet_config()
        });
        assert_eq!(
            bench.controller.write_read("P1"),
            Err(DriverError::MailboxDisabled(0))
        );
        assert_eq!(
            bench.controller.submit(Client::new("pv"), "P1"),
            Err(DriverError::MailboxDisabled(0))
        );
    }

    #[test]
    fn test_worker_completes_requests() {
        let bench = Bench::new(quiet_config());
        let sink = Lines::new();
        bench.controller.set_error_sink(Some(sink.clone()));
        bench.registry.startup().unwrap();

        let client = Client::new("TEST:P1");
        assert_eq!(bench.controller.submit(client.clone(), "P1=3"), Ok(true));
        assert_eq!(bench.controller.submit(client.clone(), "P1"), Ok(true));
        assert_eq!(bench.controller.submit(client.clone(), "JUNK"), Ok(true));
        assert!(wait_until(WAIT, || client.finished() == 3));

        let done = client.completed();
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].command, "P1=3");
        assert_eq!(done[1].response, "3");
        assert_eq!(done[1].terminator, Some(Terminator::Ack));

        // The BELL reply drops the busy flag and reports to the sink.
        assert_eq!(client.cleared(), 1);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" PV=TEST:P1 CMD=JUNK ERR003 "));
    }

    #[test]
    fn test_workers_from_many_threads() {
        let bench = Bench::new(quiet_config());
        bench.registry.startup().unwrap();

        let clients: Vec<_> = (0..4)
            .map(|i| Client::new(&format!("PV{}", i)))
            .collect();
        thread::scope(|s| {
            for (i, client) in clients.iter().enumerate() {
                let controller = bench.controller.clone();
                let client = client.clone();
                s.spawn(move || {
                    for j in 0..10 {
                        let cmd = format!("P{}={} P{}", i + 10, j, i + 10);
                        assert_eq!(controller.submit(client.clone(), cmd), Ok(true));
                    }
                });
            }
        });

        for (i, client) in clients.iter().enumerate() {
            assert!(wait_until(WAIT, || client.completed().len() == 10));
            let responses: Vec<String> =
                client.completed().into_iter().map(|r| r.response).collect();
            let expected: Vec<String> = (0..10).map(|j| j.to_string()).collect();
            assert_eq!(responses, expected, "client {}", i);
        }
    }

    #[test]
    fn test_framing_idempotent() {
        let bench = Bench::new(quiet_config());
        let c = &bench.controller;
        c.write_read("P1=5 P20=3 P21=4").unwrap();

        // Short, exactly one register block, multi-block and error replies.
        let commands = [
            "P1",
            "P20=3 P21=4 P20",
            "P20=3 P21=4 P1 P20 P21 P1 P20 P21",
            "NOT A COMMAND AT ALL",
        ];
        for command in commands {
            let first = c.write_read(command).unwrap();
            for i in 0..50 {
                let reply = c.write_read(command).unwrap();
                assert_eq!(
                    (&reply.response, reply.terminator, &reply.error_message),
                    (&first.response, first.terminator, &first.error_message),
                    "{:?} round {}",
                    command,
                    i
                );
            }
        }
        assert_eq!(c.write_read("P1").unwrap().response, "5");
        assert_eq!(c.write_read("P20=3 P21=4 P20").unwrap().response, "3");
        assert!(c.write_read("NOT A COMMAND AT ALL").unwrap().is_error());
    }

    #[test]
    fn test_worker_restarts_after_stop() {
        let bench = Bench::new(quiet_config());
        let client = Client::new("TEST:RESTART");
        bench.controller.start().unwrap();
        assert_eq!(bench.controller.submit(client.clone(), "P30=1"), Ok(true));
        assert!(wait_until(WAIT, || client.completed().len() == 1));

        bench.controller.stop();
        bench.controller.start().unwrap();
        assert_eq!(bench.controller.submit(client.clone(), "P30"), Ok(true));
        assert!(wait_until(WAIT, || client.completed().len() == 2));
        assert_eq!(client.completed()[1].response, "1");
    }

    #[test]
    fn test_ascii_device() {
        let bench = Bench::new(quiet_config());
        let devices = bench.registry.install_devices(false).unwrap();
        assert_eq!(devices.names(), vec!["/dev/pmac/0/asc".to_string()]);

        let handle = devices.open("/dev/pmac/0/asc").unwrap();
        assert_eq!(handle.write(b"P3=9 P3\r"), Ok(8));
        assert_eq!(read_reply(&handle), b"9\r\x06");

        handle.write(b"WHAT\r").unwrap();
        assert_eq!(read_reply(&handle), b"\x07ERR003\r\x06");
        assert_eq!(handle.ioctl(Ioctl::Fionread), 0);
    }

    #[test]
    fn test_ascii_device_polling() {
        let bench = Bench::new(quiet_config());
        let devices = bench.registry.install_devices(true).unwrap();
        let handle = devices.open("/dev/pmac/0/asc").unwrap();
        handle.write(b"P4=1 P4 P4\r").unwrap();
        let deadline = Instant::now() + WAIT;
        let mut reply = Vec::new();
        let mut buf = [0u8; 64];
        while reply.last() != Some(&0x06) && Instant::now() < deadline {
            let n = handle.read(&mut buf);
            reply.extend_from_slice(&buf[..n]);
        }
        assert_eq!(reply, b"1\r1\r\x06");
    }

    #[test]
    fn test_mailbox_device() {
        let bench = Bench::new(ControllerConfig {
            mailbox_enabled: false,
            ..quiet_config()
        });
        let devices = bench.registry.install_devices(false).unwrap();
        assert_eq!(
            devices.names(),
            vec!["/dev/pmac/0/asc".to_string(), "/dev/pmac/0/mbx".to_string()]
        );

        let handle = devices.open("/dev/pmac/0/mbx").unwrap();
        assert_eq!(
            devices.open("/dev/pmac/0/mbx").err(),
            Some(DeviceError::AlreadyOpen("/dev/pmac/0/mbx".into()))
        );
        let command = b"P20=123456 P21=7 P20\r";
        assert_eq!(handle.write(command), Ok(command.len()));
        assert_eq!(read_reply(&handle), b"123456\r\x06");
        drop(handle);
        assert!(devices.open("/dev/pmac/0/mbx").is_ok());
    }

    #[test]
    fn test_device_paths() {
        let bench = Bench::new(quiet_config());
        let devices = bench.registry.install_devices(false).unwrap();
        assert!(devices.open("/dev/pmac/0/ascii").is_err());
        assert!(devices.open("/dev/pmac/1/asc").is_err());
        assert!(devices.open("/dev/pmac/0/mbx").is_err());
    }
}
