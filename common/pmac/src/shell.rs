// Licensed under the Apache-2.0 license

use std::io;

/// A non-blocking interactive shell stream.
///
/// `read` returns `Ok(0)` when no data is waiting instead of blocking.
pub trait ShellChannel: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ShellChannel + ?Sized> ShellChannel for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
