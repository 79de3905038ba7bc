//! The connection abstraction the handshake runs over.
//!
//! The handshake is handed an already-open blocking byte stream. It reads and
//! writes through `Read`/`Write`, sends the leading NUL byte (with process
//! credentials where the platform supports it), and closes the stream only
//! when authentication fails.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A bidirectional, blocking byte stream owned by the handshake.
pub trait Connection: Read + Write {
    /// Send the single NUL byte that opens the handshake.
    ///
    /// Transports that can pass process credentials alongside it should do so.
    fn send_credentials_byte(&mut self) -> io::Result<()> {
        self.write_all(&[0])?;
        self.flush()
    }

    /// Close the stream. Called at most once, on fatal failure.
    fn close(&mut self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        shutdown_ignoring_not_connected(self.shutdown(Shutdown::Both))
    }
}

#[cfg(unix)]
impl Connection for std::os::unix::net::UnixStream {
    fn send_credentials_byte(&mut self) -> io::Result<()> {
        credentials::send_nul_with_credentials(self)
    }

    fn close(&mut self) -> io::Result<()> {
        shutdown_ignoring_not_connected(self.shutdown(Shutdown::Both))
    }
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn send_credentials_byte(&mut self) -> io::Result<()> {
        (**self).send_credentials_byte()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn send_credentials_byte(&mut self) -> io::Result<()> {
        (**self).send_credentials_byte()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

fn shutdown_ignoring_not_connected(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
mod credentials {
    use std::io::{self, Write};
    use std::os::unix::net::UnixStream;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) fn send_nul_with_credentials(stream: &mut UnixStream) -> io::Result<()> {
        use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags, UnixCredentials};
        use std::io::IoSlice;
        use std::os::unix::io::AsRawFd;

        let creds = UnixCredentials::new();
        let cmsgs = [ControlMessage::ScmCredentials(&creds)];
        let iov = [IoSlice::new(&[0u8])];
        let sent = sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
            .map_err(io::Error::from)?;
        finish(stream, sent)
    }

    #[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
    pub(super) fn send_nul_with_credentials(stream: &mut UnixStream) -> io::Result<()> {
        use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
        use std::io::IoSlice;
        use std::os::unix::io::AsRawFd;

        let cmsgs = [ControlMessage::ScmCreds];
        let iov = [IoSlice::new(&[0u8])];
        let sent = sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
            .map_err(io::Error::from)?;
        finish(stream, sent)
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "dragonfly"
    )))]
    pub(super) fn send_nul_with_credentials(stream: &mut UnixStream) -> io::Result<()> {
        stream.write_all(&[0])?;
        tracing::trace!("sent handshake NUL byte without credentials");
        stream.flush()
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    fn finish(stream: &mut UnixStream, sent: usize) -> io::Result<()> {
        if sent != 1 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to send handshake NUL byte",
            ));
        }
        tracing::trace!("sent handshake NUL byte with credentials");
        stream.flush()
    }
}
