use std::{
    fmt,
    io::Write,
    marker::PhantomData,
    net::{IpAddr, SocketAddr, SocketAddrV4},
    os::unix::io::{AsRawFd, RawFd},
};

use anyhow::{anyhow, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::{unix::AsyncFd, AsyncWriteExt};

// Strong type for the raw ICMP socket. IPv4 only; the tool does not speak
// ICMPv6.
pub struct ICMPSocket(Socket);

impl ICMPSocket {
    pub fn new(bind_interface: Option<&str>, ttl: Option<u32>) -> Result<ICMPSocket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        if let Some(ttl) = ttl {
            socket.set_ttl(ttl)?;
        }

        let socket = match bind_interface {
            Some(bi) => bind_to_device(socket, bi)?,
            None => socket,
        };

        Ok(ICMPSocket(socket))
    }

    pub fn get_mut(&mut self) -> &mut Socket {
        &mut self.0
    }

    pub fn get_ref(&self) -> &Socket {
        &self.0
    }
}

impl AsRawFd for ICMPSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

pub struct AsyncICMPSocket {
    inner: AsyncFd<ICMPSocket>,
}

impl AsyncICMPSocket {
    pub fn new(socket: ICMPSocket) -> Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub async fn send_to(&mut self, packet: &[u8], addr: &IpAddr) -> Result<usize> {
        let addr = match addr {
            IpAddr::V4(addr) => {
                let addr = SocketAddr::V4(SocketAddrV4::new(*addr, 0));
                SockAddr::from(addr)
            }
            IpAddr::V6(_) => return Err(anyhow!("IPv6 is not supported")),
        };

        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().get_ref().send_to(packet, &addr)) {
                Ok(res) => return Ok(res?),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        loop {
            let mut guard = self.inner.readable().await?;
            // Safety: We are sure that the buffer is initialized
            let uninit_slice = unsafe { core::mem::transmute(&mut *buf) };

            match guard.try_io(|inner| inner.get_ref().get_ref().recv_from(uninit_slice)) {
                Ok(Ok((n, addr))) => {
                    let addr = addr
                        .as_socket()
                        .ok_or_else(|| anyhow!("source address is not an IP address"))?;
                    return Ok((n, addr));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }
}

pub fn bind_to_device(socket: Socket, bind_interface: &str) -> Result<Socket, std::io::Error> {
    // Socket2 bind_device does not have nice error types, so we have to handle
    // the libc errors. In case, we get an error when binding, map it into a
    // more friendly std::io::Error
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        return if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            let error_msg = format!("error binding to device (`{}`): {}", bind_interface, err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        } else {
            let error_msg = format!("unexpected error binding device: {}", err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        };
    }

    Ok(socket)
}

/// A record that knows how to serialize itself as one CSV row.
pub trait Logging {
    fn header() -> String;
    fn row(&self) -> String;
}

/// Appends one CSV row per logged record to a results file.
pub struct Logger<T: Logging> {
    file: tokio::fs::File,
    _marker: PhantomData<T>,
}

impl<T: Logging> Logger<T> {
    pub fn new(file_name: String) -> Result<Logger<T>> {
        let mut file = std::fs::File::create(&file_name)?;
        writeln!(file, "{}", T::header())?;
        Ok(Logger {
            file: tokio::fs::File::from_std(file),
            _marker: PhantomData,
        })
    }

    pub async fn log(&mut self, record: &T) -> Result<()> {
        let row = format!("{}\n", record.row());
        self.file.write_all(row.as_bytes()).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Statistics {
    mean: f64,
    variance: f64,
    min: f64,
    max: f64,
    samples: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            self.min(),
            self.mean(),
            self.max(),
            self.standard_deviation(),
        )
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            mean: f64::NAN,
            variance: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            samples: 0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance / (self.samples as f64)
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn update(&mut self, value: f64) {
        self.samples += 1;
        if self.samples == 1 {
            self.mean = value;
            self.variance = 0.0;
            self.min = value;
            self.max = value;
        } else {
            let old_mean = self.mean;
            self.mean = old_mean + (value - old_mean) / self.samples as f64;
            self.variance = self.variance + (value - old_mean) * (value - self.mean);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}
