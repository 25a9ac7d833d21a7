//! Low level raw CAN socket on top of [`socket2`].
use std::ffi::CString;
use std::io::{self, Read};
use std::os::fd::AsRawFd;

use libc::{
    c_int, c_void, can_frame, sa_family_t, sockaddr_can, socklen_t, AF_CAN, CAN_RAW,
    CAN_RAW_LOOPBACK, SOL_CAN_RAW,
};

pub struct CanSocket(socket2::Socket);

fn as_bytes<T: Sized>(val: &T) -> &[u8] {
    let sz = std::mem::size_of::<T>();
    unsafe { std::slice::from_raw_parts::<'_, u8>(val as *const _ as *const u8, sz) }
}

fn as_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    let sz = std::mem::size_of::<T>();
    unsafe { std::slice::from_raw_parts_mut(val as *mut _ as *mut u8, sz) }
}

fn if_nametoindex(ifname: &str) -> io::Result<c_int> {
    let name = CString::new(ifname).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    match unsafe { libc::if_nametoindex(name.as_ptr()) } {
        0 => Err(io::Error::last_os_error()),
        idx => Ok(idx as c_int),
    }
}

impl CanSocket {
    pub fn open(ifname: &str) -> io::Result<Self> {
        let mut addr: sockaddr_can = unsafe { std::mem::zeroed() };
        addr.can_family = AF_CAN as sa_family_t;
        addr.can_ifindex = if_nametoindex(ifname)?;

        // Convert into sockaddr_storage
        let bytes = as_bytes(&addr);
        let len = bytes.len();
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        as_bytes_mut(&mut storage)[..len].copy_from_slice(bytes);
        let sock_addr = unsafe { socket2::SockAddr::new(storage, len as socklen_t) };

        let af_can = socket2::Domain::from(AF_CAN);
        let can_raw = socket2::Protocol::from(CAN_RAW);

        let sock = socket2::Socket::new_raw(af_can, socket2::Type::RAW, Some(can_raw))?;
        sock.bind(&sock_addr)?;
        Ok(Self(sock))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.0.set_nonblocking(nonblocking)
    }

    /// Let other sockets on this host see our frames.
    pub fn set_loopback(&self, enabled: bool) -> io::Result<()> {
        let loopback = c_int::from(enabled);
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_LOOPBACK, &loopback)
    }

    pub fn read_frame(&self) -> io::Result<can_frame> {
        let mut frame = super::frame::can_frame_default();
        let n = (&self.0).read(as_bytes_mut(&mut frame))?;
        if n != std::mem::size_of::<can_frame>() {
            return Err(io::Error::from(io::ErrorKind::InvalidData));
        }
        Ok(frame)
    }

    pub fn write_frame(&self, frame: &can_frame) -> io::Result<()> {
        let n = self.0.send(as_bytes(frame))?;
        if n != std::mem::size_of::<can_frame>() {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        Ok(())
    }

    /// Bytes still waiting in the kernel transmit queue.
    pub fn pending_output(&self) -> io::Result<usize> {
        let mut pending: c_int = 0;
        let ret = unsafe { libc::ioctl(self.0.as_raw_fd(), libc::TIOCOUTQ, &mut pending) };
        match ret {
            0 => Ok(pending.max(0) as usize),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn set_socket_option<T>(&self, level: c_int, name: c_int, val: &T) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.0.as_raw_fd(),
                level,
                name,
                val as *const _ as *const c_void,
                std::mem::size_of::<T>() as socklen_t,
            )
        };

        match ret {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}
