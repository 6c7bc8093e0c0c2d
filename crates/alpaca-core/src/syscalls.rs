// src/syscalls.rs
use crate::error::AlpacaResult;
use libc::{c_int, c_void, socklen_t};
use std::ffi::CStr;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;

// ---- Descriptor I/O ----

/// One `read(2)` attempt. `Ok(0)` means end of stream; `WouldBlock` is
/// reported as an error so the caller can tell it apart from EOF.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> AlpacaResult<usize> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            Err(io::Error::last_os_error().into())
        } else {
            Ok(res as usize)
        }
    }
}

/// One `write(2)` attempt of at most `buf.len()` bytes.
pub fn write_nonblocking(fd: RawFd, buf: &[u8]) -> AlpacaResult<usize> {
    unsafe {
        let res = libc::write(fd, buf.as_ptr() as *const c_void, buf.len());
        if res < 0 {
            Err(io::Error::last_os_error().into())
        } else {
            Ok(res as usize)
        }
    }
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

pub fn set_nonblocking(fd: RawFd) -> AlpacaResult<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

// ---- Wakeup Pipe ----

/// Create a Unix pipe with both ends non-blocking. Returns (read_fd, write_fd).
pub fn create_pipe() -> AlpacaResult<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    for fd in fds {
        if let Err(e) = set_nonblocking(fd) {
            close_fd(fds[0]);
            close_fd(fds[1]);
            return Err(e);
        }
    }
    Ok((fds[0], fds[1]))
}

// ---- Address Resolution ----

const NI_MAXHOST: usize = 1025;

/// Reverse DNS lookup through `getnameinfo(3)`.
///
/// Returns `None` when the address has no name; numeric fallbacks are
/// refused so a hostname is never just the IP again.
pub fn reverse_lookup(addr: &SocketAddr) -> Option<String> {
    let mut host = [0 as libc::c_char; NI_MAXHOST];

    let res = match addr {
        SocketAddr::V4(a) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            #[cfg(target_os = "macos")]
            {
                sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
            }
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(a.ip().octets()),
            };
            unsafe {
                libc::getnameinfo(
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                    host.as_mut_ptr(),
                    host.len() as socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        SocketAddr::V6(a) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            #[cfg(target_os = "macos")]
            {
                sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
            }
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: a.ip().octets(),
            };
            sin6.sin6_scope_id = a.scope_id();
            unsafe {
                libc::getnameinfo(
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                    host.as_mut_ptr(),
                    host.len() as socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };

    if res != 0 {
        return None;
    }
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    name.to_str().ok().filter(|s| !s.is_empty()).map(str::to_owned)
}
