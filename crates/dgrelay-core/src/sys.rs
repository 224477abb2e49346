//! Thin wrappers over the raw syscalls std does not expose.
//!
//! Everything `unsafe` in the crate lives here: the batched vectored receive,
//! the vectored datagram send, receive-timeout configuration, descriptor
//! duplication and close, and the signal plumbing (mask, `sigwait`,
//! `pthread_kill`). Each wrapper converts errno into `io::Error` so callers
//! stay in safe Rust.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

/// Widest receive batch the OS accepts in one vectored call.
#[cfg(target_os = "linux")]
pub const MAX_RECV_BATCH: usize = libc::UIO_MAXIOV as usize;

/// Non-Linux Unix has no batched receive; batches degrade to one datagram.
#[cfg(not(target_os = "linux"))]
pub const MAX_RECV_BATCH: usize = 1;

/// Result of one datagram slot in a receive batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvMeta {
    /// Bytes received into the slot's buffer.
    pub len: usize,
    /// The datagram was truncated to fit the buffer.
    pub truncated: bool,
    /// The receive carried out-of-band or error-queue data.
    pub ancillary: bool,
}

/// Receive up to `bufs.len()` datagrams in one call, waiting for at least
/// one. Fills `meta[..n]` and returns `n`. The timeout configured with
/// [`set_recv_timeout`] surfaces as `WouldBlock`.
#[cfg(target_os = "linux")]
pub fn recv_batch(fd: RawFd, bufs: &mut [Vec<u8>], meta: &mut [RecvMeta]) -> io::Result<usize> {
    debug_assert!(meta.len() >= bufs.len());
    let mut iovs: Vec<libc::iovec> = bufs
        .iter_mut()
        .map(|buf| libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        })
        .collect();
    let mut msgs: Vec<libc::mmsghdr> = iovs
        .iter_mut()
        .map(|iov| {
            // SAFETY: mmsghdr is plain-old-data; an all-zero value is a valid
            // "no name, no control data" header.
            let mut msg: libc::mmsghdr = unsafe { mem::zeroed() };
            msg.msg_hdr.msg_iov = iov as *mut libc::iovec;
            msg.msg_hdr.msg_iovlen = 1;
            msg
        })
        .collect();

    // SAFETY: `msgs` and every iovec it references stay alive and exclusive
    // for the duration of the call; lengths match the allocations.
    let n = unsafe {
        libc::recvmmsg(
            fd,
            msgs.as_mut_ptr(),
            msgs.len() as libc::c_uint,
            libc::MSG_WAITFORONE,
            ptr::null_mut(),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    let n = n as usize;
    for (slot, msg) in meta.iter_mut().zip(&msgs[..n]) {
        let flags = msg.msg_hdr.msg_flags;
        *slot = RecvMeta {
            len: msg.msg_len as usize,
            truncated: flags & libc::MSG_TRUNC != 0,
            ancillary: flags & (libc::MSG_OOB | libc::MSG_ERRQUEUE) != 0,
        };
    }
    Ok(n)
}

/// Single-datagram fallback where the kernel offers no batched receive.
#[cfg(not(target_os = "linux"))]
pub fn recv_batch(fd: RawFd, bufs: &mut [Vec<u8>], meta: &mut [RecvMeta]) -> io::Result<usize> {
    debug_assert!(!bufs.is_empty() && !meta.is_empty());
    let buf = &mut bufs[0];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: zeroed msghdr is valid; iov outlives the call.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    // SAFETY: fd, msg, and the buffer are valid for the duration of the call.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    meta[0] = RecvMeta {
        len: n as usize,
        truncated: msg.msg_flags & libc::MSG_TRUNC != 0,
        ancillary: msg.msg_flags & libc::MSG_OOB != 0,
    };
    Ok(1)
}

/// Send one datagram assembled from up to two byte segments (two when a ring
/// record straddles the wrap point). Zero non-empty segments send an empty
/// datagram.
pub fn send_segments(fd: RawFd, segments: (&[u8], &[u8])) -> io::Result<usize> {
    let mut iovs = [
        libc::iovec {
            iov_base: segments.0.as_ptr() as *mut libc::c_void,
            iov_len: segments.0.len(),
        },
        libc::iovec {
            iov_base: segments.1.as_ptr() as *mut libc::c_void,
            iov_len: segments.1.len(),
        },
    ];
    let n_iov = if !segments.1.is_empty() {
        2
    } else {
        usize::from(!segments.0.is_empty())
    };

    // SAFETY: zeroed msghdr is valid; the iovec array and the borrowed
    // segments outlive the call.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iovs.as_mut_ptr();
    msg.msg_iovlen = n_iov as _;
    // SAFETY: fd is a datagram socket owned by the caller; msg is valid.
    let sent = unsafe { libc::sendmsg(fd, &msg, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Read into `buf` from a raw descriptor.
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is a valid, exclusively borrowed region of buf.len() bytes.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Configure the socket receive timeout. `None` clears it (block forever).
pub fn set_recv_timeout(fd: RawFd, timeout: Option<Duration>) -> io::Result<()> {
    let tv = match timeout {
        Some(timeout) => libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        },
        None => libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    };
    // SAFETY: tv is a valid timeval and the size argument matches it.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Duplicate a descriptor (used for the inherited stdin/stdout handles so
/// they can be closed without touching the process streams).
pub fn dup_fd(fd: RawFd) -> io::Result<RawFd> {
    // SAFETY: dup has no memory-safety preconditions; the result is checked.
    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(duped)
}

/// Close a raw descriptor, ignoring errors (close-on-shutdown path).
pub fn close_fd(fd: RawFd) {
    // SAFETY: the caller owns fd and never uses it again after this call.
    unsafe {
        libc::close(fd);
    }
}

/// Whether an I/O error is the bad-descriptor class a rudely closed handle
/// produces under a parked read or receive.
pub fn is_closed_handle_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EBADF) | Some(libc::ENOTSOCK)
    )
}

fn relay_signal_set() -> libc::sigset_t {
    // SAFETY: sigemptyset/sigaddset initialize the zeroed set in place.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGUSR1);
        set
    }
}

/// Block `SIGINT` and `SIGUSR1` in the calling thread. Called before worker
/// threads are spawned so every thread inherits the mask and asynchronous
/// delivery is funneled to the dedicated `sigwait` loop.
pub fn block_relay_signals() -> io::Result<()> {
    let set = relay_signal_set();
    // SAFETY: set is a fully initialized sigset_t.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Block until one of `SIGINT`/`SIGUSR1` is delivered and return it.
pub fn wait_relay_signal() -> io::Result<libc::c_int> {
    let set = relay_signal_set();
    let mut sig: libc::c_int = 0;
    // SAFETY: set is initialized and sig is a valid out-pointer.
    let rc = unsafe { libc::sigwait(&set, &mut sig) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(sig)
}

/// Poke a thread parked in [`wait_relay_signal`] with `SIGUSR1`.
pub fn kill_thread_usr1(thread: libc::pthread_t) -> io::Result<()> {
    // SAFETY: the caller holds the join handle, so the thread id is live.
    let rc = unsafe { libc::pthread_kill(thread, libc::SIGUSR1) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    #[test]
    fn recv_timeout_surfaces_as_would_block() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        set_recv_timeout(socket.as_raw_fd(), Some(Duration::from_millis(50))).unwrap();

        let mut bufs = vec![vec![0u8; 64]; 2];
        let mut meta = vec![RecvMeta::default(); 2];
        let started = Instant::now();
        let err = recv_batch(socket.as_raw_fd(), &mut bufs, &mut meta).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn batch_receives_multiple_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        sender.send_to(b"one", addr).unwrap();
        sender.send_to(b"two!", addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut bufs = vec![vec![0u8; 64]; 4];
        let mut meta = vec![RecvMeta::default(); 4];
        let n = recv_batch(receiver.as_raw_fd(), &mut bufs, &mut meta).unwrap();
        assert!(n >= 1);
        assert_eq!(&bufs[0][..meta[0].len], b"one");
        if n > 1 {
            assert_eq!(&bufs[1][..meta[1].len], b"two!");
            assert!(!meta[1].truncated);
        }
    }

    #[test]
    fn send_segments_reassembles_split_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();

        let sent = send_segments(sender.as_raw_fd(), (b"hel", b"lo")).unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn send_segments_empty_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();

        assert_eq!(send_segments(sender.as_raw_fd(), (b"", b"")).unwrap(), 0);

        let mut buf = [0u8; 16];
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn closed_handle_error_class() {
        let err = io::Error::from_raw_os_error(libc::EBADF);
        assert!(is_closed_handle_error(&err));
        let err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert!(!is_closed_handle_error(&err));
    }
}
