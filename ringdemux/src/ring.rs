use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use io_uring::types::{Fd, SubmitArgs, Timespec};
use io_uring::{IoUring, opcode, squeue};

use crate::completion::{OpTag, UserData};
use crate::config::Config;

/// Outcome of [`Ring::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// At least one CQE may be ready.
    Ready,
    /// The timeout expired with nothing to reap.
    TimedOut,
    /// A signal interrupted the wait.
    Interrupted,
}

/// Wrapper around IoUring providing SQE submission helpers for the
/// multiplexer's three op kinds.
pub struct Ring {
    ring: IoUring,
}

impl Ring {
    /// Create and configure the io_uring instance.
    pub fn setup(config: &Config) -> io::Result<Self> {
        let cq_entries = config
            .sq_entries
            .checked_mul(4)
            .unwrap_or(config.sq_entries);

        let mut builder = IoUring::builder();
        builder.setup_cqsize(cq_entries);
        builder.setup_coop_taskrun();

        let ring = builder.build(config.sq_entries)?;
        Ok(Ring { ring })
    }

    /// Submit a single-shot recvmsg on a UDP socket.
    ///
    /// The msghdr and everything it points to must stay valid until the CQE
    /// arrives.
    pub fn submit_recvmsg(
        &mut self,
        fd: RawFd,
        msghdr: *mut libc::msghdr,
        socket: u32,
    ) -> io::Result<()> {
        let entry = opcode::RecvMsg::new(Fd(fd), msghdr)
            .build()
            .user_data(UserData::encode(OpTag::RecvMsg, socket).raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Submit an eventfd read (8 bytes).
    pub fn submit_eventfd_read(&mut self, eventfd: RawFd, buf: *mut u8) -> io::Result<()> {
        let entry = opcode::Read::new(Fd(eventfd), buf, 8)
            .build()
            .user_data(UserData::encode(OpTag::EventFdRead, 0).raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Submit an async cancel targeting a specific user_data value.
    pub fn submit_async_cancel(&mut self, target: UserData) -> io::Result<()> {
        let entry = opcode::AsyncCancel::new(target.raw())
            .build()
            .user_data(UserData::encode(OpTag::Cancel, target.socket()).raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Submit pending SQEs and wait for at least one CQE, up to `timeout`.
    /// `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<Wait> {
        let submitter = self.ring.submitter();
        let result = match timeout {
            Some(timeout) => {
                let ts = Timespec::new()
                    .sec(timeout.as_secs())
                    .nsec(timeout.subsec_nanos());
                let args = SubmitArgs::new().timespec(&ts);
                submitter.submit_with_args(1, &args)
            }
            None => submitter.submit_and_wait(1),
        };

        match result {
            Ok(_) => Ok(Wait::Ready),
            Err(e) => match e.raw_os_error() {
                Some(libc::ETIME) => Ok(Wait::TimedOut),
                Some(libc::EINTR) => Ok(Wait::Interrupted),
                // CQ overflow backlog; reaping makes room.
                Some(libc::EBUSY) => Ok(Wait::Ready),
                _ => Err(e),
            },
        }
    }

    /// Submit pending SQEs without waiting.
    pub fn flush(&self) -> io::Result<()> {
        self.ring.submit()?;
        Ok(())
    }

    /// Move every available CQE into `out` as `(user_data, result)`.
    pub fn reap(&mut self, out: &mut Vec<(UserData, i32)>) {
        for cqe in self.ring.completion() {
            out.push((UserData(cqe.user_data()), cqe.result()));
        }
    }

    /// Push an SQE to the submission queue.
    ///
    /// # Safety
    /// The SQE must reference valid memory for the lifetime of the operation.
    unsafe fn push_sqe(&mut self, entry: squeue::Entry) -> io::Result<()> {
        // Try to push; if SQ is full, submit first to make room.
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.ring.submit()?;
                if self.ring.submission().push(&entry).is_err() {
                    return Err(io::Error::other("SQ still full after submit"));
                }
            }
        }
        Ok(())
    }
}
