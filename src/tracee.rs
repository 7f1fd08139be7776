//! Access to a stopped tracee's registers and memory, plus the per-tracee
//! bookkeeping the skip-syscall sentinel contract revolves around.

use std::{ffi::c_long, mem::MaybeUninit};

use nix::{
  errno::Errno,
  sys::ptrace::{self, AddressType},
  unistd::Pid,
};
use tracing::warn;

use crate::{
  arch::{Regs, RegsExt},
  seccomp::{MAGIC_SKIP_SYSCALLNO, syscall_was_skipped},
};

const WORD_SIZE: usize = size_of::<c_long>();

/// Register and memory access the filter installer needs from a tracee
/// stopped at syscall entry. Implemented over ptrace for live tracees;
/// the seam exists so the installer can be exercised against a fake.
pub trait TraceeOps {
  fn pid(&self) -> Pid;
  /// The number of the pending syscall.
  fn syscall_number(&self) -> i64;
  /// The `idx`-th argument of the pending syscall, `idx < 6`.
  fn syscall_arg(&self, idx: usize) -> u64;
  /// Fills `buf` from the tracee's memory at `addr`.
  fn read_mem(&self, addr: u64, buf: &mut [u8]) -> Result<(), Errno>;
  /// Writes `data` into the tracee's memory at `addr`.
  fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Errno>;
}

/// A tracee stopped in a ptrace syscall-entry stop, with its registers
/// captured at the stop.
pub struct Tracee {
  pid: Pid,
  regs: Regs,
  /// The syscall number the kernel will actually run when this tracee
  /// resumes, consulted at syscall exit to tell real side effects from
  /// suppressed ones.
  original_syscallno: i64,
}

impl Tracee {
  /// Captures the registers of `pid`, which must currently be stopped at
  /// syscall entry under ptrace.
  pub fn at_syscall_entry(pid: Pid) -> Result<Self, Errno> {
    let regs = getregs(pid)?;
    let original_syscallno = regs.syscall_number();
    Ok(Self {
      pid,
      regs,
      original_syscallno,
    })
  }

  /// Arranges for the pending syscall to be treated as not having executed.
  ///
  /// Uses [`MAGIC_SKIP_SYSCALLNO`], never -1: -1 in this field belongs to
  /// the kernel's own signal-delivery bookkeeping.
  pub fn request_skip_syscall(&mut self) {
    self.original_syscallno = MAGIC_SKIP_SYSCALLNO;
  }

  /// Whether the pending syscall's side effects must be treated as
  /// suppressed. A sigreturn restoring the kernel's -1 still records its
  /// real side effects.
  pub fn syscall_skipped(&self) -> bool {
    syscall_was_skipped(self.original_syscallno)
  }

  pub fn original_syscallno(&self) -> i64 {
    self.original_syscallno
  }
}

impl TraceeOps for Tracee {
  fn pid(&self) -> Pid {
    self.pid
  }

  fn syscall_number(&self) -> i64 {
    self.regs.syscall_number()
  }

  fn syscall_arg(&self, idx: usize) -> u64 {
    self.regs.syscall_arg(idx)
  }

  fn read_mem(&self, addr: u64, buf: &mut [u8]) -> Result<(), Errno> {
    let mut address = addr as AddressType;
    let mut copied = 0;
    while copied < buf.len() {
      let word = match ptrace::read(self.pid, address) {
        Err(e) => {
          warn!("Cannot read tracee {} memory {address:?}: {e}", self.pid);
          return Err(e);
        }
        Ok(word) => word,
      };
      let chunk = WORD_SIZE.min(buf.len() - copied);
      buf[copied..copied + chunk].copy_from_slice(&word.to_ne_bytes()[..chunk]);
      copied += chunk;
      address = unsafe { address.add(WORD_SIZE) };
    }
    Ok(())
  }

  fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Errno> {
    let mut address = addr as AddressType;
    let mut written = 0;
    while written < data.len() {
      let remaining = data.len() - written;
      let mut word_bytes = [0u8; WORD_SIZE];
      if remaining >= WORD_SIZE {
        word_bytes.copy_from_slice(&data[written..written + WORD_SIZE]);
      } else {
        // Keep the tracee's bytes past the end of `data` intact.
        word_bytes = ptrace::read(self.pid, address)?.to_ne_bytes();
        word_bytes[..remaining].copy_from_slice(&data[written..]);
      }
      if let Err(e) = ptrace::write(self.pid, address, c_long::from_ne_bytes(word_bytes)) {
        warn!("Cannot write tracee {} memory {address:?}: {e}", self.pid);
        return Err(e);
      }
      written += WORD_SIZE.min(remaining);
      address = unsafe { address.add(WORD_SIZE) };
    }
    Ok(())
  }
}

fn getregs(pid: Pid) -> Result<Regs, Errno> {
  // https://github.com/torvalds/linux/blob/v6.9/include/uapi/linux/elf.h#L378
  // libc crate doesn't provide this constant when using musl libc.
  const NT_PRSTATUS: std::ffi::c_int = 1;

  let mut regs = MaybeUninit::<Regs>::uninit();
  let mut iovec = nix::libc::iovec {
    iov_base: regs.as_mut_ptr() as AddressType,
    iov_len: size_of::<Regs>(),
  };
  let ptrace_result = unsafe {
    nix::libc::ptrace(
      nix::libc::PTRACE_GETREGSET,
      pid.as_raw(),
      NT_PRSTATUS,
      &mut iovec,
    )
  };
  if ptrace_result < 0 {
    return Err(Errno::last());
  }
  if iovec.iov_len != size_of::<Regs>() {
    // A compat (32-bit) tracee reports a shorter register set.
    warn!(
      "tracee {pid} returned a {}-byte register set, expected {}",
      iovec.iov_len,
      size_of::<Regs>()
    );
    return Err(Errno::EINVAL);
  }
  Ok(unsafe { regs.assume_init() })
}
