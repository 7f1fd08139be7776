//! The seccomp action model and the filter-rewriting subsystem.
//!
//! Terminology follows `linux/seccomp.h`: a filter's `BPF_RET` yields a
//! 32-bit result whose high bits pick the action class and whose low 16 bits
//! carry action-specific data.

use std::fmt;

mod install;
mod rewriter;

pub use install::{InstallError, InstallOutcome};
pub use rewriter::{PatchError, ResultDictionary, SeccompFilterRewriter, patch_program};

// Action classes from linux/seccomp.h.
pub const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
pub const SECCOMP_RET_KILL_THREAD: u32 = 0x0000_0000;
pub const SECCOMP_RET_TRAP: u32 = 0x0003_0000;
pub const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
pub const SECCOMP_RET_USER_NOTIF: u32 = 0x7fc0_0000;
pub const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;
pub const SECCOMP_RET_LOG: u32 = 0x7ffc_0000;
pub const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

pub const SECCOMP_RET_ACTION_FULL: u32 = 0xffff_0000;
pub const SECCOMP_RET_DATA: u32 = 0x0000_ffff;

/// When seccomp suppresses a syscall the kernel returns to userspace without
/// touching the registers, so there is no evidence the syscall's side effects
/// never happened. The same kernel mechanism that skips the syscall can be
/// driven from the tracer through the saved "original syscall number", but
/// the traditional value -1 is off limits: the kernel itself parks -1 there
/// while delivering a signal, and sigreturn restores it on the way out.
/// Mistaking that restore for "skip" would drop sigreturn's real side effects
/// from the recording. -2 still makes the kernel skip the syscall and is
/// never generated by the kernel on its own.
pub const MAGIC_SKIP_SYSCALLNO: i64 = -2;

/// Whether a saved original-syscall-number value carries our skip request.
///
/// -1 must not count as skipped, see [`MAGIC_SKIP_SYSCALLNO`].
pub const fn syscall_was_skipped(original_syscallno: i64) -> bool {
  original_syscallno == MAGIC_SKIP_SYSCALLNO
}

/// A 32-bit seccomp filter result. Produced only by decoding an existing
/// filter program; arbitrary values round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SeccompAction(u32);

impl SeccompAction {
  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  pub const fn as_raw(self) -> u32 {
    self.0
  }

  /// The action class, e.g. [`SECCOMP_RET_ALLOW`] or [`SECCOMP_RET_ERRNO`].
  pub const fn class(self) -> u32 {
    self.0 & SECCOMP_RET_ACTION_FULL
  }

  /// The action-specific payload: the errno for `SECCOMP_RET_ERRNO`, the
  /// trap/trace data otherwise.
  pub const fn data(self) -> u16 {
    (self.0 & SECCOMP_RET_DATA) as u16
  }
}

impl fmt::Display for SeccompAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.class() {
      SECCOMP_RET_ALLOW => write!(f, "allow"),
      SECCOMP_RET_ERRNO => write!(f, "errno({})", self.data()),
      SECCOMP_RET_KILL_THREAD => write!(f, "kill-thread"),
      SECCOMP_RET_KILL_PROCESS => write!(f, "kill-process"),
      SECCOMP_RET_TRAP => write!(f, "trap({})", self.data()),
      SECCOMP_RET_TRACE => write!(f, "trace({})", self.data()),
      SECCOMP_RET_LOG => write!(f, "log"),
      SECCOMP_RET_USER_NOTIF => write!(f, "user-notif"),
      _ => write!(f, "{:#010x}", self.0),
    }
  }
}
