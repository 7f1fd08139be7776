//! Intercepts a tracee's filter-install syscall and substitutes the patched
//! program before the kernel gets to see it.

use nix::{errno::Errno, libc};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{
  bpf::{self, DecodeError, INSN_SIZE},
  tracee::TraceeOps,
};

use super::rewriter::{PatchError, ResultDictionary, patch_program};

/// `struct sock_fprog` on LP64: a 16-bit instruction count, padding, then
/// the pointer to the instructions at offset 8.
const SOCK_FPROG_SIZE: usize = 16;
const SOCK_FPROG_FILTER_OFFSET: usize = 8;

#[derive(Debug, Snafu)]
pub enum InstallError {
  #[snafu(display("cannot read filter install request from tracee memory: {source}"))]
  ReadFilter { source: Errno },
  #[snafu(display("cannot write patched filter into tracee memory: {source}"))]
  WriteFilter { source: Errno },
  #[snafu(display("pending filter program is malformed: {source}"))]
  Malformed { source: DecodeError },
  #[snafu(display("pending filter cannot be rewritten: {source}"))]
  Unpatchable { source: PatchError },
}

/// What [`install_patched_seccomp_filter`] did with the pending syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  /// The pending program was patched in place. Once the tracee resumes, the
  /// kernel installs and enforces the rewritten filter.
  Patched { insns: u16 },
  /// The pending syscall is a `prctl`/`seccomp` invocation that does not
  /// install a filter program. Nothing was touched; pass it through.
  NotAFilterInstall,
}

/// The rewrite-and-substitute step, run while `tracee` is stopped at the
/// entry of a `prctl(2)` or `seccomp(2)` syscall: fetch the pending
/// `sock_fprog`, decode it, patch every terminal through `dictionary`, and
/// write the rewritten instructions back over the originals. The byte length
/// is unchanged by patching, so in-place substitution is sound.
pub(super) fn install_patched_seccomp_filter<T: TraceeOps>(
  tracee: &mut T,
  dictionary: &mut ResultDictionary,
) -> Result<InstallOutcome, InstallError> {
  let Some(fprog_addr) = pending_fprog_address(tracee) else {
    return Ok(InstallOutcome::NotAFilterInstall);
  };

  let mut raw_fprog = [0u8; SOCK_FPROG_SIZE];
  tracee
    .read_mem(fprog_addr, &mut raw_fprog)
    .context(ReadFilterSnafu)?;
  let insns = u16::from_ne_bytes([raw_fprog[0], raw_fprog[1]]);
  let mut addr_bytes = [0u8; 8];
  addr_bytes.copy_from_slice(&raw_fprog[SOCK_FPROG_FILTER_OFFSET..]);
  let filter_addr = u64::from_ne_bytes(addr_bytes);

  let mut bytes = vec![0u8; insns as usize * INSN_SIZE];
  tracee
    .read_mem(filter_addr, &mut bytes)
    .context(ReadFilterSnafu)?;
  let mut program = bpf::decode_program(&bytes).context(MalformedSnafu)?;

  patch_program(&mut program, dictionary).context(UnpatchableSnafu)?;

  tracee
    .write_mem(filter_addr, &bpf::encode_program(&program))
    .context(WriteFilterSnafu)?;
  debug!(
    "patched {insns}-instruction filter of tracee {} at {filter_addr:#x}",
    tracee.pid()
  );
  Ok(InstallOutcome::Patched { insns })
}

/// The tracee-side address of the `sock_fprog` argument, if the pending
/// syscall installs a seccomp filter. Filters arrive through
/// `prctl(PR_SET_SECCOMP, SECCOMP_MODE_FILTER, prog)` or
/// `seccomp(SECCOMP_SET_MODE_FILTER, flags, prog)`; everything else,
/// including `SECCOMP_MODE_STRICT`, is not a rewrite target.
fn pending_fprog_address<T: TraceeOps>(tracee: &T) -> Option<u64> {
  let syscallno = tracee.syscall_number();
  if syscallno == libc::SYS_prctl {
    (tracee.syscall_arg(0) == libc::PR_SET_SECCOMP as u64
      && tracee.syscall_arg(1) == libc::SECCOMP_MODE_FILTER as u64)
      .then(|| tracee.syscall_arg(2))
  } else if syscallno == libc::SYS_seccomp {
    (tracee.syscall_arg(0) == libc::SECCOMP_SET_MODE_FILTER as u64)
      .then(|| tracee.syscall_arg(2))
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use hashbrown::HashMap;
  use nix::unistd::Pid;
  use tracing_test::traced_test;

  use super::*;
  use crate::{
    bpf::{BPF_ABS, BPF_JEQ, BPF_JMP, BPF_K, BPF_LD, BPF_RET, BPF_W, jump, stmt},
    seccomp::{SECCOMP_RET_ALLOW, SECCOMP_RET_ERRNO, SECCOMP_RET_TRACE},
  };

  const FPROG_ADDR: u64 = 0x1000;
  const FILTER_ADDR: u64 = 0x2000;

  /// A fake stopped tracee backed by a sparse byte map.
  struct StubTracee {
    syscallno: i64,
    args: [u64; 6],
    memory: HashMap<u64, u8>,
  }

  impl StubTracee {
    fn with_pending_install(syscallno: i64, args: [u64; 6], filter: &[crate::bpf::SockFilter]) -> Self {
      let mut memory = HashMap::new();
      let bytes = bpf::encode_program(filter);
      for (i, b) in bytes.iter().enumerate() {
        memory.insert(FILTER_ADDR + i as u64, *b);
      }
      let mut fprog = [0u8; SOCK_FPROG_SIZE];
      fprog[..2].copy_from_slice(&(filter.len() as u16).to_ne_bytes());
      fprog[SOCK_FPROG_FILTER_OFFSET..].copy_from_slice(&FILTER_ADDR.to_ne_bytes());
      for (i, b) in fprog.iter().enumerate() {
        memory.insert(FPROG_ADDR + i as u64, *b);
      }
      Self {
        syscallno,
        args,
        memory,
      }
    }

    fn stored_program(&self, insns: usize) -> Vec<crate::bpf::SockFilter> {
      let bytes: Vec<u8> = (0..insns * INSN_SIZE)
        .map(|i| self.memory[&(FILTER_ADDR + i as u64)])
        .collect();
      bpf::decode_program(&bytes).unwrap()
    }
  }

  impl TraceeOps for StubTracee {
    fn pid(&self) -> Pid {
      Pid::from_raw(1234)
    }

    fn syscall_number(&self) -> i64 {
      self.syscallno
    }

    fn syscall_arg(&self, idx: usize) -> u64 {
      self.args[idx]
    }

    fn read_mem(&self, addr: u64, buf: &mut [u8]) -> Result<(), Errno> {
      for (i, byte) in buf.iter_mut().enumerate() {
        *byte = *self.memory.get(&(addr + i as u64)).ok_or(Errno::EFAULT)?;
      }
      Ok(())
    }

    fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Errno> {
      for (i, byte) in data.iter().enumerate() {
        self.memory.insert(addr + i as u64, *byte);
      }
      Ok(())
    }
  }

  fn prctl_install_args() -> [u64; 6] {
    [
      libc::PR_SET_SECCOMP as u64,
      libc::SECCOMP_MODE_FILTER as u64,
      FPROG_ADDR,
      0,
      0,
      0,
    ]
  }

  fn deny_one_filter() -> Vec<crate::bpf::SockFilter> {
    vec![
      stmt(BPF_LD | BPF_W | BPF_ABS, 0),
      jump(BPF_JMP | BPF_JEQ | BPF_K, 42, 0, 1),
      stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO | 13),
      stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW),
    ]
  }

  #[traced_test]
  #[test]
  fn patches_prctl_install_in_place() {
    let filter = deny_one_filter();
    let mut tracee =
      StubTracee::with_pending_install(libc::SYS_prctl, prctl_install_args(), &filter);
    let mut dictionary = ResultDictionary::default();

    let outcome = install_patched_seccomp_filter(&mut tracee, &mut dictionary).unwrap();
    assert_eq!(outcome, InstallOutcome::Patched { insns: 4 });

    let stored = tracee.stored_program(4);
    // Non-terminals untouched, terminals now trace with dictionary data.
    assert_eq!(stored[0], filter[0]);
    assert_eq!(stored[1], filter[1]);
    assert_eq!(stored[2].k, SECCOMP_RET_TRACE);
    assert_eq!(stored[3].k, SECCOMP_RET_TRACE | 1);
    assert_eq!(dictionary.lookup(0).as_raw(), SECCOMP_RET_ERRNO | 13);
    assert_eq!(dictionary.lookup(1).as_raw(), SECCOMP_RET_ALLOW);
  }

  #[test]
  fn patches_seccomp_syscall_install() {
    let filter = deny_one_filter();
    let args = [libc::SECCOMP_SET_MODE_FILTER as u64, 0, FPROG_ADDR, 0, 0, 0];
    let mut tracee = StubTracee::with_pending_install(libc::SYS_seccomp, args, &filter);
    let mut dictionary = ResultDictionary::default();

    let outcome = install_patched_seccomp_filter(&mut tracee, &mut dictionary).unwrap();
    assert_eq!(outcome, InstallOutcome::Patched { insns: 4 });
  }

  #[test]
  fn unrelated_syscalls_pass_through() {
    let filter = deny_one_filter();
    // A prctl that is not PR_SET_SECCOMP, and strict-mode seccomp.
    for (syscallno, args) in [
      (
        libc::SYS_prctl,
        [libc::PR_SET_NO_NEW_PRIVS as u64, 1, 0, 0, 0, 0],
      ),
      (
        libc::SYS_prctl,
        [
          libc::PR_SET_SECCOMP as u64,
          libc::SECCOMP_MODE_STRICT as u64,
          0,
          0,
          0,
          0,
        ],
      ),
      (libc::SYS_getpid, [0; 6]),
    ] {
      let mut tracee = StubTracee::with_pending_install(syscallno, args, &filter);
      let mut dictionary = ResultDictionary::default();
      let outcome = install_patched_seccomp_filter(&mut tracee, &mut dictionary).unwrap();
      assert_eq!(outcome, InstallOutcome::NotAFilterInstall);
      assert!(dictionary.is_empty());
      // The stored program is untouched.
      assert_eq!(tracee.stored_program(4), filter);
    }
  }

  #[test]
  fn empty_program_is_rejected() {
    let mut tracee = StubTracee::with_pending_install(libc::SYS_prctl, prctl_install_args(), &[]);
    let mut dictionary = ResultDictionary::default();
    let err = install_patched_seccomp_filter(&mut tracee, &mut dictionary).unwrap_err();
    assert!(matches!(
      err,
      InstallError::Malformed {
        source: DecodeError::Empty,
        ..
      }
    ));
  }

  #[test]
  fn unreadable_filter_memory_is_an_error() {
    let filter = deny_one_filter();
    let mut tracee =
      StubTracee::with_pending_install(libc::SYS_prctl, prctl_install_args(), &filter);
    // Corrupt the fprog so the filter pointer dangles.
    let bogus = 0xdead_0000u64.to_ne_bytes();
    tracee
      .write_mem(FPROG_ADDR + SOCK_FPROG_FILTER_OFFSET as u64, &bogus)
      .unwrap();
    let mut dictionary = ResultDictionary::default();
    let err = install_patched_seccomp_filter(&mut tracee, &mut dictionary).unwrap_err();
    assert!(matches!(
      err,
      InstallError::ReadFilter {
        source: Errno::EFAULT,
        ..
      }
    ));
  }
}
