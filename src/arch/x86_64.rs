use nix::libc::user_regs_struct;

use super::RegsExt;

pub type Regs = user_regs_struct;

impl RegsExt for Regs {
  fn syscall_number(&self) -> i64 {
    self.orig_rax as i64
  }

  fn syscall_arg(&self, idx: usize) -> u64 {
    match idx {
      0 => self.rdi,
      1 => self.rsi,
      2 => self.rdx,
      3 => self.r10,
      4 => self.r8,
      5 => self.r9,
      _ => unimplemented!(),
    }
  }
}
