use nix::libc::user_regs_struct;

use super::RegsExt;

pub type Regs = user_regs_struct;

impl RegsExt for Regs {
  fn syscall_number(&self) -> i64 {
    self.regs[8] as i64
  }

  fn syscall_arg(&self, idx: usize) -> u64 {
    match idx {
      0..=5 => self.regs[idx],
      _ => unimplemented!(),
    }
  }
}
