use nix::libc::user_regs_struct;

use super::RegsExt;

pub type Regs = user_regs_struct;

impl RegsExt for Regs {
  fn syscall_number(&self) -> i64 {
    self.a7 as i64
  }

  fn syscall_arg(&self, idx: usize) -> u64 {
    match idx {
      0 => self.a0,
      1 => self.a1,
      2 => self.a2,
      3 => self.a3,
      4 => self.a4,
      5 => self.a5,
      _ => unimplemented!(),
    }
  }
}
