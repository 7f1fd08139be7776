//! Classic-BPF bytecode codec for seccomp filter programs.
//!
//! Decode and encode only. The kernel remains the sole evaluator of these
//! programs; nothing here validates jump targets or interprets instructions.

use snafu::{Snafu, ensure};

/// The maximum number of instructions in one filter program, as enforced by
/// the kernel (`BPF_MAXINSNS` in `linux/bpf_common.h`).
pub const BPF_MAXINSNS: usize = 4096;

// Opcode fields from linux/bpf_common.h. Only the parts this crate inspects
// or its tests assemble are spelled out.
pub const BPF_CLASS_MASK: u16 = 0x07;
pub const BPF_LD: u16 = 0x00;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;

pub const BPF_W: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;

pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;

// Result/operand source for BPF_RET and BPF_JMP.
pub const BPF_RVAL_MASK: u16 = 0x18;
pub const BPF_K: u16 = 0x00;
pub const BPF_X: u16 = 0x08;
pub const BPF_A: u16 = 0x10;

/// One classic-BPF instruction, layout-compatible with the kernel's
/// `struct sock_filter` (`linux/filter.h`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
  pub code: u16,
  pub jt: u8,
  pub jf: u8,
  pub k: u32,
}

/// Byte size of one encoded instruction.
pub const INSN_SIZE: usize = size_of::<SockFilter>();

impl SockFilter {
  pub const fn class(&self) -> u16 {
    self.code & BPF_CLASS_MASK
  }

  /// Where a `BPF_RET` takes its result from: `BPF_K` (the constant in `k`),
  /// the accumulator or the index register.
  pub const fn rval(&self) -> u16 {
    self.code & BPF_RVAL_MASK
  }

  pub const fn is_ret(&self) -> bool {
    self.class() == BPF_RET
  }

  pub fn from_bytes(bytes: [u8; INSN_SIZE]) -> Self {
    Self {
      code: u16::from_ne_bytes([bytes[0], bytes[1]]),
      jt: bytes[2],
      jf: bytes[3],
      k: u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
  }

  pub fn to_bytes(self) -> [u8; INSN_SIZE] {
    let code = self.code.to_ne_bytes();
    let k = self.k.to_ne_bytes();
    [code[0], code[1], self.jt, self.jf, k[0], k[1], k[2], k[3]]
  }
}

/// `BPF_STMT` from `linux/filter.h`.
pub const fn stmt(code: u16, k: u32) -> SockFilter {
  SockFilter {
    code,
    jt: 0,
    jf: 0,
    k,
  }
}

/// `BPF_JUMP` from `linux/filter.h`.
pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
  SockFilter { code, jt, jf, k }
}

/// An assembled filter program, one install request's worth.
pub type BpfProgram = Vec<SockFilter>;

#[derive(Debug, Snafu)]
pub enum DecodeError {
  #[snafu(display("filter byte length {len} is not a multiple of {INSN_SIZE}"))]
  Truncated { len: usize },
  #[snafu(display("filter has no instructions"))]
  Empty,
  #[snafu(display("filter has {len} instructions, kernel maximum is {BPF_MAXINSNS}"))]
  TooLong { len: usize },
}

pub fn decode_program(bytes: &[u8]) -> Result<BpfProgram, DecodeError> {
  ensure!(
    bytes.len().is_multiple_of(INSN_SIZE),
    TruncatedSnafu { len: bytes.len() }
  );
  let count = bytes.len() / INSN_SIZE;
  ensure!(count > 0, EmptySnafu);
  ensure!(count <= BPF_MAXINSNS, TooLongSnafu { len: count });
  Ok(
    bytes
      .chunks_exact(INSN_SIZE)
      .map(|chunk| {
        let mut insn = [0u8; INSN_SIZE];
        insn.copy_from_slice(chunk);
        SockFilter::from_bytes(insn)
      })
      .collect(),
  )
}

pub fn encode_program(program: &[SockFilter]) -> Vec<u8> {
  let mut bytes = Vec::with_capacity(program.len() * INSN_SIZE);
  for insn in program {
    bytes.extend_from_slice(&insn.to_bytes());
  }
  bytes
}
