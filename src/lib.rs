//! Seccomp-bpf filter rewriting for the rewind record-and-replay tracer.
//!
//! A tracee may install its own seccomp filter. From then on the kernel
//! applies that filter's decision to every syscall without notifying the
//! tracer and without leaving any register-visible evidence, which breaks
//! deterministic recording: the tracer would log side effects for syscalls
//! that never ran, or miss kills and denials entirely.
//!
//! This crate intercepts filter installs at syscall entry, rewrites every
//! terminal decision of the supplied program into a trace-to-tracer action
//! carrying a 16-bit token, installs the rewritten program in place, and
//! recovers the original 32-bit decision from the token whenever one of the
//! resulting seccomp stops arrives.

pub mod arch;
pub mod bpf;
pub mod seccomp;
pub mod tracee;

pub use seccomp::{
  InstallOutcome, MAGIC_SKIP_SYSCALLNO, SeccompAction, SeccompFilterRewriter,
};
pub use tracee::{Tracee, TraceeOps};
