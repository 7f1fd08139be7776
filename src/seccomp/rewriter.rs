//! Rewrites seccomp filter programs so every decision traps to the tracer.
//!
//! A filter's terminal instructions normally let the kernel apply a decision
//! (allow, deny with an errno, kill) with no notification to the tracer.
//! Patching every terminal into `SECCOMP_RET_TRACE` makes each decision a
//! ptrace stop instead, and the 16-bit trace payload is an index into a
//! per-session dictionary from which the original 32-bit result is recovered.

use hashbrown::HashMap;
use snafu::{Snafu, ensure};
use tracing::{debug, trace};

use crate::{
  bpf::{BPF_K, BpfProgram},
  seccomp::{SECCOMP_RET_TRACE, SeccompAction},
  tracee::TraceeOps,
};

use super::install::{self, InstallError, InstallOutcome};

#[derive(Debug, Snafu)]
pub enum PatchError {
  /// `BPF_RET` with the accumulator or index register as source: the result
  /// only exists at kernel evaluation time, so no token can stand in for it.
  #[snafu(display(
    "terminal instruction {index} returns a computed value; only constant results can be rewritten"
  ))]
  ComputedResult { index: usize },
  #[snafu(display("filter result dictionary is full (65536 distinct results)"))]
  DictionaryFull,
}

/// Maps each distinct 32-bit filter result to a dense 16-bit index, assigned
/// in first-seen order. Grows for the lifetime of a recording session and
/// never shrinks; filters seen in practice return a handful of constants, so
/// the 16-bit space is plenty.
#[derive(Debug, Default)]
pub struct ResultDictionary {
  result_to_index: HashMap<u32, u16>,
  index_to_result: Vec<u32>,
}

impl ResultDictionary {
  /// Returns the index already assigned to `action`, or assigns the next
  /// free one. Fails only once 65536 distinct results have been seen.
  pub fn get_or_add(&mut self, action: SeccompAction) -> Result<u16, PatchError> {
    if let Some(&index) = self.result_to_index.get(&action.as_raw()) {
      return Ok(index);
    }
    ensure!(
      self.index_to_result.len() <= u16::MAX as usize,
      DictionaryFullSnafu
    );
    let index = self.index_to_result.len() as u16;
    self.index_to_result.push(action.as_raw());
    self.result_to_index.insert(action.as_raw(), index);
    trace!("assigned index {index} to filter result {action}");
    Ok(index)
  }

  /// The result behind `index`.
  ///
  /// Trap payloads are generated exclusively by filters this module
  /// rewrote, so an out-of-range index means corruption or a bug in the
  /// surrounding tracer, never bad input.
  ///
  /// # Panics
  ///
  /// Panics if `index` was never assigned by [`Self::get_or_add`].
  pub fn lookup(&self, index: u16) -> SeccompAction {
    assert!(
      (index as usize) < self.index_to_result.len(),
      "filter result index {index} was never assigned"
    );
    SeccompAction::from_raw(self.index_to_result[index as usize])
  }

  pub fn len(&self) -> usize {
    self.index_to_result.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index_to_result.is_empty()
  }
}

/// Rewrites `program` in place so that every terminal traps to the tracer.
///
/// Non-terminal instructions are copied untouched. Every `BPF_RET | BPF_K`
/// has its constant replaced by `SECCOMP_RET_TRACE | index`; routing results
/// that are already trace actions through the dictionary too keeps every
/// trap payload an index, so the read path needs no disambiguation. Each
/// terminal is replaced one-for-one, which leaves the instruction count and
/// therefore every relative jump target intact.
pub fn patch_program(
  program: &mut BpfProgram,
  dictionary: &mut ResultDictionary,
) -> Result<(), PatchError> {
  for (index, insn) in program.iter_mut().enumerate() {
    if !insn.is_ret() {
      continue;
    }
    ensure!(insn.rval() == BPF_K, ComputedResultSnafu { index });
    let action = SeccompAction::from_raw(insn.k);
    let data = dictionary.get_or_add(action)?;
    debug!("terminal {index}: {action} rewritten to trace({data})");
    insn.k = SECCOMP_RET_TRACE | u32::from(data);
  }
  Ok(())
}

/// Rewrites seccomp filters at install time so that every decision the
/// kernel makes about a tracee's syscall surfaces as a `PTRACE_EVENT_SECCOMP`
/// stop. One instance serves a whole recording session; lookups work for
/// every tracee whose filters it patched.
#[derive(Debug, Default)]
pub struct SeccompFilterRewriter {
  dictionary: ResultDictionary,
}

impl SeccompFilterRewriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// `tracee` must be stopped at the entry of a `prctl` or `seccomp`
  /// syscall that installs a seccomp-bpf filter. Patches the pending
  /// program in place so the kernel enforces the rewritten filter once the
  /// syscall is allowed to proceed.
  pub fn install_patched_seccomp_filter<T: TraceeOps>(
    &mut self,
    tracee: &mut T,
  ) -> Result<InstallOutcome, InstallError> {
    install::install_patched_seccomp_filter(tracee, &mut self.dictionary)
  }

  /// Recovers the decision the original, unpatched filter would have
  /// produced from the 16-bit payload of a seccomp stop.
  pub fn map_filter_data_to_real_result(&self, payload: u16) -> SeccompAction {
    self.dictionary.lookup(payload)
  }
}
