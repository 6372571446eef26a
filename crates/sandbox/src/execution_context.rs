use vm::Cpu;

use crate::error::SandboxError;
use crate::scoped::ScopeMark;

/// One active guest call.
#[derive(Debug, Clone)]
pub struct CallLevel {
    /// Guest function being run.
    pub address: u32,
    pub variants: ScopeMark,
    pub objects: ScopeMark,
    /// Registers of the interrupted caller. `None` for the outermost call,
    /// which starts from a clean stack.
    pub saved: Option<Cpu>,
}

/// The stack of nested guest calls of one sandbox.
///
/// A call pushes a level and pops it when it returns, whether it succeeded
/// or not, so the depth always matches the number of guest functions that
/// are actually running.
#[derive(Debug)]
pub struct CallStack {
    levels: Vec<CallLevel>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self { levels: Vec::with_capacity(max_depth), max_depth }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    /// Fails when one more level would exceed the depth limit.
    pub fn check_room(&self) -> Result<(), SandboxError> {
        if self.levels.len() >= self.max_depth {
            log::error!("call depth limit reached ({} levels)", self.max_depth);
            return Err(SandboxError::RecursionLimitExceeded(self.max_depth));
        }
        Ok(())
    }

    pub fn push(&mut self, level: CallLevel) -> Result<(), SandboxError> {
        self.check_room()?;
        self.levels.push(level);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CallLevel> {
        self.levels.pop()
    }

    pub fn current(&self) -> Option<&CallLevel> {
        self.levels.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(address: u32) -> CallLevel {
        CallLevel { address, variants: ScopeMark::default(), objects: ScopeMark::default(), saved: None }
    }

    #[test]
    fn depth_is_bounded() {
        let mut stack = CallStack::new(2);
        stack.push(level(0x100)).unwrap();
        stack.push(level(0x200)).unwrap();
        assert_eq!(stack.push(level(0x300)), Err(SandboxError::RecursionLimitExceeded(2)));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().map(|l| l.address), Some(0x200));
        stack.pop();
        stack.pop();
        assert!(stack.is_empty());
        assert!(stack.pop().is_none());
    }
}
