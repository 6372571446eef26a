use std::collections::HashMap;

/// Outcome returned by metering hooks to indicate whether execution should continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterResult {
    Continue,
    Halt,
}

/// Instruction budget of a simulation.
///
/// Every executed instruction costs one unit. Syscall handlers whose real
/// cost is on the host side charge extra units with `penalize`, so a guest
/// cannot escape its budget by hammering expensive host calls. Nested
/// (preempted) calls keep counting against the same budget.
#[derive(Debug, Clone, Default)]
pub struct InstructionCounter {
    counter: u64,
    max: u64,
}

impl InstructionCounter {
    pub fn new(max: u64) -> Self {
        Self { counter: 0, max }
    }

    pub fn reset(&mut self, max: u64) {
        self.counter = 0;
        self.max = max;
    }

    #[inline]
    pub fn on_instruction(&mut self) -> MeterResult {
        self.counter += 1;
        if self.counter > self.max {
            MeterResult::Halt
        } else {
            MeterResult::Continue
        }
    }

    pub fn penalize(&mut self, amount: u64) {
        self.counter = self.counter.saturating_add(amount);
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.counter)
    }

    pub fn exhausted(&self) -> bool {
        self.counter > self.max
    }
}

/// Samples the program counter once every `interval` instructions.
///
/// The countdown carries over between calls, so short calls that each run
/// fewer than `interval` instructions are still sampled eventually.
#[derive(Debug, Clone)]
pub struct PcSampler {
    interval: u64,
    until_next: u64,
    visited: HashMap<u32, u64>,
}

impl PcSampler {
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        Self { interval, until_next: interval, visited: HashMap::new() }
    }

    #[inline]
    pub fn on_instruction(&mut self, pc: u32) {
        self.until_next -= 1;
        if self.until_next == 0 {
            self.until_next = self.interval;
            *self.visited.entry(pc).or_insert(0) += 1;
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: u64) {
        self.interval = interval.max(1);
        self.until_next = self.until_next.min(self.interval);
    }

    /// Sample counts keyed by pc.
    pub fn visited(&self) -> &HashMap<u32, u64> {
        &self.visited
    }

    pub fn total(&self) -> u64 {
        self.visited.values().sum()
    }

    pub fn clear(&mut self) {
        self.visited.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalties_count_against_the_budget() {
        let mut meter = InstructionCounter::new(10);
        meter.penalize(9);
        assert_eq!(meter.on_instruction(), MeterResult::Continue);
        assert_eq!(meter.remaining(), 0);
        assert_eq!(meter.on_instruction(), MeterResult::Halt);
    }

    #[test]
    fn sampler_counts_every_nth_pc() {
        let mut sampler = PcSampler::new(3);
        for pc in [0x100, 0x104, 0x108, 0x10c, 0x110, 0x108] {
            sampler.on_instruction(pc);
        }
        assert_eq!(sampler.visited().get(&0x108), Some(&2));
        assert_eq!(sampler.total(), 2);

        sampler.clear();
        assert_eq!(sampler.total(), 0);
        assert_eq!(PcSampler::new(0).interval(), 1);
    }
}
