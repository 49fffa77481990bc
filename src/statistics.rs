use crate::ast::COST_TABLE_LEN;
use crate::trap::Trap;
use std::time::Duration;

/// Execution counters and cost metering.
///
/// The interpreter consults [`add_instr`](Self::add_instr) before
/// dispatching every instruction: the instruction's unit cost (1 without a
/// table) is added to the running total, and crossing the configured limit
/// traps before the instruction executes, leaving the counters at the
/// state of the last executed instruction.
#[derive(Debug, Default)]
pub struct Statistics {
    instr_count: u64,
    total_cost: u64,
    cost_table: Option<Box<[u64]>>,
    cost_limit: Option<u64>,
    exec_time: Duration,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions executed across all invocations since the last reset.
    pub fn instr_count(&self) -> u64 {
        self.instr_count
    }

    /// Metered cost accumulated; monotone non-decreasing within an
    /// invocation.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    /// Wall time spent executing, accumulated per invocation.
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    pub fn instr_per_second(&self) -> f64 {
        let secs = self.exec_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.instr_count as f64 / secs
        }
    }

    /// Install a per-opcode cost table, indexed by
    /// [`Instruction::cost_index`](crate::ast::Instruction::cost_index).
    /// Slots beyond the provided length keep the default cost of 1.
    pub fn set_cost_table(&mut self, costs: &[u64]) {
        let mut table = vec![1u64; COST_TABLE_LEN];
        let n = costs.len().min(COST_TABLE_LEN);
        table[..n].copy_from_slice(&costs[..n]);
        self.cost_table = Some(table.into_boxed_slice());
    }

    /// Trap once the accumulated cost would exceed `limit`.
    pub fn set_cost_limit(&mut self, limit: u64) {
        self.cost_limit = Some(limit);
    }

    pub fn clear_cost_limit(&mut self) {
        self.cost_limit = None;
    }

    /// Clear the counters; the cost table and limit survive.
    pub fn reset(&mut self) {
        self.instr_count = 0;
        self.total_cost = 0;
        self.exec_time = Duration::ZERO;
    }

    /// Meter one instruction about to be dispatched.
    #[inline]
    pub(crate) fn add_instr(&mut self, cost_index: usize) -> Result<(), Trap> {
        let cost = match &self.cost_table {
            Some(table) => table.get(cost_index).copied().unwrap_or(1),
            None => 1,
        };
        let next = self.total_cost.saturating_add(cost);
        if let Some(limit) = self.cost_limit {
            if next > limit {
                return Err(Trap::CostLimitExceeded);
            }
        }
        self.total_cost = next;
        self.instr_count += 1;
        Ok(())
    }

    pub(crate) fn add_exec_time(&mut self, elapsed: Duration) {
        self.exec_time += elapsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cost_is_one_per_instruction() {
        let mut stats = Statistics::new();
        for _ in 0..5 {
            stats.add_instr(0x6A).unwrap();
        }
        assert_eq!(stats.instr_count(), 5);
        assert_eq!(stats.total_cost(), 5);
    }

    #[test]
    fn limit_traps_before_execution() {
        let mut stats = Statistics::new();
        stats.set_cost_table(&vec![1; COST_TABLE_LEN]);
        stats.set_cost_limit(3);
        for _ in 0..3 {
            stats.add_instr(0).unwrap();
        }
        assert_eq!(stats.add_instr(0).unwrap_err(), Trap::CostLimitExceeded);
        // Counters reflect the last executed instruction only.
        assert_eq!(stats.instr_count(), 3);
        assert_eq!(stats.total_cost(), 3);
    }

    #[test]
    fn custom_costs_apply_per_opcode() {
        let mut stats = Statistics::new();
        let mut costs = vec![1u64; COST_TABLE_LEN];
        costs[0x6A] = 10;
        stats.set_cost_table(&costs);
        stats.add_instr(0x6A).unwrap();
        stats.add_instr(0x01).unwrap();
        assert_eq!(stats.total_cost(), 11);
        assert_eq!(stats.instr_count(), 2);
    }
}
