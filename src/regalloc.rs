//! Register allocation for loop induction variables and function parameters,
//! grounded in `codegen.py`'s `allocate_reg_for`/`remap_reg` and the
//! callee-saved pool it rotates through.

use std::collections::HashMap;

/// Tracks which callee-saved registers are currently assigned to which
/// source-level name, rotating the pool by nesting depth so two sibling or
/// nested loops never collide on the same physical register.
pub struct RegisterAllocator {
    map: HashMap<String, String>,
    pool: &'static [&'static str],
    depth: usize,
}

impl RegisterAllocator {
    pub fn new(pool: &'static [&'static str]) -> Self {
        RegisterAllocator {
            map: HashMap::new(),
            pool,
            depth: 0,
        }
    }

    /// Enter a nested scope (loop body, function body). Rotates the starting
    /// offset into the pool so an inner loop prefers a different register
    /// than its enclosing one even when both ask for "the next free slot".
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    pub fn pop_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Bind `name` to a free register, preferring `name` itself if it is
    /// already a register spelling that happens to be free (`for r12 = 0,10`
    /// honours `r12` directly).
    pub fn allocate(&mut self, name: &str) -> Option<&'static str> {
        if self.pool.contains(&name) && !self.map.values().any(|v| v == name) {
            self.map.insert(name.to_string(), name.to_string());
            return self.pool.iter().find(|r| **r == name).copied();
        }

        let start = self.depth % self.pool.len().max(1);
        for offset in 0..self.pool.len() {
            let candidate = self.pool[(start + offset) % self.pool.len()];
            if !self.map.values().any(|v| v == candidate) {
                self.map.insert(name.to_string(), candidate.to_string());
                return Some(candidate);
            }
        }
        None
    }

    /// The 32-bit sub-register alias of an allocated 64-bit register
    /// (`r12` → `r12d`), used for `dword`-sized loop counters.
    pub fn allocate_dword(&mut self, name: &str) -> Option<String> {
        self.allocate(name).map(|r| format!("{r}d"))
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(|s| s.as_str())
    }

    pub fn release(&mut self, name: &str) {
        self.map.remove(name);
    }
}

/// Break/continue label pair pushed for each enclosing loop.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub break_label: String,
    pub continue_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &[&str] = &["r12", "r13", "r14", "r15", "rbx"];

    #[test]
    fn allocate_gives_distinct_registers() {
        let mut alloc = RegisterAllocator::new(POOL);
        let a = alloc.allocate("i").unwrap();
        let b = alloc.allocate("j").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn nested_scopes_rotate_starting_register() {
        let mut alloc = RegisterAllocator::new(POOL);
        let outer = alloc.allocate("i").unwrap();
        alloc.push_scope();
        let inner = alloc.allocate("j").unwrap();
        assert_ne!(outer, inner);
    }

    #[test]
    fn register_spelled_loop_variable_is_honoured_directly() {
        let mut alloc = RegisterAllocator::new(POOL);
        let r = alloc.allocate("r14").unwrap();
        assert_eq!(r, "r14");
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let mut alloc = RegisterAllocator::new(POOL);
        alloc.allocate("i").unwrap();
        alloc.release("i");
        assert!(alloc.lookup("i").is_none());
    }

    #[test]
    fn dword_alias_suffixes_the_base_register() {
        let mut alloc = RegisterAllocator::new(POOL);
        let r = alloc.allocate_dword("i").unwrap();
        assert!(r.ends_with('d'));
    }
}
