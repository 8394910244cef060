//! Assigns machine registers to the temporaries of one MIR function.
//!
//! Allocation is first-free at a temporary's definition, and the register is
//! released once the temporary's last reader ran. There is no spilling: a
//! function needing more than [`POOL`] registers at once is refused.

use std::collections::HashMap;

use crate::{codegen::Error, mir::Opcode};

/// `AX` and `BP` are kept out of the pool as scratch registers.
pub const POOL: [&str; 13] = [
    "BX", "CX", "DX", "SI", "DI", "R8", "R9", "R10", "R11", "R12", "R13", "R14", "R15",
];

pub struct Allocator {
    last_use: HashMap<u32, usize>,
    assigned: HashMap<u32, usize>,
    busy: [Option<u32>; POOL.len()],
}

impl Allocator {
    pub fn new(body: &[Opcode]) -> Allocator {
        let mut last_use = HashMap::with_capacity(body.len());
        for (at, op) in body.iter().enumerate() {
            for temp in op.temps_read() {
                last_use.insert(temp, at);
            }
        }
        Allocator {
            last_use,
            assigned: HashMap::with_capacity(POOL.len()),
            busy: [None; POOL.len()],
        }
    }

    /// The register holding `temp`.
    pub fn get(&self, temp: u32) -> Result<&'static str, Error> {
        self.assigned
            .get(&temp)
            .map(|&slot| POOL[slot])
            .ok_or_else(|| Error::Logic(format!("t{temp} is read before it is written")))
    }

    /// Gives `temp` a register, keeping the one it already has.
    pub fn define(&mut self, temp: u32) -> Result<&'static str, Error> {
        if let Some(&slot) = self.assigned.get(&temp) {
            self.busy[slot] = Some(temp);
            return Ok(POOL[slot]);
        }
        let Some(slot) = self.busy.iter().position(Option::is_none) else {
            return Err(Error::Logic(format!(
                "no register left for t{temp}, {} are live",
                POOL.len()
            )));
        };
        self.busy[slot] = Some(temp);
        self.assigned.insert(temp, slot);
        Ok(POOL[slot])
    }

    /// Frees the registers of temporaries last read by the opcode at `at`.
    /// They stay readable until [`Allocator::retire`], so a result may reuse
    /// the register of an operand.
    pub fn release_dying(&mut self, at: usize) {
        for (temp, &slot) in &self.assigned {
            if self.last_use.get(temp) == Some(&at) {
                self.busy[slot] = None;
            }
        }
    }

    /// Forgets every temporary which is not read after `at`.
    pub fn retire(&mut self, at: usize) {
        let last_use = &self.last_use;
        let busy = &mut self.busy;
        self.assigned.retain(|temp, slot| {
            let live = last_use.get(temp).is_some_and(|&last| last > at);
            if !live && busy[*slot] == Some(*temp) {
                busy[*slot] = None;
            }
            live
        });
    }

    /// Temporaries holding a register which are still read after `at`.
    pub fn live_after(&self, at: usize) -> Vec<u32> {
        let mut live: Vec<u32> = self
            .busy
            .iter()
            .flatten()
            .copied()
            .filter(|temp| self.last_use.get(temp).is_some_and(|&last| last > at))
            .collect();
        live.sort_unstable();
        live
    }

    /// The temporary occupying `reg`, if any.
    pub fn holder(&self, reg: &str) -> Option<u32> {
        let slot = POOL.iter().position(|r| *r == reg)?;
        self.busy[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::Register;

    fn add(left: Register, right: Register, dst: Register) -> Opcode {
        Opcode::Add { left, right, dst }
    }

    #[test]
    fn results_reuse_dying_operands() {
        let body = [
            Opcode::Mov {
                src: Register::IntLiteral(1),
                dst: Register::temp(0),
            },
            add(Register::temp(0), Register::IntLiteral(2), Register::temp(1)),
            Opcode::Mov {
                src: Register::temp(1),
                dst: Register::local(0),
            },
        ];
        let mut alloc = Allocator::new(&body);

        assert_eq!(alloc.define(0).unwrap(), "BX");
        alloc.retire(0);

        alloc.release_dying(1);
        assert_eq!(alloc.get(0).unwrap(), "BX");
        assert_eq!(alloc.define(1).unwrap(), "BX");
        alloc.retire(1);
        assert!(alloc.get(0).is_err());
        assert_eq!(alloc.get(1).unwrap(), "BX");
        assert_eq!(alloc.live_after(1), [1]);

        alloc.release_dying(2);
        alloc.retire(2);
        assert!(alloc.live_after(2).is_empty());
        assert_eq!(alloc.holder("BX"), None);
    }

    #[test]
    fn runs_out_of_registers() {
        let mut body: Vec<Opcode> = (0..=POOL.len() as u32)
            .map(|t| Opcode::Mov {
                src: Register::IntLiteral(i64::from(t)),
                dst: Register::temp(t),
            })
            .collect();
        body.extend((0..=POOL.len() as u32).map(|t| Opcode::Mov {
            src: Register::temp(t),
            dst: Register::local(t),
        }));
        let mut alloc = Allocator::new(&body);
        for t in 0..POOL.len() as u32 {
            alloc.define(t).unwrap();
        }
        assert_eq!(alloc.holder("DX"), Some(2));
        assert!(matches!(alloc.define(POOL.len() as u32), Err(Error::Logic(_))));
    }
}
