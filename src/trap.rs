//! Trap (exception/interrupt) classification and delivery.

use crate::csr::{MSTATUS_MIE, MSTATUS_MPIE};
use crate::csr::{MIP_MEIP, MIP_MSIP, MIP_MTIP};
use crate::csr::Csrs;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAccessFault,
    StoreAccessFault,
    EnvironmentCall,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Software,
    Timer,
    External,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Trap {
    /// The exception code, i.e. `mcause` with the interrupt bit stripped.
    pub fn cause(&self) -> u32 {
        match self {
            Trap::Exception(ex) => match ex {
                Exception::InstructionAccessFault => 1,
                Exception::IllegalInstruction => 2,
                Exception::Breakpoint => 3,
                Exception::LoadAccessFault => 5,
                Exception::StoreAccessFault => 7,
                Exception::EnvironmentCall => 11,
            },
            Trap::Interrupt(int) => match int {
                Interrupt::Software => 3,
                Interrupt::Timer => 7,
                Interrupt::External => 11,
            },
        }
    }

    /// The full `mcause` value, with the interrupt bit set for interrupts.
    pub fn mcause(&self) -> u32 {
        match self {
            Trap::Exception(_) => self.cause(),
            Trap::Interrupt(_) => 0x8000_0000 | self.cause(),
        }
    }

    /// Canonical trap name used in trace output (spec section 6).
    pub fn name(&self) -> &'static str {
        match self {
            Trap::Exception(ex) => match ex {
                Exception::InstructionAccessFault => "exception:instruction_fault",
                Exception::IllegalInstruction => "exception:illegal_instruction",
                Exception::LoadAccessFault => "exception:load_fault",
                Exception::StoreAccessFault => "exception:store_fault",
                Exception::EnvironmentCall => "exception:environment_call",
                Exception::Breakpoint => "exception:unknown",
            },
            Trap::Interrupt(int) => match int {
                Interrupt::Software => "interrupt:software",
                Interrupt::Timer => "interrupt:timer",
                Interrupt::External => "interrupt:external",
            },
        }
    }
}

/// Highest-priority pending-and-enabled interrupt, or `None`.
///
/// Priority order (highest first): external, software, timer. Delivery
/// additionally requires `mstatus.MIE` to be set; this is checked by the
/// caller before calling this function, matching the reference's single
/// combined condition.
pub fn select_interrupt(mip: u32, mie: u32) -> Option<Interrupt> {
    let pending = mip & mie;
    if pending & MIP_MEIP != 0 {
        Some(Interrupt::External)
    } else if pending & MIP_MSIP != 0 {
        Some(Interrupt::Software)
    } else if pending & MIP_MTIP != 0 {
        Some(Interrupt::Timer)
    } else {
        None
    }
}

/// Deliver a trap: save `mepc`/`mcause`/`mtval`, fold `MIE` into `MPIE`
/// and clear `MIE`, then return the new `pc`.
///
/// When `mtvec == 0` no handler has been installed, so the fallback is to
/// skip the trapping instruction (`mepc + 4`) rather than vector into
/// address zero and loop forever. This is the one place that skip is
/// applied; the driver loop uses the returned `pc` verbatim.
pub fn deliver(csrs: &mut Csrs, trap: Trap, trapping_pc: u32, tval: u32) -> u32 {
    let prior_mie = csrs.mstatus & MSTATUS_MIE != 0;
    csrs.mstatus &= !MSTATUS_MIE;
    csrs.mstatus &= !MSTATUS_MPIE;
    if prior_mie {
        csrs.mstatus |= MSTATUS_MPIE;
    }

    csrs.mepc = trapping_pc;
    csrs.mcause = trap.mcause();
    csrs.mtval = tval;

    if csrs.mtvec != 0 {
        csrs.mtvec & !0b11
    } else {
        csrs.mepc.wrapping_add(4)
    }
}

/// Restore `mstatus.MIE` from `MPIE` on `mret`, return the resume address.
pub fn mret(csrs: &mut Csrs) -> u32 {
    let mpie = csrs.mstatus & MSTATUS_MPIE != 0;
    csrs.mstatus &= !MSTATUS_MIE;
    if mpie {
        csrs.mstatus |= MSTATUS_MIE;
    }
    csrs.mstatus &= !MSTATUS_MPIE;
    csrs.mepc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_priority_external_first() {
        let mip = MIP_MEIP | MIP_MSIP | MIP_MTIP;
        let mie = mip;
        assert_eq!(select_interrupt(mip, mie), Some(Interrupt::External));
    }

    #[test]
    fn interrupt_priority_software_over_timer() {
        let mip = MIP_MSIP | MIP_MTIP;
        let mie = mip;
        assert_eq!(select_interrupt(mip, mie), Some(Interrupt::Software));
    }

    #[test]
    fn interrupt_requires_enable() {
        assert_eq!(select_interrupt(MIP_MTIP, 0), None);
    }

    #[test]
    fn deliver_saves_mie_into_mpie_and_clears_mie() {
        let mut csrs = Csrs::new();
        csrs.mstatus |= MSTATUS_MIE;
        let new_pc = deliver(&mut csrs, Trap::Exception(Exception::IllegalInstruction), 0x1000, 0xdead);
        assert_eq!(csrs.mstatus & MSTATUS_MIE, 0);
        assert_ne!(csrs.mstatus & MSTATUS_MPIE, 0);
        assert_eq!(csrs.mepc, 0x1000);
        assert_eq!(csrs.mcause, 2);
        assert_eq!(csrs.mtval, 0xdead);
        // mtvec == 0 -> skip to mepc + 4
        assert_eq!(new_pc, 0x1004);
    }

    #[test]
    fn deliver_vectors_when_mtvec_set() {
        let mut csrs = Csrs::new();
        csrs.mtvec = 0x8000_0203;
        let new_pc = deliver(&mut csrs, Trap::Exception(Exception::IllegalInstruction), 0x1000, 0);
        assert_eq!(new_pc, 0x8000_0200);
    }

    #[test]
    fn mret_restores_mie_from_mpie() {
        let mut csrs = Csrs::new();
        csrs.mstatus |= MSTATUS_MPIE;
        csrs.mepc = 0x2000;
        let pc = mret(&mut csrs);
        assert_eq!(pc, 0x2000);
        assert_ne!(csrs.mstatus & MSTATUS_MIE, 0);
        assert_eq!(csrs.mstatus & MSTATUS_MPIE, 0);
    }
}
