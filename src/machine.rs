//! The owning aggregate: register file, CSRs, memory bus, program counter,
//! and the per-step driver sequence.
//!
//! All CPU state that the original C kept as process-wide globals lives
//! here as one struct passed explicitly to every helper (decode, exec,
//! trap delivery) — no hidden singletons.

use std::io::{Read, Write};

use crate::csr::{Csrs, MIP_MEIP, MIP_MSIP, MIP_MTIP, MSTATUS_MIE};
use crate::exec::{self, TrapSignal};
use crate::hex::HexImage;
use crate::memory::{self, MemBus};
use crate::registers::Registers;
use crate::trap::{self, select_interrupt, Exception, Trap};
use crate::uart::Uart;

/// One line of output produced by a single [`Machine::step`] call.
pub enum StepEvent {
    /// A normal instruction retired; carries the full `0x<pc>:...` line.
    Instruction(String),
    /// A trap was delivered; carries the full `>name ... cause=...` line.
    Trapped(String),
    /// Two consecutive identical traps: the simulator halts.
    FatalDoubleFault,
}

pub struct Machine<R: Read, W: Write> {
    pub regs: Registers,
    pub csrs: Csrs,
    pub mem: MemBus<R, W>,
    pub pc: u32,
    pub halted: bool,
    last_trap: Option<(u32, u32)>,
}

impl<R: Read, W: Write> Machine<R, W> {
    pub fn new(uart: Uart<R, W>, entry_pc: u32) -> Self {
        Self {
            regs: Registers::new(),
            csrs: Csrs::new(),
            mem: MemBus::new(uart),
            pc: entry_pc,
            halted: false,
            last_trap: None,
        }
    }

    /// Write a parsed hex image's bytes into RAM. Out-of-range bytes are
    /// dropped by `write_byte`'s own bounds check, matching the
    /// reference's silent-discard policy.
    pub fn load_image(&mut self, image: &HexImage) {
        for placement in &image.placements {
            let _ = self.mem.write_byte(placement.address, placement.byte);
        }
    }

    /// `mip`, snapshotted once per iteration from CLINT/PLIC state before
    /// fetch, so interrupt-controller state and the executor never hold
    /// pointers into each other.
    pub fn mip(&self) -> u32 {
        let mut mip = 0;
        if self.mem.clint.software_pending() {
            mip |= MIP_MSIP;
        }
        if self.mem.clint.timer_pending() {
            mip |= MIP_MTIP;
        }
        if self.mem.plic.external_pending() {
            mip |= MIP_MEIP;
        }
        mip
    }

    fn fetch(&self) -> Result<u32, TrapSignal> {
        if self.pc % 4 != 0 || !memory::ram_covers(self.pc, 4) {
            return Err(TrapSignal {
                trap: Trap::Exception(Exception::InstructionAccessFault),
                tval: self.pc,
            });
        }
        let base = (self.pc - memory::RAM_BASE) as usize;
        Ok(u32::from_le_bytes(
            self.mem.ram[base..base + 4].try_into().unwrap(),
        ))
    }

    /// Run exactly one driver-loop iteration: tick `mtime`, refresh `mip`,
    /// check for a pending interrupt, then either deliver a trap or
    /// fetch-decode-execute one instruction.
    pub fn step(&mut self) -> StepEvent {
        self.mem.clint.tick();
        let mip = self.mip();

        let pending_interrupt = if self.csrs.mstatus & MSTATUS_MIE != 0 {
            select_interrupt(mip, self.csrs.mie).map(Trap::Interrupt)
        } else {
            None
        };

        let signal = match pending_interrupt {
            Some(trap) => Some(TrapSignal { trap, tval: 0 }),
            None => match self.fetch() {
                Ok(instr) => {
                    match exec::execute(instr, self.pc, &mut self.regs, &mut self.csrs, &mut self.mem, mip) {
                        Ok(completed) => {
                            self.regs.write(0, 0);
                            let line = format!("0x{:08x}:{}", self.pc, completed.trace);
                            self.pc = completed.new_pc.unwrap_or(self.pc.wrapping_add(4));
                            if completed.halt {
                                self.halted = true;
                            }
                            return StepEvent::Instruction(line);
                        }
                        Err(signal) => Some(signal),
                    }
                }
                Err(signal) => Some(signal),
            },
        };

        let signal = signal.expect("a trap signal is always present on this path");
        let trapping_pc = self.pc;
        let mcause = signal.trap.mcause();

        if self.last_trap == Some((trapping_pc, mcause)) {
            self.halted = true;
            return StepEvent::FatalDoubleFault;
        }
        self.last_trap = Some((trapping_pc, mcause));

        let trap_name = signal.trap.name();
        self.pc = trap::deliver(&mut self.csrs, signal.trap, trapping_pc, signal.tval);
        self.regs.write(0, 0);
        let line = format!(
            ">{trap_name}{:19}cause=0x{:08x},epc=0x{:08x},tval=0x{:08x}",
            "",
            self.csrs.mcause,
            self.csrs.mepc,
            self.csrs.mtval,
        );
        StepEvent::Trapped(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;
    use std::io::Cursor;

    fn machine_from_hex(text: &str) -> Machine<Cursor<Vec<u8>>, Vec<u8>> {
        let image = hex::parse(text);
        let uart = Uart::new(Cursor::new(Vec::new()), Vec::new());
        let mut m = Machine::new(uart, image.entry_pc);
        m.load_image(&image);
        m
    }

    #[test]
    fn addi_scenario_matches_exact_trace_line() {
        let mut m = machine_from_hex("@80000000 93 00 10 00");
        match m.step() {
            StepEvent::Instruction(line) => {
                assert_eq!(
                    line,
                    "0x80000000:addi   ra,zero,0x1       ra=0x00000000+0x00000001=0x00000001"
                );
            }
            _ => panic!("expected an instruction line"),
        }
        assert_eq!(m.regs.read(1), 1);
        assert_eq!(m.pc, 0x8000_0004);
    }

    #[test]
    fn nop_times_three_then_ebreak_halts_with_mcause_three() {
        let mut m = machine_from_hex("@80000000 13 00 00 00 13 00 00 00 13 00 00 00 73 00 10 00");
        for _ in 0..3 {
            match m.step() {
                StepEvent::Instruction(_) => {}
                _ => panic!("expected nop instruction lines"),
            }
        }
        match m.step() {
            StepEvent::Instruction(line) => assert_eq!(line, "0x8000000c:ebreak"),
            _ => panic!("expected the ebreak line"),
        }
        assert!(m.halted);
        assert_eq!(m.csrs.mcause, 3);
    }

    #[test]
    fn jal_updates_pc_and_link_register() {
        let mut m = machine_from_hex("@80000000 ef 00 40 00");
        m.step();
        assert_eq!(m.pc, 0x8000_0004);
        assert_eq!(m.regs.read(1), 0x8000_0004);
    }

    #[test]
    fn illegal_instruction_traces_and_skips_to_next_word() {
        let mut m = machine_from_hex("@80000000 00 00 00 00");
        match m.step() {
            StepEvent::Trapped(line) => {
                assert_eq!(
                    line,
                    ">exception:illegal_instruction                   cause=0x00000002,epc=0x80000000,tval=0x00000000"
                );
            }
            _ => panic!("expected a trap line"),
        }
        assert_eq!(m.pc, 0x8000_0004);
    }

    #[test]
    fn store_byte_to_uart_sets_plic_pending() {
        let mut m = machine_from_hex("");
        m.mem.write_byte(0x10000000, 0x41).unwrap();
        assert!(!m.mem.plic.external_pending());
        m.mem
            .plic
            .write_word(crate::plic::ENABLE_OFFSET, 1 << crate::plic::UART_IRQ);
        assert!(m.mem.plic.external_pending());
    }

    #[test]
    fn timer_interrupt_fires_once_mtime_reaches_mtimecmp() {
        let mut m = machine_from_hex("@80000000 13 00 00 00");
        m.mem.clint.write_word(crate::clint::MTIMECMP_LO_OFFSET, 5);
        m.csrs.mie |= MIP_MTIP;
        m.csrs.mstatus |= MSTATUS_MIE;
        let mut saw_timer_trap = false;
        for _ in 0..10 {
            if let StepEvent::Trapped(line) = m.step() {
                assert!(line.starts_with(">interrupt:timer"));
                saw_timer_trap = true;
                break;
            }
        }
        assert!(saw_timer_trap);
    }

    #[test]
    fn double_fault_halts_with_fatal_event() {
        // mtvec vectors straight back onto the same illegal word, so every
        // trap re-faults at the same (mepc, mcause) pair.
        let mut m = machine_from_hex("@80000000 00 00 00 00");
        m.csrs.mtvec = 0x8000_0000;
        match m.step() {
            StepEvent::Trapped(_) => {}
            _ => panic!("expected first trap"),
        }
        match m.step() {
            StepEvent::FatalDoubleFault => {}
            _ => panic!("expected fatal double fault"),
        }
        assert!(m.halted);
    }
}
