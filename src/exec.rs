//! Instruction execution and the exact per-mnemonic trace text.
//!
//! Trace format strings are transcribed column-for-column from
//! `examples/original_source/poxim.c`'s `decode_and_execute`, which is
//! the reference this simulator's trace output is diffed against. Each
//! executor reads its operands before doing anything else (`original_rs1`
//! / `original_rs2` in the reference) and only calls `regs.write` once the
//! result is fully computed, so a mid-instruction fault (propagated via
//! `?`) never leaves a partial write behind.

use std::io::{Read, Write};

use crate::csr;
use crate::decode::*;
use crate::memory::MemBus;
use crate::registers::Registers;
use crate::trap::{mret as trap_mret, Exception, Trap};

pub struct TrapSignal {
    pub trap: Trap,
    pub tval: u32,
}

impl From<crate::memory::MemFault> for TrapSignal {
    fn from(fault: crate::memory::MemFault) -> Self {
        let ex = if fault.cause == 5 {
            Exception::LoadAccessFault
        } else {
            Exception::StoreAccessFault
        };
        TrapSignal {
            trap: Trap::Exception(ex),
            tval: fault.tval,
        }
    }
}

fn illegal(instr: u32) -> TrapSignal {
    TrapSignal {
        trap: Trap::Exception(Exception::IllegalInstruction),
        tval: instr,
    }
}

/// Outcome of a successfully decoded instruction (it may still be a halt,
/// as with `ebreak`, which produces an ordinary trace line rather than a
/// `>`-prefixed trap line).
pub struct Completed {
    pub trace: String,
    /// `Some(pc)` when the instruction set the program counter itself
    /// (jumps, taken branches, `mret`); `None` means the caller should
    /// advance by 4.
    pub new_pc: Option<u32>,
    pub halt: bool,
}

fn completed(trace: String) -> ExecResult {
    Ok(Completed {
        trace,
        new_pc: None,
        halt: false,
    })
}

fn jumped(new_pc: u32, trace: String) -> ExecResult {
    Ok(Completed {
        trace,
        new_pc: Some(new_pc),
        halt: false,
    })
}

pub type ExecResult = Result<Completed, TrapSignal>;

pub fn execute<R: Read, W: Write>(
    instr: u32,
    pc: u32,
    regs: &mut Registers,
    csrs: &mut csr::Csrs,
    mem: &mut MemBus<R, W>,
    mip: u32,
) -> ExecResult {
    let op = opcode(instr);
    let rd_i = rd(instr);
    let rs1_i = rs1(instr);
    let rs2_i = rs2(instr);
    let f3 = funct3(instr);
    let f7 = funct7(instr);

    let rs1_val = regs.read(rs1_i);
    let rs2_val = regs.read(rs2_i);
    let rd_name = reg_name(rd_i);
    let rs1_name = reg_name(rs1_i);
    let rs2_name = reg_name(rs2_i);

    match op {
        0x37 => {
            // LUI
            let imm = imm_u(instr) as u32;
            regs.write(rd_i, imm);
            let result = regs.read(rd_i);
            completed(format!(
                "lui    {rd_name},0x{:05x}          {rd_name}=0x{result:08x}",
                (imm >> 12) & 0xFFFFF
            ))
        }
        0x17 => {
            // AUIPC
            let imm = imm_u(instr) as u32;
            regs.write(rd_i, pc.wrapping_add(imm));
            let result = regs.read(rd_i);
            completed(format!(
                "auipc  {rd_name},0x{:05x}          {rd_name}=0x{pc:08x}+0x{imm:08x}=0x{result:08x}",
                (imm >> 12) & 0xFFFFF
            ))
        }
        0x6F => {
            // JAL
            let imm = imm_j(instr);
            let new_pc = pc.wrapping_add(imm as u32);
            regs.write(rd_i, pc.wrapping_add(4));
            let result = regs.read(rd_i);
            let trace = format!(
                "jal    {rd_name},0x{:05x}        pc=0x{new_pc:08x},{rd_name}=0x{result:08x}",
                (imm as u32) & 0x1FFFFF
            );
            jumped(new_pc, trace)
        }
        0x67 => {
            // JALR
            if f3 != 0 {
                return Err(illegal(instr));
            }
            let imm = imm_i(instr);
            let new_pc = rs1_val.wrapping_add(imm as u32) & !1;
            regs.write(rd_i, pc.wrapping_add(4));
            let result = regs.read(rd_i);
            let trace = format!(
                "jalr   {rd_name},{rs1_name},0x{:03x}       pc=0x{rs1_val:08x}+0x{:08x},{rd_name}=0x{result:08x}",
                (imm as u32) & 0xFFF,
                imm as u32,
            );
            jumped(new_pc, trace)
        }
        0x63 => exec_branch(instr, pc, f3, rs1_i, rs2_i, rs1_val, rs2_val),
        0x03 => exec_load(instr, f3, rd_i, rs1_i, rs1_val, regs, mem),
        0x23 => exec_store(instr, f3, rs1_i, rs2_i, rs1_val, rs2_val, mem),
        0x13 => exec_op_imm(instr, f3, rd_i, rs1_i, rs1_val, regs),
        0x33 => exec_op(instr, f3, f7, rd_i, rs1_i, rs2_i, rs1_val, rs2_val, regs),
        0x73 => exec_system(instr, pc, f3, rd_i, rs1_i, rs1_val, csrs, mip, regs),
        0x0F => match f3 {
            0x0 => completed("fence".to_string()),
            0x1 => completed("fence.i".to_string()),
            _ => Err(illegal(instr)),
        },
        _ => Err(illegal(instr)),
    }
}

fn exec_branch(
    instr: u32,
    pc: u32,
    f3: u32,
    rs1_i: u8,
    rs2_i: u8,
    rs1_val: u32,
    rs2_val: u32,
) -> ExecResult {
    let imm = imm_b(instr);
    let (name, op_str, taken, unsigned) = match f3 {
        0x0 => ("beq", "==", rs1_val == rs2_val, false),
        0x1 => ("bne", "!=", rs1_val != rs2_val, false),
        0x4 => ("blt", "<", (rs1_val as i32) < (rs2_val as i32), false),
        0x5 => ("bge", ">=", (rs1_val as i32) >= (rs2_val as i32), false),
        0x6 => ("bltu", "<", rs1_val < rs2_val, true),
        0x7 => ("bgeu", ">=", rs1_val >= rs2_val, true),
        _ => return Err(illegal(instr)),
    };
    let new_pc = if taken {
        pc.wrapping_add(imm as u32)
    } else {
        pc.wrapping_add(4)
    };
    // Not-taken branches print the branch instruction's own address, not
    // the fall-through pc; the driver loop advances past it afterward.
    let traced_pc = if taken { new_pc } else { pc };
    let u = if unsigned { "u" } else { "" };
    let trace = format!(
        "{name:<7}{},{},0x{:03x}       ({u}(0x{rs1_val:08x}){op_str}{u}(0x{rs2_val:08x}))={}->pc=0x{traced_pc:08x}",
        reg_name(rs1_i),
        reg_name(rs2_i),
        (imm as u32) & 0x1FFF,
        taken as u32,
    );
    jumped(new_pc, trace)
}

fn exec_load<R: Read, W: Write>(
    instr: u32,
    f3: u32,
    rd_i: u8,
    rs1_i: u8,
    rs1_val: u32,
    regs: &mut Registers,
    mem: &mut MemBus<R, W>,
) -> ExecResult {
    let imm = imm_i(instr);
    let addr = rs1_val.wrapping_add(imm as u32);
    let (name, value): (&str, u32) = match f3 {
        0x0 => ("lb", mem.read_byte(addr)? as i8 as i32 as u32),
        0x1 => ("lh", mem.read_halfword(addr)? as i16 as i32 as u32),
        0x2 => ("lw", mem.read_word(addr)?),
        0x4 => ("lbu", mem.read_byte(addr)? as u32),
        0x5 => ("lhu", mem.read_halfword(addr)? as u32),
        _ => return Err(illegal(instr)),
    };
    regs.write(rd_i, value);
    let rd_name = reg_name(rd_i);
    let rd_val = regs.read(rd_i);
    let trace = format!(
        "{name:<7}{rd_name},0x{:03x}({})      {rd_name}=mem[0x{addr:08x}]=0x{rd_val:08x}",
        (imm as u32) & 0xFFF,
        reg_name(rs1_i),
    );
    completed(trace)
}

fn exec_store<R: Read, W: Write>(
    instr: u32,
    f3: u32,
    rs1_i: u8,
    rs2_i: u8,
    rs1_val: u32,
    rs2_val: u32,
    mem: &mut MemBus<R, W>,
) -> ExecResult {
    let imm = imm_s(instr);
    let addr = rs1_val.wrapping_add(imm as u32);
    let trace = match f3 {
        0x0 => {
            mem.write_byte(addr, rs2_val as u8)?;
            format!(
                "sb     {},0x{:03x}({})        mem[0x{addr:08x}]=0x{:02x}",
                reg_name(rs2_i),
                (imm as u32) & 0xFFF,
                reg_name(rs1_i),
                rs2_val & 0xFF
            )
        }
        0x1 => {
            mem.write_halfword(addr, rs2_val as u16)?;
            format!(
                "sh     {},0x{:03x}({})        mem[0x{addr:08x}]=0x{:04x}",
                reg_name(rs2_i),
                (imm as u32) & 0xFFF,
                reg_name(rs1_i),
                rs2_val & 0xFFFF
            )
        }
        0x2 => {
            mem.write_word(addr, rs2_val)?;
            format!(
                "sw     {},0x{:03x}({})        mem[0x{addr:08x}]=0x{rs2_val:08x}",
                reg_name(rs2_i),
                (imm as u32) & 0xFFF,
                reg_name(rs1_i),
            )
        }
        _ => return Err(illegal(instr)),
    };
    completed(trace)
}

fn exec_op_imm(
    instr: u32,
    f3: u32,
    rd_i: u8,
    rs1_i: u8,
    rs1_val: u32,
    regs: &mut Registers,
) -> ExecResult {
    let imm = imm_i(instr);
    let rd_name = reg_name(rd_i);
    let rs1_name = reg_name(rs1_i);
    let trace = match f3 {
        0x0 => {
            let value = rs1_val.wrapping_add(imm as u32);
            regs.write(rd_i, value);
            format!(
                "addi   {rd_name},{rs1_name},0x{:x}       {rd_name}=0x{rs1_val:08x}+0x{:08x}=0x{value:08x}",
                imm, imm as u32
            )
        }
        0x1 => {
            let shamt = (imm as u32) & 0x1F;
            let value = rs1_val << shamt;
            regs.write(rd_i, value);
            format!(
                "slli   {rd_name},{rs1_name},{shamt}          {rd_name}=0x{rs1_val:08x}<<{shamt}=0x{value:08x}"
            )
        }
        0x2 => {
            let value = ((rs1_val as i32) < imm) as u32;
            regs.write(rd_i, value);
            format!(
                "slti   {rd_name},{rs1_name},{imm}       {rd_name}=(0x{rs1_val:08x}<{imm})={value}"
            )
        }
        0x3 => {
            let value = (rs1_val < imm as u32) as u32;
            regs.write(rd_i, value);
            format!(
                "sltiu  {rd_name},{rs1_name},{imm}       {rd_name}=(0x{rs1_val:08x}<{})={value}",
                imm as u32
            )
        }
        0x4 => {
            let value = rs1_val ^ imm as u32;
            regs.write(rd_i, value);
            format!(
                "xori   {rd_name},{rs1_name},0x{:03x}       {rd_name}=0x{rs1_val:08x}^0x{:03x}=0x{value:08x}",
                (imm as u32) & 0xFFF,
                (imm as u32) & 0xFFF
            )
        }
        0x5 => {
            let shamt = (imm as u32) & 0x1F;
            if instr >> 30 == 0 {
                let value = rs1_val >> shamt;
                regs.write(rd_i, value);
                format!(
                    "srli   {rd_name},{rs1_name},{shamt}          {rd_name}=0x{rs1_val:08x}>>{shamt}=0x{value:08x}"
                )
            } else {
                let value = ((rs1_val as i32) >> shamt) as u32;
                regs.write(rd_i, value);
                format!(
                    "srai   {rd_name},{rs1_name},{shamt}          {rd_name}=0x{rs1_val:08x}>>>{shamt}=0x{value:08x}"
                )
            }
        }
        0x6 => {
            let value = rs1_val | imm as u32;
            regs.write(rd_i, value);
            format!(
                "ori    {rd_name},{rs1_name},0x{:03x}       {rd_name}=0x{rs1_val:08x}|0x{:03x}=0x{value:08x}",
                (imm as u32) & 0xFFF,
                (imm as u32) & 0xFFF
            )
        }
        0x7 => {
            let value = rs1_val & imm as u32;
            regs.write(rd_i, value);
            format!(
                "andi   {rd_name},{rs1_name},0x{:03x}       {rd_name}=0x{rs1_val:08x}&0x{:03x}=0x{value:08x}",
                (imm as u32) & 0xFFF,
                (imm as u32) & 0xFFF
            )
        }
        _ => return Err(illegal(instr)),
    };
    completed(trace)
}

#[allow(clippy::too_many_arguments)]
fn exec_op(
    instr: u32,
    f3: u32,
    f7: u32,
    rd_i: u8,
    rs1_i: u8,
    rs2_i: u8,
    rs1_val: u32,
    rs2_val: u32,
    regs: &mut Registers,
) -> ExecResult {
    let rd_name = reg_name(rd_i);
    let rs1_name = reg_name(rs1_i);
    let rs2_name = reg_name(rs2_i);

    if f7 == 0x01 {
        let (mnemonic, op_str, value): (&str, &str, u32) = match f3 {
            0x0 => (
                "mul",
                "*",
                ((rs1_val as i32).wrapping_mul(rs2_val as i32)) as u32,
            ),
            0x1 => (
                "mulh",
                "*",
                (((rs1_val as i32 as i64).wrapping_mul(rs2_val as i32 as i64)) >> 32) as u32,
            ),
            0x2 => (
                "mulhsu",
                "*",
                (((rs1_val as i32 as i64).wrapping_mul(rs2_val as u64 as i64)) >> 32) as u32,
            ),
            0x3 => (
                "mulhu",
                "*",
                (((rs1_val as u64).wrapping_mul(rs2_val as u64)) >> 32) as u32,
            ),
            0x4 => (
                "div",
                "/",
                if rs2_val == 0 {
                    0xFFFF_FFFF
                } else if rs1_val == 0x8000_0000 && rs2_val == 0xFFFF_FFFF {
                    0x8000_0000
                } else {
                    ((rs1_val as i32).wrapping_div(rs2_val as i32)) as u32
                },
            ),
            0x5 => (
                "divu",
                "/",
                if rs2_val == 0 {
                    0xFFFF_FFFF
                } else {
                    rs1_val / rs2_val
                },
            ),
            0x6 => (
                "rem",
                "%",
                if rs2_val == 0 {
                    rs1_val
                } else if rs1_val == 0x8000_0000 && rs2_val == 0xFFFF_FFFF {
                    0
                } else {
                    ((rs1_val as i32).wrapping_rem(rs2_val as i32)) as u32
                },
            ),
            0x7 => (
                "remu",
                "%",
                if rs2_val == 0 {
                    rs1_val
                } else {
                    rs1_val % rs2_val
                },
            ),
            _ => return Err(illegal(instr)),
        };
        regs.write(rd_i, value);
        let trace = format!(
            "{mnemonic:<7}{rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}{op_str}0x{rs2_val:08x}=0x{value:08x}"
        );
        return completed(trace);
    }

    let shamt = rs2_val & 0x1F;
    let trace = match f3 {
        0x0 => {
            if f7 == 0x20 {
                let value = rs1_val.wrapping_sub(rs2_val);
                regs.write(rd_i, value);
                format!(
                    "sub    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}-0x{rs2_val:08x}=0x{value:08x}"
                )
            } else if f7 == 0x00 {
                let value = rs1_val.wrapping_add(rs2_val);
                regs.write(rd_i, value);
                format!(
                    "add    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}+0x{rs2_val:08x}=0x{value:08x}"
                )
            } else {
                return Err(illegal(instr));
            }
        }
        0x1 => {
            let value = rs1_val << shamt;
            regs.write(rd_i, value);
            format!(
                "sll    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}<<{shamt}=0x{value:08x}"
            )
        }
        0x2 => {
            let value = ((rs1_val as i32) < (rs2_val as i32)) as u32;
            regs.write(rd_i, value);
            format!(
                "slt    {rd_name},{rs1_name},{rs2_name}         {rd_name}=(0x{rs1_val:08x}<0x{rs2_val:08x})={value}"
            )
        }
        0x3 => {
            let value = (rs1_val < rs2_val) as u32;
            regs.write(rd_i, value);
            format!(
                "sltu   {rd_name},{rs1_name},{rs2_name}         {rd_name}=(0x{rs1_val:08x}<0x{rs2_val:08x})={value}"
            )
        }
        0x4 => {
            let value = rs1_val ^ rs2_val;
            regs.write(rd_i, value);
            format!(
                "xor    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}^0x{rs2_val:08x}=0x{value:08x}"
            )
        }
        0x5 => {
            if f7 == 0x20 {
                let value = ((rs1_val as i32) >> shamt) as u32;
                regs.write(rd_i, value);
                format!(
                    "sra    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}>>>{shamt}=0x{value:08x}"
                )
            } else if f7 == 0x00 {
                let value = rs1_val >> shamt;
                regs.write(rd_i, value);
                format!(
                    "srl    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}>>{shamt}=0x{value:08x}"
                )
            } else {
                return Err(illegal(instr));
            }
        }
        0x6 => {
            let value = rs1_val | rs2_val;
            regs.write(rd_i, value);
            format!(
                "or     {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}|0x{rs2_val:08x}=0x{value:08x}"
            )
        }
        0x7 => {
            let value = rs1_val & rs2_val;
            regs.write(rd_i, value);
            format!(
                "and    {rd_name},{rs1_name},{rs2_name}         {rd_name}=0x{rs1_val:08x}&0x{rs2_val:08x}=0x{value:08x}"
            )
        }
        _ => return Err(illegal(instr)),
    };
    completed(trace)
}

#[allow(clippy::too_many_arguments)]
fn exec_system<R: Read, W: Write>(
    instr: u32,
    pc: u32,
    f3: u32,
    rd_i: u8,
    rs1_i: u8,
    rs1_val: u32,
    csrs: &mut csr::Csrs,
    mip: u32,
    regs: &mut Registers,
) -> ExecResult
where
    R: Read,
    W: Write,
{
    let imm = imm_i(instr);
    match f3 {
        0x0 => match imm {
            0x000 => Err(TrapSignal {
                trap: Trap::Exception(Exception::EnvironmentCall),
                tval: 0,
            }),
            0x001 => {
                csrs.mcause = 3;
                csrs.mepc = pc;
                Ok(Completed {
                    trace: "ebreak".to_string(),
                    new_pc: None,
                    halt: true,
                })
            }
            0x302 => {
                let new_pc = trap_mret(csrs);
                jumped(new_pc, format!("mret                       pc=0x{new_pc:08x}"))
            }
            _ => Err(illegal(instr)),
        },
        0x1 | 0x2 | 0x3 | 0x5 | 0x6 | 0x7 => {
            let addr = csr_addr(instr);
            let name = csr::csr_name(addr);
            let old = csrs.read(addr, mip);
            let rd_name = reg_name(rd_i);
            let rs1_name = reg_name(rs1_i);
            let trace = match f3 {
                0x1 => {
                    csrs.write(addr, rs1_val);
                    format!("csrrw  {rd_name},{name},{rs1_name}       {rd_name}={name}=0x{old:08x},{name}=0x{rs1_val:08x}")
                }
                0x2 => {
                    let new_val = old | rs1_val;
                    if rs1_i != 0 {
                        csrs.write(addr, new_val);
                    }
                    format!("csrrs  {rd_name},{name},{rs1_name}      {rd_name}={name}=0x{old:08x},{name}|=0x{rs1_val:08x}=0x{new_val:08x}")
                }
                0x3 => {
                    let new_val = old & !rs1_val;
                    if rs1_i != 0 {
                        csrs.write(addr, new_val);
                    }
                    format!("csrrc  {rd_name},{name},{rs1_name}       {rd_name}={name}=0x{old:08x},{name}&=~0x{rs1_val:08x}=0x{new_val:08x}")
                }
                0x5 => {
                    let uimm = csr_uimm(instr);
                    csrs.write(addr, uimm);
                    format!("csrrwi {rd_name},{name},{uimm}      {rd_name}={name}=0x{old:08x},{name}={uimm}")
                }
                0x6 => {
                    let uimm = csr_uimm(instr);
                    let new_val = old | uimm;
                    if uimm != 0 {
                        csrs.write(addr, new_val);
                    }
                    format!("csrrsi {rd_name},{name},{uimm}      {rd_name}={name}=0x{old:08x},{name}|={uimm}=0x{new_val:08x}")
                }
                0x7 => {
                    let uimm = csr_uimm(instr);
                    let new_val = old & !uimm;
                    if uimm != 0 {
                        csrs.write(addr, new_val);
                    }
                    format!("csrrci {rd_name},{name},{uimm}      {rd_name}={name}=0x{old:08x},csr&=~{uimm}=0x{new_val:08x}")
                }
                _ => unreachable!(),
            };
            regs.write(rd_i, old);
            completed(trace)
        }
        _ => Err(illegal(instr)),
    }
}
