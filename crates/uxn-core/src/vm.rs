//! The processor: memory, the two stacks, and the fetch/decode/dispatch loop.

use crate::device::Device;
use crate::error::UxnError;
use crate::stack::{peek_value, pop_value, push_value, Stack};

/// Offset at which ROM images are loaded into the 64 KiB address space.
pub const LOAD_ADDR: usize = 0x0100;

/// The Uxn processor: 64 KiB of memory, two 256-byte stacks, a program counter.
///
/// Owns its memory outright (boxed, to avoid a 64 KiB stack frame) and is
/// driven entirely through [`Uxn::run`]; there is no internal clock or
/// cycle counter, since the spec this core implements is opcode-atomic, not
/// cycle-accurate.
pub struct Uxn {
    mem: Box<[u8; 65536]>,
    wst: Stack,
    rst: Stack,
    pc: u16,
}

fn wrap(v: u16, short: bool) -> u16 {
    if short {
        v
    } else {
        v & 0xff
    }
}

fn read_mem_value(mem: &[u8; 65536], addr: u16, short: bool) -> u16 {
    if short {
        let hi = mem[addr as usize];
        let lo = mem[addr.wrapping_add(1) as usize];
        u16::from_be_bytes([hi, lo])
    } else {
        u16::from(mem[addr as usize])
    }
}

fn write_mem_value(mem: &mut [u8; 65536], addr: u16, value: u16, short: bool) {
    if short {
        let [hi, lo] = value.to_be_bytes();
        mem[addr as usize] = hi;
        mem[addr.wrapping_add(1) as usize] = lo;
    } else {
        mem[addr as usize] = value as u8;
    }
}

fn relative(pc: u16, offset: u8) -> u16 {
    pc.wrapping_add((offset as i8) as u16)
}

impl Uxn {
    /// Build a VM with `rom` loaded at [`LOAD_ADDR`]. The rest of memory, and
    /// both stacks, start zeroed.
    #[allow(clippy::large_stack_arrays)]
    pub fn new(rom: &[u8]) -> Result<Self, UxnError> {
        if rom.len() > 65536 - LOAD_ADDR {
            return Err(UxnError::RomTooLarge { len: rom.len() });
        }
        let mut mem = Box::new([0u8; 65536]);
        mem[LOAD_ADDR..LOAD_ADDR + rom.len()].copy_from_slice(rom);
        Ok(Self { mem, wst: Stack::new(), rst: Stack::new(), pc: 0 })
    }

    #[must_use]
    pub fn mem(&self) -> &[u8; 65536] {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut [u8; 65536] {
        &mut self.mem
    }

    #[must_use]
    pub const fn wst(&self) -> &Stack {
        &self.wst
    }

    #[must_use]
    pub const fn rst(&self) -> &Stack {
        &self.rst
    }

    pub fn wst_mut(&mut self) -> &mut Stack {
        &mut self.wst
    }

    pub fn rst_mut(&mut self) -> &mut Stack {
        &mut self.rst
    }

    /// The PC at the end of the most recently completed (or currently
    /// innermost) [`Uxn::run`] call. During a device callback this reflects
    /// whichever `run` invocation is innermost, not necessarily the caller's
    /// position — each `run` tracks its own PC locally so that nested vector
    /// calls cannot clobber an outer call's place in its program.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.pc
    }

    /// Run from `pc` until a `BRK` is reached, returning the PC just past it.
    ///
    /// `device` may reenter this method (e.g. to invoke a vector) before
    /// returning control to the opcode that called it; nesting is bounded
    /// only by the host call stack. The program counter for this call lives
    /// in a local variable, not shared struct state, so a nested `run` can
    /// freely run to completion without disturbing where this call resumes.
    pub fn run(&mut self, device: &mut dyn Device, pc: u16) -> u16 {
        let mut pc = pc;
        loop {
            let op = self.fetch_byte(&mut pc);
            if op == 0x00 {
                self.pc = pc;
                return pc;
            }
            if op & 0x1f == 0 {
                self.dispatch_immediate(op, &mut pc);
            } else {
                self.dispatch(op, &mut pc, device);
            }
            self.pc = pc;
        }
    }

    fn fetch_byte(&mut self, pc: &mut u16) -> u8 {
        let b = self.mem[*pc as usize];
        *pc = pc.wrapping_add(1);
        b
    }

    fn fetch_short(&mut self, pc: &mut u16) -> u16 {
        let hi = self.fetch_byte(pc);
        let lo = self.fetch_byte(pc);
        u16::from_be_bytes([hi, lo])
    }

    /// Split `self` into the active/other stack pair, swapped by the `r`
    /// mode flag — independent borrows, since they're disjoint fields.
    fn split(&mut self, ret: bool) -> (&mut Stack, &mut Stack) {
        let Self { wst, rst, .. } = self;
        if ret { (rst, wst) } else { (wst, rst) }
    }

    fn split_mem(&mut self, ret: bool) -> (&mut Stack, &mut Stack, &mut [u8; 65536]) {
        let Self { wst, rst, mem, .. } = self;
        let mem: &mut [u8; 65536] = &mut **mem;
        if ret { (rst, wst, mem) } else { (wst, rst, mem) }
    }

    fn dispatch_immediate(&mut self, op: u8, pc: &mut u16) {
        match op {
            0x20 => {
                // JCI: cond -> ; fetch 16-bit relative offset, take it if cond != 0.
                let cond = self.wst.pop_byte();
                let offset = self.fetch_short(pc);
                if cond != 0 {
                    *pc = pc.wrapping_add(offset);
                }
            }
            0x40 => {
                // JMI: fetch 16-bit relative offset, always take it.
                let offset = self.fetch_short(pc);
                *pc = pc.wrapping_add(offset);
            }
            0x60 => {
                // JSI: fetch 16-bit relative offset, push return addr, take it.
                let offset = self.fetch_short(pc);
                push_value(&mut self.rst, *pc, true);
                *pc = pc.wrapping_add(offset);
            }
            0x80 => {
                let v = self.fetch_byte(pc);
                self.wst.push_byte(v);
            }
            0xA0 => {
                let v = self.fetch_short(pc);
                push_value(&mut self.wst, v, true);
            }
            0xC0 => {
                let v = self.fetch_byte(pc);
                self.rst.push_byte(v);
            }
            0xE0 => {
                let v = self.fetch_short(pc);
                push_value(&mut self.rst, v, true);
            }
            _ => unreachable!("{op:#04x} is not an immediate opcode"),
        }
    }

    fn dispatch(&mut self, op: u8, pc: &mut u16, device: &mut dyn Device) {
        let base = op & 0x1f;
        let short = op & 0x20 != 0;
        let ret = op & 0x40 != 0;
        let keep = op & 0x80 != 0;
        match base {
            1 => self.op_inc(short, ret, keep),
            2 => self.op_pop(short, ret, keep),
            3 => self.op_nip(short, ret, keep),
            4 => self.op_swp(short, ret, keep),
            5 => self.op_rot(short, ret, keep),
            6 => self.op_dup(short, ret, keep),
            7 => self.op_ovr(short, ret, keep),
            8 => self.op_cmp(short, ret, keep, |a, b| a == b),
            9 => self.op_cmp(short, ret, keep, |a, b| a != b),
            10 => self.op_cmp(short, ret, keep, |a, b| a > b),
            11 => self.op_cmp(short, ret, keep, |a, b| a < b),
            12 => self.op_jmp(short, ret, keep, pc),
            13 => self.op_jcn(short, ret, keep, pc),
            14 => self.op_jsr(short, ret, keep, pc),
            15 => self.op_sth(short, ret, keep),
            16 => self.op_ldz(short, ret, keep),
            17 => self.op_stz(short, ret, keep),
            18 => self.op_ldr(short, ret, keep, pc),
            19 => self.op_str(short, ret, keep, pc),
            20 => self.op_lda(short, ret, keep),
            21 => self.op_sta(short, ret, keep),
            22 => self.op_dei(short, ret, keep, device),
            23 => self.op_deo(short, ret, keep, device),
            24 => self.op_bin(short, ret, keep, u16::wrapping_add),
            25 => self.op_bin(short, ret, keep, u16::wrapping_sub),
            26 => self.op_bin(short, ret, keep, u16::wrapping_mul),
            27 => self.op_bin(short, ret, keep, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
            28 => self.op_bin(short, ret, keep, |a, b| a & b),
            29 => self.op_bin(short, ret, keep, |a, b| a | b),
            30 => self.op_bin(short, ret, keep, |a, b| a ^ b),
            31 => self.op_sft(short, ret, keep),
            _ => unreachable!("base op 0 is always decoded as an immediate"),
        }
    }

    fn op_inc(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let a = if keep { peek_value(active, 0, short) } else { pop_value(active, short) };
        push_value(active, wrap(a.wrapping_add(1), short), short);
    }

    fn op_pop(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        if !keep {
            let _ = pop_value(active, short);
        }
    }

    fn op_nip(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let b = if keep {
            peek_value(active, 0, short)
        } else {
            let b = pop_value(active, short);
            let _a = pop_value(active, short);
            b
        };
        push_value(active, b, short);
    }

    fn op_swp(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let (a, b) = if keep {
            (peek_value(active, 1, short), peek_value(active, 0, short))
        } else {
            let b = pop_value(active, short);
            let a = pop_value(active, short);
            (a, b)
        };
        push_value(active, b, short);
        push_value(active, a, short);
    }

    fn op_rot(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let (a, b, c) = if keep {
            (peek_value(active, 2, short), peek_value(active, 1, short), peek_value(active, 0, short))
        } else {
            let c = pop_value(active, short);
            let b = pop_value(active, short);
            let a = pop_value(active, short);
            (a, b, c)
        };
        push_value(active, b, short);
        push_value(active, c, short);
        push_value(active, a, short);
    }

    fn op_dup(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let a = if keep { peek_value(active, 0, short) } else { pop_value(active, short) };
        push_value(active, a, short);
        push_value(active, a, short);
    }

    fn op_ovr(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let (a, b) = if keep {
            (peek_value(active, 1, short), peek_value(active, 0, short))
        } else {
            let b = pop_value(active, short);
            let a = pop_value(active, short);
            (a, b)
        };
        push_value(active, a, short);
        push_value(active, b, short);
        push_value(active, a, short);
    }

    fn op_cmp(&mut self, short: bool, ret: bool, keep: bool, f: impl Fn(u16, u16) -> bool) {
        let (active, _) = self.split(ret);
        let (a, b) = if keep {
            (peek_value(active, 1, short), peek_value(active, 0, short))
        } else {
            let b = pop_value(active, short);
            let a = pop_value(active, short);
            (a, b)
        };
        active.push_byte(u8::from(f(a, b)));
    }

    fn op_bin(&mut self, short: bool, ret: bool, keep: bool, f: impl Fn(u16, u16) -> u16) {
        let (active, _) = self.split(ret);
        let (a, b) = if keep {
            (peek_value(active, 1, short), peek_value(active, 0, short))
        } else {
            let b = pop_value(active, short);
            let a = pop_value(active, short);
            (a, b)
        };
        push_value(active, wrap(f(a, b), short), short);
    }

    fn op_sft(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _) = self.split(ret);
        let (a, shift) = if keep {
            let shift = active.peek_byte(0);
            let a = if short {
                let lo = active.peek_byte(1);
                let hi = active.peek_byte(2);
                u16::from_be_bytes([hi, lo])
            } else {
                u16::from(active.peek_byte(1))
            };
            (a, shift)
        } else {
            let shift = active.pop_byte();
            let a = pop_value(active, short);
            (a, shift)
        };
        let right = shift & 0x0f;
        let left = shift >> 4;
        let result = wrap((a >> right) << left, short);
        push_value(active, result, short);
    }

    fn op_jmp(&mut self, short: bool, ret: bool, keep: bool, pc: &mut u16) {
        let (active, _) = self.split(ret);
        let off = if keep { peek_value(active, 0, short) } else { pop_value(active, short) };
        *pc = if short { off } else { relative(*pc, off as u8) };
    }

    fn op_jcn(&mut self, short: bool, ret: bool, keep: bool, pc: &mut u16) {
        let (active, _) = self.split(ret);
        let (cond, off) = if keep {
            let off = if short {
                let lo = active.peek_byte(0);
                let hi = active.peek_byte(1);
                u16::from_be_bytes([hi, lo])
            } else {
                u16::from(active.peek_byte(0))
            };
            let cond = active.peek_byte(if short { 2 } else { 1 });
            (cond, off)
        } else {
            let off = pop_value(active, short);
            let cond = active.pop_byte();
            (cond, off)
        };
        if cond != 0 {
            *pc = if short { off } else { relative(*pc, off as u8) };
        }
    }

    fn op_jsr(&mut self, short: bool, ret: bool, keep: bool, pc: &mut u16) {
        let (active, other) = self.split(ret);
        let off = if keep { peek_value(active, 0, short) } else { pop_value(active, short) };
        push_value(other, *pc, true);
        *pc = if short { off } else { relative(*pc, off as u8) };
    }

    fn op_sth(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, other) = self.split(ret);
        let a = if keep { peek_value(active, 0, short) } else { pop_value(active, short) };
        push_value(other, a, short);
    }

    fn op_ldz(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _, mem) = self.split_mem(ret);
        let addr = if keep { active.peek_byte(0) } else { active.pop_byte() };
        let value = read_mem_value(mem, u16::from(addr), short);
        push_value(active, value, short);
    }

    fn op_stz(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _, mem) = self.split_mem(ret);
        let (value, addr) = if keep {
            let addr = active.peek_byte(0);
            let value = if short {
                let lo = active.peek_byte(1);
                let hi = active.peek_byte(2);
                u16::from_be_bytes([hi, lo])
            } else {
                u16::from(active.peek_byte(1))
            };
            (value, addr)
        } else {
            let addr = active.pop_byte();
            let value = pop_value(active, short);
            (value, addr)
        };
        write_mem_value(mem, u16::from(addr), value, short);
    }

    fn op_ldr(&mut self, short: bool, ret: bool, keep: bool, pc: &mut u16) {
        let (active, _, mem) = self.split_mem(ret);
        let off = if keep { active.peek_byte(0) } else { active.pop_byte() };
        let addr = relative(*pc, off);
        let value = read_mem_value(mem, addr, short);
        push_value(active, value, short);
    }

    fn op_str(&mut self, short: bool, ret: bool, keep: bool, pc: &mut u16) {
        let (active, _, mem) = self.split_mem(ret);
        let (value, off) = if keep {
            let off = active.peek_byte(0);
            let value = if short {
                let lo = active.peek_byte(1);
                let hi = active.peek_byte(2);
                u16::from_be_bytes([hi, lo])
            } else {
                u16::from(active.peek_byte(1))
            };
            (value, off)
        } else {
            let off = active.pop_byte();
            let value = pop_value(active, short);
            (value, off)
        };
        let addr = relative(*pc, off);
        write_mem_value(mem, addr, value, short);
    }

    fn op_lda(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _, mem) = self.split_mem(ret);
        let addr = if keep { peek_value(active, 0, true) } else { pop_value(active, true) };
        let value = read_mem_value(mem, addr, short);
        push_value(active, value, short);
    }

    fn op_sta(&mut self, short: bool, ret: bool, keep: bool) {
        let (active, _, mem) = self.split_mem(ret);
        let (value, addr) = if keep {
            let addr = peek_value(active, 0, true);
            let value = if short {
                let lo = active.peek_byte(2);
                let hi = active.peek_byte(3);
                u16::from_be_bytes([hi, lo])
            } else {
                u16::from(active.peek_byte(2))
            };
            (value, addr)
        } else {
            let addr = pop_value(active, true);
            let value = pop_value(active, short);
            (value, addr)
        };
        write_mem_value(mem, addr, value, short);
    }

    fn op_dei(&mut self, short: bool, ret: bool, keep: bool, device: &mut dyn Device) {
        let port = {
            let (active, _) = self.split(ret);
            if keep { active.peek_byte(0) } else { active.pop_byte() }
        };
        let value = device.dei(self, port, short);
        let (active, _) = self.split(ret);
        push_value(active, value, short);
    }

    fn op_deo(&mut self, short: bool, ret: bool, keep: bool, device: &mut dyn Device) {
        let (port, value) = {
            let (active, _) = self.split(ret);
            if keep {
                let port = active.peek_byte(0);
                let value = if short {
                    let lo = active.peek_byte(1);
                    let hi = active.peek_byte(2);
                    u16::from_be_bytes([hi, lo])
                } else {
                    u16::from(active.peek_byte(1))
                };
                (port, value)
            } else {
                let port = active.pop_byte();
                let value = pop_value(active, short);
                (port, value)
            }
        };
        let _ = device.deo(self, port, value, short);
    }
}
