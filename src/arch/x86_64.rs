//! x86-64 code emitter.
//!
//! Encodings below are the literal byte patterns a hand-rolled x86-64
//! assembler would produce for the handful of instruction forms the threader
//! ever needs: `push`/`mov`/`leave`/`ret` for the prologue and epilogue,
//! `mov r64, imm32/imm64` for argument and register loads, and `call`/`jmp`
//! in both their rel32 and indirect-through-register forms.

use crate::page::JitPage;

const REX_B: u8 = 0x41;
const REX_R: u8 = 0x44;
const REX_W: u8 = 0x48;

/// `push %rbp; mov %rsp,%rbp; push %rbx; push %rbx; mov %rdi,%rbx`.
///
/// The second `push %rbx` is not a typo: it pads the stack back to a
/// 16-byte boundary after `call`'s return-address push and the two
/// preceding pushes, without needing a separate `sub %rsp`. The epilogue
/// below only restores `%rbx` once; `leave` unwinds both pushes at once via
/// `%rbp`. The trailing `mov %rdi,%rbx` parks the threaded function's own
/// first argument in the callee-saved sticky register so later calls that
/// never set argument zero explicitly can reload it.
pub(crate) const PROLOGUE: &[u8] =
    &[0x55, 0x48, 0x89, 0xe5, 0x53, 0x53, 0x48, 0x89, 0xfb];

/// `mov -0x8(%rbp),%rbx; leave; ret`.
pub(crate) const EPILOGUE: &[u8] = &[0x48, 0x8b, 0x5d, 0xf8, 0xc9, 0xc3];

/// `param` 0..5 maps to `rdi,rsi,rdx,rcx,r8,r9` per the System V calling
/// convention; the first two entries are the x86 register numbers kept
/// sticky across calls (see [`super::append_call`]).
const ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9];

pub(crate) fn arg_register(param: u8) -> u8 {
    ARG_REGS[param as usize]
}

/// `mov %src,%dst` (opcode `0x89`, ModRM selects `dst` as r/m and `src` as
/// reg). Mirrors the exact REX-bit computation of the source this was
/// ported from, which only ever invokes this with registers below 8 in
/// practice (`rdi`/`rbx`), so the apparent REX.R/REX.B duplication on `dst`
/// is inert.
fn append_mov_reg(page: &mut JitPage, dst: u8, src: u8) -> bool {
    let mut rex = REX_W;
    if dst & 8 != 0 {
        rex |= REX_R;
    }
    if dst & 8 != 0 {
        rex |= REX_B;
    }
    let modrm = 0xC0 | ((src & 7) << 3) | (dst & 7);
    page.append(&[rex, 0x89, modrm])
}

pub(crate) fn append_set_reg(page: &mut JitPage, reg: u8, value: u64) -> bool {
    let mut buf = [0u8; 10];
    let mut n = 0;
    let mut rex = 0u8;
    if reg & 8 != 0 {
        rex |= REX_B;
    }
    if value == 0 {
        // xor %reg,%reg is shorter than a 32-bit immediate load.
        if reg & 8 != 0 {
            rex |= REX_R;
        }
        if rex != 0 {
            buf[n] = rex;
            n += 1;
        }
        buf[n] = 0x31;
        n += 1;
        buf[n] = 0xC0 | ((reg & 7) << 3) | (reg & 7);
        n += 1;
    } else {
        if value > 0xFFFF_FFFF {
            rex |= REX_W;
        }
        if rex != 0 {
            buf[n] = rex;
            n += 1;
        }
        buf[n] = 0xB8 | (reg & 7);
        n += 1;
        if rex & REX_W == 0 {
            buf[n..n + 4].copy_from_slice(&(value as u32).to_le_bytes());
            n += 4;
        } else {
            buf[n..n + 8].copy_from_slice(&value.to_le_bytes());
            n += 8;
        }
    }
    page.append(&buf[..n])
}

/// Emits either a direct `call rel32`/`jmp rel32`, or — when the target is
/// out of 32-bit displacement range — a `mov %rax,imm64` followed by an
/// indirect `call *%rax`/`jmp *%rax`. `indirect_modrm` selects which.
fn append_pc_relative(page: &mut JitPage, short_opcode: u8, indirect_modrm: u8, target: usize) -> bool {
    let pc = page.pc();
    let disp = (target as i64).wrapping_sub(pc as i64 + 5);
    if disp >= i32::MIN as i64 && disp <= i32::MAX as i64 {
        let mut buf = [0u8; 5];
        buf[0] = short_opcode;
        buf[1..5].copy_from_slice(&(disp as i32).to_le_bytes());
        return page.append(&buf);
    }
    // rax (register 0) is never a sticky argument register, so it's free
    // to clobber here.
    append_set_reg(page, 0, target as u64) && page.append(&[0xFF, indirect_modrm])
}

pub(crate) fn append_call(page: &mut JitPage, func: usize) -> bool {
    if page.reload_arg0_before_call() {
        if !append_mov_reg(page, 7, 3) {
            return false;
        }
    }
    append_pc_relative(page, 0xE8, 0xD0, func)
}

pub(crate) fn append_jmp(page: &mut JitPage, code: usize) -> bool {
    append_pc_relative(page, 0xE9, 0xE0, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JIT_PAGE_SIZE;

    fn dummy_page() -> JitPage {
        let layout = std::alloc::Layout::from_size_align(JIT_PAGE_SIZE, 16).unwrap();
        let addr = unsafe { std::alloc::alloc_zeroed(layout) };
        JitPage::new(addr)
    }

    #[test]
    fn prologue_parks_rdi_in_rbx() {
        // push %rbp; mov %rsp,%rbp; push %rbx; push %rbx; mov %rdi,%rbx
        assert_eq!(PROLOGUE, &[0x55, 0x48, 0x89, 0xe5, 0x53, 0x53, 0x48, 0x89, 0xfb]);
    }

    #[test]
    fn set_reg_zero_uses_xor() {
        let mut page = dummy_page();
        assert!(append_set_reg(&mut page, 7, 0));
        assert_eq!(&page_bytes(&page)[..2], &[0x31, 0xFF]);
    }

    #[test]
    fn set_reg_small_value_uses_32_bit_mov() {
        let mut page = dummy_page();
        assert!(append_set_reg(&mut page, 0, 42));
        assert_eq!(&page_bytes(&page)[..5], &[0xB8, 42, 0, 0, 0]);
    }

    #[test]
    fn set_reg_large_value_uses_64_bit_mov_with_rex_w() {
        let mut page = dummy_page();
        let value = 0x1_0000_0001u64;
        assert!(append_set_reg(&mut page, 0, value));
        let mut expected = vec![0x48, 0xB8];
        expected.extend_from_slice(&value.to_le_bytes());
        assert_eq!(&page_bytes(&page)[..expected.len()], expected.as_slice());
    }

    #[test]
    fn call_in_range_uses_short_rel32_form() {
        let mut page = dummy_page();
        let target = page.pc() + 5;
        assert!(append_pc_relative(&mut page, 0xE8, 0xD0, target));
        assert_eq!(&page_bytes(&page)[..5], &[0xE8, 0, 0, 0, 0]);
    }

    fn page_bytes(page: &JitPage) -> &[u8] {
        unsafe { std::slice::from_raw_parts(page.addr, page.index) }
    }
}
