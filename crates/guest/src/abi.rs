//! Guest side of the sandbox ABI: value layouts and syscall sequences.

use types::VariantType;
use vm::Register;

use crate::asm::ProgramBuilder;

/// Size of a guest variant: type tag, padding and a 16-byte payload.
pub const GUEST_VARIANT_SIZE: i32 = 24;
/// Offset of the payload inside a guest variant.
pub const PAYLOAD: i32 = 8;
/// Size of a guest `std::string` descriptor.
pub const STD_STRING_SIZE: usize = 24;
/// Longest string stored inline in a `std::string`.
pub const STD_STRING_SSO: usize = 15;
/// Size of a guest `std::vector` descriptor.
pub const STD_VECTOR_SIZE: usize = 12;
/// Size of the capture storage passed to timer callbacks.
pub const CAPTURE_SIZE: usize = 32;

/// A syscall argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Reg(Register),
    Imm(i32),
    /// Address of a label.
    Addr(&'a str),
    /// A double, passed in the next even/odd register pair.
    F64(f64),
}

const ARG_REGS: [Register; 7] =
    [Register::A0, Register::A1, Register::A2, Register::A3, Register::A4, Register::A5, Register::A6];

impl ProgramBuilder {
    /// `li a7, number; ecall`.
    pub fn syscall(&mut self, number: u32) -> &mut Self {
        self.li(Register::A7, number as i32).ecall()
    }

    /// Places `args` in `a0..a6` and issues the syscall. Register sources
    /// are staged through the stack first, so any register may be passed.
    pub fn host_call(&mut self, number: u32, args: &[Arg]) -> &mut Self {
        let staged: Vec<(usize, Register)> = args
            .iter()
            .enumerate()
            .filter_map(|(i, a)| match a {
                Arg::Reg(reg) => Some((i, *reg)),
                _ => None,
            })
            .collect();
        if !staged.is_empty() {
            self.addi(Register::Sp, Register::Sp, -32);
            for (slot, (_, reg)) in staged.iter().enumerate() {
                self.sw(*reg, Register::Sp, slot as i32 * 4);
            }
        }

        let mut next = 0;
        for (i, arg) in args.iter().enumerate() {
            match *arg {
                Arg::Reg(_) => {
                    let slot = staged.iter().position(|(j, _)| *j == i).unwrap_or(0);
                    self.lw(ARG_REGS[next], Register::Sp, slot as i32 * 4);
                    next += 1;
                }
                Arg::Imm(value) => {
                    self.li(ARG_REGS[next], value);
                    next += 1;
                }
                Arg::Addr(label) => {
                    self.la(ARG_REGS[next], label);
                    next += 1;
                }
                Arg::F64(value) => {
                    next += next % 2;
                    let bits = value.to_bits();
                    self.li(ARG_REGS[next], bits as u32 as i32).li(ARG_REGS[next + 1], (bits >> 32) as u32 as i32);
                    next += 2;
                }
            }
        }

        if !staged.is_empty() {
            self.addi(Register::Sp, Register::Sp, 32);
        }
        self.syscall(number)
    }

    fn set_variant_words(&mut self, ptr: Register, offset: i32, ty: VariantType, lo: u32, hi: u32) -> &mut Self {
        self.li(Register::T6, ty as i32)
            .sw(Register::T6, ptr, offset)
            .li(Register::T6, lo as i32)
            .sw(Register::T6, ptr, offset + PAYLOAD)
            .li(Register::T6, hi as i32)
            .sw(Register::T6, ptr, offset + PAYLOAD + 4)
    }

    pub fn set_variant_nil(&mut self, ptr: Register, offset: i32) -> &mut Self {
        self.set_variant_words(ptr, offset, VariantType::Nil, 0, 0)
    }

    pub fn set_variant_bool(&mut self, ptr: Register, offset: i32, value: bool) -> &mut Self {
        self.set_variant_words(ptr, offset, VariantType::Bool, value as u32, 0)
    }

    pub fn set_variant_int(&mut self, ptr: Register, offset: i32, value: i64) -> &mut Self {
        self.set_variant_words(ptr, offset, VariantType::Int, value as u32, (value >> 32) as u32)
    }

    pub fn set_variant_float(&mut self, ptr: Register, offset: i32, value: f64) -> &mut Self {
        let bits = value.to_bits();
        self.set_variant_words(ptr, offset, VariantType::Float, bits as u32, (bits >> 32) as u32)
    }

    /// Writes an Int variant whose low word comes from `value`.
    pub fn set_variant_int_reg(&mut self, ptr: Register, offset: i32, value: Register) -> &mut Self {
        self.li(Register::T6, VariantType::Int as i32)
            .sw(Register::T6, ptr, offset)
            .sw(value, ptr, offset + PAYLOAD)
            .sw(Register::Zero, ptr, offset + PAYLOAD + 4)
    }

    /// Copies the 24 bytes at `src` to `dst`.
    pub fn copy_variant(&mut self, dst: Register, src: Register) -> &mut Self {
        for word in 0..GUEST_VARIANT_SIZE / 4 {
            self.lw(Register::T6, src, word * 4).sw(Register::T6, dst, word * 4);
        }
        self
    }

    /// A zeroed (Nil) guest variant in the data section.
    pub fn variant_slot(&mut self, name: &str) -> &mut Self {
        self.zeroed(name, GUEST_VARIANT_SIZE as usize)
    }

    /// A guest variant holding `value` in the data section.
    pub fn variant_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.object(name).word(VariantType::Int as u32).word(0).bytes(&value.to_le_bytes()).bytes(&[0; 8])
    }

    /// A `std::string` descriptor laid out the way a guest compiler would:
    /// up to 15 bytes inline after the header, longer text in a separate
    /// character buffer.
    pub fn std_string(&mut self, name: &str, text: &str) -> &mut Self {
        let len = text.len();
        if len <= STD_STRING_SSO {
            let mut inline = text.as_bytes().to_vec();
            inline.resize(STD_STRING_SIZE - 8, 0);
            return self.object(name).address_word(name, 8).word(len as u32).bytes(&inline);
        }
        let chars = format!("{name}.chars");
        self.object(name)
            .address_word(&chars, 0)
            .word(len as u32)
            .word(len as u32)
            .bytes(&[0; STD_STRING_SIZE - 12]);
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.data(&chars, &bytes)
    }

    /// A `std::vector` descriptor over `bytes`.
    pub fn std_vector(&mut self, name: &str, bytes: &[u8]) -> &mut Self {
        let elements = format!("{name}.data");
        let len = bytes.len() as i32;
        self.object(name).address_word(&elements, 0).address_word(&elements, len).address_word(&elements, len);
        self.data(&elements, bytes)
    }

    /// The conventional fast-exit function: a single STOP instruction.
    pub fn fast_exit(&mut self) -> &mut Self {
        self.function("fast_exit").stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm::decoder::decode;
    use vm::instruction::Instruction;

    #[test]
    fn f64_arguments_use_aligned_pairs() {
        let mut p = ProgramBuilder::new();
        p.host_call(528, &[Arg::Imm(1), Arg::F64(0.5)]);
        let image = p.build().unwrap();
        let writes: Vec<usize> = image
            .text
            .chunks_exact(4)
            .filter_map(|w| match decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])) {
                Some(Instruction::OpImm { rd, .. }) | Some(Instruction::Lui { rd, .. }) => Some(rd),
                _ => None,
            })
            .collect();
        // a0 = 1, then the double skips a1 and lands in a2:a3, then a7.
        assert_eq!(writes.first(), Some(&10));
        assert!(!writes.contains(&11));
        assert!(writes.contains(&12) && writes.contains(&13));
        assert_eq!(writes.last(), Some(&17));
    }

    #[test]
    fn std_string_descriptor_layout() {
        let mut p = ProgramBuilder::new();
        p.std_string("s", "a string longer than fifteen bytes");
        let image = p.build().unwrap();
        let word = |i: usize| u32::from_le_bytes(image.data[i..i + 4].try_into().unwrap());
        assert_eq!(word(0), image.data_base + STD_STRING_SIZE as u32);
        assert_eq!(word(4), 34);
    }

    #[test]
    fn short_std_string_is_inline() {
        let mut p = ProgramBuilder::new();
        p.std_string("s", "hello");
        let image = p.build().unwrap();
        let word = |i: usize| u32::from_le_bytes(image.data[i..i + 4].try_into().unwrap());
        assert_eq!(word(0), image.data_base + 8);
        assert_eq!(word(4), 5);
        assert_eq!(&image.data[8..14], b"hello\0");
    }
}
