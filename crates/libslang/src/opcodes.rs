//! Bytecode opcodes.
//!
//! The emitter lowers typed IR instruction names to these concrete opcodes
//! (`add` over `i32` becomes [`Opcode::Iadd`]). The byte values are part of
//! the module format and must not be reordered.

use strum_macros::{Display, FromRepr};

/// One bytecode opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Opcode {
    // Arithmetic.
    Iadd = 0x01,
    Fadd = 0x02,
    Isub = 0x03,
    Fsub = 0x04,
    Imul = 0x05,
    Fmul = 0x06,
    Idiv = 0x07,
    Fdiv = 0x08,
    Imod = 0x09,

    // Casts.
    I2f = 0x0a,
    F2i = 0x0b,

    // Constants.
    AconstNull = 0x0c,
    Iconst = 0x0d,
    Fconst = 0x0e,
    Sconst = 0x0f,

    // Locals.
    Iload = 0x10,
    Fload = 0x11,
    Aload = 0x12,
    Istore = 0x13,
    Fstore = 0x14,
    Astore = 0x15,

    // Array elements.
    Iaload = 0x16,
    Faload = 0x17,
    Aaload = 0x18,
    Iastore = 0x19,
    Fastore = 0x1a,
    Aastore = 0x1b,

    // Stack shuffling.
    Idup = 0x1c,
    Fdup = 0x1d,
    Adup = 0x1e,
    DupX1 = 0x1f,
    DupX2 = 0x20,
    Pop = 0x21,
    Apop = 0x22,

    // Integer bit and logic operations.
    Iand = 0x23,
    Land = 0x24,
    Ior = 0x25,
    Lor = 0x26,
    Ixor = 0x27,
    Ishl = 0x28,
    Ishr = 0x29,

    // Comparisons.
    Icmpl = 0x2a,
    Fcmpl = 0x2b,
    Icmple = 0x2c,
    Fcmple = 0x2d,
    Icmpg = 0x2e,
    Fcmpg = 0x2f,
    Icmpge = 0x30,
    Fcmpge = 0x31,
    Icmpeq = 0x32,
    Fcmpeq = 0x33,
    Acmpeq = 0x34,
    Icmpne = 0x35,
    Fcmpne = 0x36,
    Acmpne = 0x37,

    // Control flow.
    Jnz = 0x38,
    Jmp = 0x39,
    Label = 0x3a,

    // Calls and returns.
    Invoke = 0x3b,
    Ret = 0x3c,
    Iret = 0x3d,
    Fret = 0x3e,
    Sret = 0x3f,
    Aret = 0x40,

    // Structs and arrays.
    Setfield = 0x41,
    Getfield = 0x42,
    New = 0x43,
    Anewarray = 0x44,
    Checkcast = 0x45,
    Newarray = 0x46,
    Arraylength = 0x47,
}

/// Element type operand of `newarray`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ArrayType {
    I32 = 0,
    F32 = 1,
    Str = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        assert_eq!(Opcode::from_repr(Opcode::Iadd as u8), Some(Opcode::Iadd));
        assert_eq!(
            Opcode::from_repr(Opcode::Arraylength as u8),
            Some(Opcode::Arraylength)
        );
        assert_eq!(Opcode::from_repr(0xff), None);
    }

    #[test]
    fn opcode_names_are_snake_case() {
        assert_eq!(Opcode::AconstNull.to_string(), "aconst_null");
        assert_eq!(Opcode::DupX1.to_string(), "dup_x1");
    }
}
