//! Bytecode opcodes and their static stack effects.
//!
//! Ordering and stack effects are taken from the reference
//! implementation's `common/codes.h` table, not reinvented, so that any
//! cross-checking against that table stays mechanical.

/// A single bytecode instruction tag. Operands (when present) follow the
/// opcode byte in the instruction stream; their width is documented per
/// variant below rather than encoded in the enum itself.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// 16-bit constant pool index follows.
    Constant = 0,
    Null = 1,
    False = 2,
    True = 3,
    /// The `undefined` sentinel.
    Void = 4,

    LoadLocal0 = 5,
    LoadLocal1 = 6,
    LoadLocal2 = 7,
    LoadLocal3 = 8,
    LoadLocal4 = 9,
    LoadLocal5 = 10,
    LoadLocal6 = 11,
    LoadLocal7 = 12,
    LoadLocal8 = 13,

    /// 8-bit local slot index follows.
    LoadLocal = 14,
    /// 8-bit local slot index follows.
    StoreLocal = 15,

    /// 8-bit upvalue index follows.
    LoadUpvalue = 16,
    /// 8-bit upvalue index follows.
    StoreUpvalue = 17,

    /// 16-bit module variable symbol follows.
    LoadModuleVar = 18,
    /// 16-bit module variable symbol follows.
    StoreModuleVar = 19,

    /// 8-bit field index follows, local to the declaring class; the
    /// module loader adds the superclass's field count in place once it
    /// resolves inheritance, so by the time the interpreter runs this the
    /// operand already indexes the instance's real field slot.
    LoadFieldThis = 20,
    /// 8-bit field index follows, patched the same way as `LoadFieldThis`.
    StoreFieldThis = 21,

    Pop = 22,

    Call0 = 23,
    Call1 = 24,
    Call2 = 25,
    Call3 = 26,
    Call4 = 27,
    Call5 = 28,
    Call6 = 29,
    Call7 = 30,
    Call8 = 31,
    Call9 = 32,
    Call10 = 33,
    Call11 = 34,
    Call12 = 35,
    Call13 = 36,
    Call14 = 37,
    Call15 = 38,
    Call16 = 39,

    Super0 = 40,
    Super1 = 41,
    Super2 = 42,
    Super3 = 43,
    Super4 = 44,
    Super5 = 45,
    Super6 = 46,
    Super7 = 47,
    Super8 = 48,
    Super9 = 49,
    Super10 = 50,
    Super11 = 51,
    Super12 = 52,
    Super13 = 53,
    Super14 = 54,
    Super15 = 55,
    Super16 = 56,

    /// 16-bit forward offset follows.
    Jump = 57,
    /// 16-bit backward offset follows.
    Loop = 58,
    /// 16-bit forward offset follows; pops condition.
    JumpIf = 59,
    /// 16-bit forward offset follows; pops one (short-circuit `&&`).
    And = 60,
    /// 16-bit forward offset follows; pops one (short-circuit `||`).
    Or = 61,

    /// 8-bit flag: 1 = close from a local slot, 0 = no-op marker.
    CloseUpvalue = 62,

    Return = 63,

    /// 16-bit function constant index, followed by `upvalue_count`
    /// `(is_local: u8, index: u8)` pairs.
    Closure = 64,

    /// No operand. Pops the class-name string pushed just before it and
    /// pushes the `ClassObj` the module loader already built for this
    /// declaration (from the `CompiledModule.classes` entry, looked up
    /// by name) -- class bodies compile to *structural* `CompiledMethod`
    /// entries, never inline bytecode, so this opcode is a stack fixup,
    /// not a construction step.
    Class = 65,
    /// No operand. Same fixup as `Class`, for `extern class` bodies.
    ExternClass = 66,
    /// No operand. Marks the end of a non-extern class body; re-pushes
    /// the same class value so the following `StoreModuleVar`/
    /// `StoreLocal` (from `define_variable`) has something to store.
    EndClass = 67,

    /// 16-bit constant-pool index of the module name string.
    ImportModule = 68,
    /// 16-bit constant-pool index of the variable name string.
    ImportVariable = 69,

    /// 16-bit method symbol, 16-bit explicit arity. Since `MAX_PARAMETERS`
    /// is 16, this opcode is never required by ordinary compiled call
    /// sites; it exists for host-driven calls through a call handle whose
    /// signature was built without a compile-time arity (see
    /// `djuru_vm::api::make_call_handle`). `CALL` and `SUPER` share this
    /// single opcode; which one is meant is determined by whether the
    /// preceding instruction pushed a receiver (`CALL`) or `this` was
    /// already on the stack (`SUPER`) -- in practice the compiler never
    /// emits a generic super call, since method signatures are bounded by
    /// `MAX_PARAMETERS`.
    Call = 70,

    /// Placeholder for `break`, rewritten to `Jump` once the loop end is
    /// known.
    End = 71,
}

impl Opcode {
    /// Net change in stack depth caused by executing this opcode, not
    /// counting any operand bytes. `CALL_n`/`SUPER_n` consume the receiver
    /// and `n` arguments and push exactly one result, for a net of `-n`.
    #[must_use]
    pub const fn stack_effect(self) -> i32 {
        use Opcode::*;
        match self {
            Constant | Null | False | True | Void => 1,
            LoadLocal0 | LoadLocal1 | LoadLocal2 | LoadLocal3 | LoadLocal4 | LoadLocal5
            | LoadLocal6 | LoadLocal7 | LoadLocal8 | LoadLocal => 1,
            StoreLocal => 0,
            LoadUpvalue => 1,
            StoreUpvalue => 0,
            LoadModuleVar => 1,
            StoreModuleVar => 0,
            LoadFieldThis => 1,
            StoreFieldThis => 0,
            Pop => -1,
            Call0 => 0,
            Call1 => -1,
            Call2 => -2,
            Call3 => -3,
            Call4 => -4,
            Call5 => -5,
            Call6 => -6,
            Call7 => -7,
            Call8 => -8,
            Call9 => -9,
            Call10 => -10,
            Call11 => -11,
            Call12 => -12,
            Call13 => -13,
            Call14 => -14,
            Call15 => -15,
            Call16 => -16,
            Super0 => 0,
            Super1 => -1,
            Super2 => -2,
            Super3 => -3,
            Super4 => -4,
            Super5 => -5,
            Super6 => -6,
            Super7 => -7,
            Super8 => -8,
            Super9 => -9,
            Super10 => -10,
            Super11 => -11,
            Super12 => -12,
            Super13 => -13,
            Super14 => -14,
            Super15 => -15,
            Super16 => -16,
            Jump | Loop => 0,
            JumpIf | And | Or => -1,
            CloseUpvalue => -1,
            Return => 0,
            Closure => 1,
            Class | ExternClass | EndClass => 0,
            ImportModule => 1,
            ImportVariable => 1,
            Call => 0,
            End => 0,
        }
    }

    /// `true` for the family of dedicated `CALL_0..16` opcodes.
    #[must_use]
    pub const fn is_direct_call(self) -> bool {
        matches!(
            self,
            Opcode::Call0
                | Opcode::Call1
                | Opcode::Call2
                | Opcode::Call3
                | Opcode::Call4
                | Opcode::Call5
                | Opcode::Call6
                | Opcode::Call7
                | Opcode::Call8
                | Opcode::Call9
                | Opcode::Call10
                | Opcode::Call11
                | Opcode::Call12
                | Opcode::Call13
                | Opcode::Call14
                | Opcode::Call15
                | Opcode::Call16
        )
    }

    /// `true` for the family of dedicated `SUPER_0..16` opcodes.
    #[must_use]
    pub const fn is_direct_super(self) -> bool {
        matches!(
            self,
            Opcode::Super0
                | Opcode::Super1
                | Opcode::Super2
                | Opcode::Super3
                | Opcode::Super4
                | Opcode::Super5
                | Opcode::Super6
                | Opcode::Super7
                | Opcode::Super8
                | Opcode::Super9
                | Opcode::Super10
                | Opcode::Super11
                | Opcode::Super12
                | Opcode::Super13
                | Opcode::Super14
                | Opcode::Super15
                | Opcode::Super16
        )
    }

    /// Arity encoded by a direct `CALL_n`/`SUPER_n` opcode.
    #[must_use]
    pub const fn direct_arity(self) -> Option<u8> {
        use Opcode::*;
        Some(match self {
            Call0 | Super0 => 0,
            Call1 | Super1 => 1,
            Call2 | Super2 => 2,
            Call3 | Super3 => 3,
            Call4 | Super4 => 4,
            Call5 | Super5 => 5,
            Call6 | Super6 => 6,
            Call7 | Super7 => 7,
            Call8 | Super8 => 8,
            Call9 | Super9 => 9,
            Call10 | Super10 => 10,
            Call11 | Super11 => 11,
            Call12 | Super12 => 12,
            Call13 | Super13 => 13,
            Call14 | Super14 => 14,
            Call15 | Super15 => 15,
            Call16 | Super16 => 16,
            _ => return None,
        })
    }

    /// The `CALL_n` opcode for a given direct-dispatchable arity (0..=16).
    #[must_use]
    pub const fn call_for_arity(arity: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match arity {
            0 => Call0,
            1 => Call1,
            2 => Call2,
            3 => Call3,
            4 => Call4,
            5 => Call5,
            6 => Call6,
            7 => Call7,
            8 => Call8,
            9 => Call9,
            10 => Call10,
            11 => Call11,
            12 => Call12,
            13 => Call13,
            14 => Call14,
            15 => Call15,
            16 => Call16,
            _ => return None,
        })
    }

    /// The `SUPER_n` opcode for a given direct-dispatchable arity (0..=16).
    #[must_use]
    pub const fn super_for_arity(arity: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match arity {
            0 => Super0,
            1 => Super1,
            2 => Super2,
            3 => Super3,
            4 => Super4,
            5 => Super5,
            6 => Super6,
            7 => Super7,
            8 => Super8,
            9 => Super9,
            10 => Super10,
            11 => Super11,
            12 => Super12,
            13 => Super13,
            14 => Super14,
            15 => Super15,
            16 => Super16,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Opcode> {
        // SAFETY-free manual mapping; avoids transmute across the two
        // opcodes (`Call`/`SuperCall`) that alias the same discriminant.
        use Opcode::*;
        Some(match byte {
            0 => Constant,
            1 => Null,
            2 => False,
            3 => True,
            4 => Void,
            5 => LoadLocal0,
            6 => LoadLocal1,
            7 => LoadLocal2,
            8 => LoadLocal3,
            9 => LoadLocal4,
            10 => LoadLocal5,
            11 => LoadLocal6,
            12 => LoadLocal7,
            13 => LoadLocal8,
            14 => LoadLocal,
            15 => StoreLocal,
            16 => LoadUpvalue,
            17 => StoreUpvalue,
            18 => LoadModuleVar,
            19 => StoreModuleVar,
            20 => LoadFieldThis,
            21 => StoreFieldThis,
            22 => Pop,
            23 => Call0,
            24 => Call1,
            25 => Call2,
            26 => Call3,
            27 => Call4,
            28 => Call5,
            29 => Call6,
            30 => Call7,
            31 => Call8,
            32 => Call9,
            33 => Call10,
            34 => Call11,
            35 => Call12,
            36 => Call13,
            37 => Call14,
            38 => Call15,
            39 => Call16,
            40 => Super0,
            41 => Super1,
            42 => Super2,
            43 => Super3,
            44 => Super4,
            45 => Super5,
            46 => Super6,
            47 => Super7,
            48 => Super8,
            49 => Super9,
            50 => Super10,
            51 => Super11,
            52 => Super12,
            53 => Super13,
            54 => Super14,
            55 => Super15,
            56 => Super16,
            57 => Jump,
            58 => Loop,
            59 => JumpIf,
            60 => And,
            61 => Or,
            62 => CloseUpvalue,
            63 => Return,
            64 => Closure,
            65 => Class,
            66 => ExternClass,
            67 => EndClass,
            68 => ImportModule,
            69 => ImportVariable,
            70 => Call,
            71 => End,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_n_round_trips_arity() {
        for n in 0..=16u8 {
            let op = Opcode::call_for_arity(n).unwrap();
            assert_eq!(op.direct_arity(), Some(n));
            assert_eq!(op.stack_effect(), -(n as i32));
        }
    }

    #[test]
    fn from_u8_round_trips_known_opcodes() {
        assert_eq!(Opcode::from_u8(0), Some(Opcode::Constant));
        assert_eq!(Opcode::from_u8(71), Some(Opcode::End));
        assert_eq!(Opcode::from_u8(200), None);
    }

    #[test]
    fn jump_family_has_zero_or_negative_one_effect() {
        assert_eq!(Opcode::Jump.stack_effect(), 0);
        assert_eq!(Opcode::JumpIf.stack_effect(), -1);
        assert_eq!(Opcode::And.stack_effect(), -1);
        assert_eq!(Opcode::Or.stack_effect(), -1);
    }
}
