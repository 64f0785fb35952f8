//! x64 call trampolines.
//!
//! The stub runs as the entry point of a remote thread. It reserves shadow
//! space, loads the argument registers of the Win64 calling convention, calls
//! the target and returns its `eax`, which becomes the thread's exit code.

use crate::error::{Error, Result};

/// Integer argument registers, in argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntRegister {
    Rcx,
    Rdx,
    R8,
    R9,
}

impl IntRegister {
    pub const ALL: [IntRegister; 4] = [Self::Rcx, Self::Rdx, Self::R8, Self::R9];

    /// `mov reg, imm64` opcode bytes.
    fn mov_imm64(self) -> [u8; 2] {
        match self {
            Self::Rcx => [0x48, 0xB9],
            Self::Rdx => [0x48, 0xBA],
            Self::R8 => [0x49, 0xB8],
            Self::R9 => [0x49, 0xB9],
        }
    }
}

/// Floating-point argument registers, in argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRegister {
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
}

impl FloatRegister {
    pub const ALL: [FloatRegister; 4] = [Self::Xmm0, Self::Xmm1, Self::Xmm2, Self::Xmm3];

    /// ModRM byte of `movd xmmN, eax`.
    fn modrm(self) -> u8 {
        match self {
            Self::Xmm0 => 0xC0,
            Self::Xmm1 => 0xC8,
            Self::Xmm2 => 0xD0,
            Self::Xmm3 => 0xD8,
        }
    }
}

/// Register arguments of one remote call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallArgs {
    ints: [i64; 4],
    floats: [f32; 4],
}

impl CallArgs {
    pub const MAX_ARGS: usize = 4;

    pub fn new(ints: &[i64], floats: &[f32]) -> Result<Self> {
        if ints.len() > Self::MAX_ARGS {
            return Err(Error::TooManyArguments {
                kind: "integer",
                count: ints.len(),
            });
        }
        if floats.len() > Self::MAX_ARGS {
            return Err(Error::TooManyArguments {
                kind: "float",
                count: floats.len(),
            });
        }

        let mut args = Self::default();
        args.ints[..ints.len()].copy_from_slice(ints);
        args.floats[..floats.len()].copy_from_slice(floats);
        Ok(args)
    }

    /// A single integer argument in `rcx`.
    pub fn single(value: i64) -> Self {
        let mut args = Self::default();
        args.ints[0] = value;
        args
    }

    pub fn ints(&self) -> &[i64; 4] {
        &self.ints
    }

    pub fn floats(&self) -> &[f32; 4] {
        &self.floats
    }
}

/// Byte emitter for call trampolines.
#[derive(Debug, Default)]
pub struct StubBuilder {
    code: Vec<u8>,
}

impl StubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `sub rsp, 0x28`: shadow space plus alignment.
    pub fn prologue(mut self) -> Self {
        self.code.extend_from_slice(&[0x48, 0x83, 0xEC, 0x28]);
        self
    }

    /// `mov eax, imm32; movd xmmN, eax`
    pub fn load_float(mut self, register: FloatRegister, value: f32) -> Self {
        self.code.push(0xB8);
        self.code.extend_from_slice(&value.to_bits().to_le_bytes());
        self.code
            .extend_from_slice(&[0x66, 0x0F, 0x6E, register.modrm()]);
        self
    }

    /// `mov reg, imm64`
    pub fn load_int(mut self, register: IntRegister, value: i64) -> Self {
        self.code.extend_from_slice(&register.mov_imm64());
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// `mov rax, target; call rax`
    pub fn call(mut self, target: u64) -> Self {
        self.code.extend_from_slice(&[0x48, 0xB8]);
        self.code.extend_from_slice(&target.to_le_bytes());
        self.code.extend_from_slice(&[0xFF, 0xD0]);
        self
    }

    /// `add rsp, 0x28; ret`
    pub fn epilogue(mut self) -> Self {
        self.code.extend_from_slice(&[0x48, 0x83, 0xC4, 0x28, 0xC3]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.code
    }
}

/// Full trampoline calling `target` with `args`.
///
/// Floats are loaded first since loading them goes through `eax`.
pub fn call_stub(target: u64, args: &CallArgs) -> Vec<u8> {
    let mut builder = StubBuilder::new().prologue();
    for (register, value) in FloatRegister::ALL.into_iter().zip(args.floats) {
        builder = builder.load_float(register, value);
    }
    for (register, value) in IntRegister::ALL.into_iter().zip(args.ints) {
        builder = builder.load_int(register, value);
    }
    builder.call(target).epilogue().build()
}
