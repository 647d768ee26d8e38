//! Binary chunk serialization (dump) and deserialization (undump).
//!
//! The header and the per-function layout follow the Lua 5.4 precompiled
//! format; the instructions inside are this VM's own encoding.

use std::rc::Rc;

use moonlet_core::number;
use moonlet_core::opcode::Instruction;
use moonlet_core::proto::{Constant, LocalVar, Proto, UpvalDesc};
use moonlet_core::string::LuaString;
use thiserror::Error;
use tracing::debug;

pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
const VERSION: u8 = 0x54;
const FORMAT: u8 = 0;
const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
const INSTRUCTION_SIZE: u8 = 4;
const INTEGER_SIZE: u8 = 8;
const NUMBER_SIZE: u8 = 8;
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

// Constant tags: base type in the low nibble, variant in the high one.
const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 1 | (1 << 4);
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 3 | (1 << 4);
const TAG_SHORT_STR: u8 = 4;
const TAG_LONG_STR: u8 = 4 | (1 << 4);

/// Longest string written with the short-string tag.
const MAX_SHORT_LEN: usize = 40;

/// Why a binary chunk could not be loaded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("truncated precompiled chunk")]
    Truncated,
    #[error("not a binary chunk")]
    BadSignature,
    #[error("version mismatch (chunk has {0:#04x})")]
    VersionMismatch(u8),
    #[error("format mismatch (chunk has {0})")]
    FormatMismatch(u8),
    #[error("corrupted chunk")]
    Corrupted,
    #[error("{what} size mismatch (expected {expected}, got {got})")]
    SizeMismatch { what: &'static str, expected: u8, got: u8 },
    #[error("integer format mismatch")]
    IntegerMismatch,
    #[error("float format mismatch")]
    FloatMismatch,
    #[error("unknown constant tag {0}")]
    BadConstantTag(u8),
    #[error("invalid opcode at instruction {0}")]
    BadInstruction(usize),
    #[error("size field overflows")]
    Overflow,
}

// ─── Dumper ─────────────────────────────────────────────────────────────

/// Serialize a prototype tree. `strip` leaves out debug information.
pub fn dump(proto: &Proto, strip: bool) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(&mut out);
    out.push(proto.upvalues.len() as u8);
    write_function(&mut out, proto, strip, None);
    debug!(bytes = out.len(), strip, "dumped chunk");
    out
}

fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(SIGNATURE);
    out.push(VERSION);
    out.push(FORMAT);
    out.extend_from_slice(LUAC_DATA);
    out.push(INSTRUCTION_SIZE);
    out.push(INTEGER_SIZE);
    out.push(NUMBER_SIZE);
    out.extend_from_slice(&LUAC_INT.to_le_bytes());
    out.extend_from_slice(&LUAC_NUM.to_le_bytes());
}

/// 7 bits per byte, most significant group first; the last byte has bit 7 set.
fn write_size(out: &mut Vec<u8>, mut n: usize) {
    let mut groups = Vec::with_capacity(10);
    loop {
        groups.push((n & 0x7f) as u8);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    let last = groups[0] | 0x80;
    out.extend(groups[1..].iter().rev());
    out.push(last);
}

fn write_string(out: &mut Vec<u8>, s: Option<&LuaString>) {
    match s {
        None => write_size(out, 0),
        Some(s) => {
            write_size(out, s.len() + 1);
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn write_constant(out: &mut Vec<u8>, k: &Constant) {
    match k {
        Constant::Nil => out.push(TAG_NIL),
        Constant::Boolean(false) => out.push(TAG_FALSE),
        Constant::Boolean(true) => out.push(TAG_TRUE),
        Constant::Number(n) => {
            let int = number::to_integer(*n).filter(|_| !(*n == 0.0 && n.is_sign_negative()));
            match int {
                Some(i) => {
                    out.push(TAG_INT);
                    out.extend_from_slice(&i.to_le_bytes());
                }
                None => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&n.to_le_bytes());
                }
            }
        }
        Constant::String(s) => {
            out.push(if s.len() <= MAX_SHORT_LEN { TAG_SHORT_STR } else { TAG_LONG_STR });
            write_string(out, Some(s));
        }
    }
}

fn write_function(out: &mut Vec<u8>, proto: &Proto, strip: bool, parent_source: Option<&LuaString>) {
    if strip || proto.source.as_ref() == parent_source {
        write_string(out, None);
    } else {
        write_string(out, proto.source.as_ref());
    }
    write_size(out, proto.line_defined as usize);
    write_size(out, proto.last_line_defined as usize);
    out.push(proto.num_params);
    out.push(u8::from(proto.is_vararg));
    out.push(proto.max_stack_size);

    write_size(out, proto.code.len());
    for inst in &proto.code {
        out.extend_from_slice(&inst.0.to_le_bytes());
    }

    write_size(out, proto.constants.len());
    for k in &proto.constants {
        write_constant(out, k);
    }

    write_size(out, proto.upvalues.len());
    for uv in &proto.upvalues {
        out.push(u8::from(uv.in_stack));
        out.push(uv.index);
        out.push(uv.kind);
    }

    write_size(out, proto.protos.len());
    for child in &proto.protos {
        write_function(out, child, strip, proto.source.as_ref());
    }

    // Line tables are not carried.
    write_size(out, 0);
    write_size(out, 0);

    if strip {
        write_size(out, 0);
        write_size(out, 0);
        return;
    }
    write_size(out, proto.local_vars.len());
    for v in &proto.local_vars {
        write_string(out, Some(&v.name));
        write_size(out, v.start_pc as usize);
        write_size(out, v.end_pc as usize);
    }
    write_size(out, proto.upvalues.len());
    for uv in &proto.upvalues {
        write_string(out, uv.name.as_ref());
    }
}

// ─── Undumper ───────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, ChunkError> {
        let b = *self.data.get(self.pos).ok_or(ChunkError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        let end = self.pos.checked_add(n).ok_or(ChunkError::Overflow)?;
        let slice = self.data.get(self.pos..end).ok_or(ChunkError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ChunkError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(N)?);
        Ok(buf)
    }

    fn size(&mut self) -> Result<usize, ChunkError> {
        let mut n: usize = 0;
        loop {
            let b = self.byte()?;
            if n > (usize::MAX >> 7) {
                return Err(ChunkError::Overflow);
            }
            n = (n << 7) | (b & 0x7f) as usize;
            if b & 0x80 != 0 {
                return Ok(n);
            }
        }
    }

    fn u32_size(&mut self) -> Result<u32, ChunkError> {
        u32::try_from(self.size()?).map_err(|_| ChunkError::Overflow)
    }

    fn string(&mut self) -> Result<Option<LuaString>, ChunkError> {
        match self.size()? {
            0 => Ok(None),
            n => Ok(Some(LuaString::from(self.bytes(n - 1)?))),
        }
    }
}

/// Load a binary chunk. A main function without a source name takes `chunkname`.
pub fn undump(data: &[u8], chunkname: &str) -> Result<Rc<Proto>, ChunkError> {
    let mut r = Reader::new(data);
    check_header(&mut r)?;
    let _nupvalues = r.byte()?;
    let fallback = LuaString::from(chunkname);
    let proto = read_function(&mut r, Some(&fallback))?;
    debug!(chunk = chunkname, bytes = data.len(), "undumped chunk");
    Ok(Rc::new(proto))
}

fn check_header(r: &mut Reader<'_>) -> Result<(), ChunkError> {
    if r.bytes(4).map_err(|_| ChunkError::BadSignature)? != SIGNATURE {
        return Err(ChunkError::BadSignature);
    }
    let version = r.byte()?;
    if version != VERSION {
        return Err(ChunkError::VersionMismatch(version));
    }
    let format = r.byte()?;
    if format != FORMAT {
        return Err(ChunkError::FormatMismatch(format));
    }
    if r.bytes(LUAC_DATA.len())? != LUAC_DATA {
        return Err(ChunkError::Corrupted);
    }
    for (what, expected) in [
        ("Instruction", INSTRUCTION_SIZE),
        ("lua_Integer", INTEGER_SIZE),
        ("lua_Number", NUMBER_SIZE),
    ] {
        let got = r.byte()?;
        if got != expected {
            return Err(ChunkError::SizeMismatch { what, expected, got });
        }
    }
    if i64::from_le_bytes(r.array()?) != LUAC_INT {
        return Err(ChunkError::IntegerMismatch);
    }
    if f64::from_le_bytes(r.array()?) != LUAC_NUM {
        return Err(ChunkError::FloatMismatch);
    }
    Ok(())
}

fn read_constant(r: &mut Reader<'_>) -> Result<Constant, ChunkError> {
    let tag = r.byte()?;
    Ok(match tag {
        TAG_NIL => Constant::Nil,
        TAG_FALSE => Constant::Boolean(false),
        TAG_TRUE => Constant::Boolean(true),
        TAG_INT => Constant::Number(i64::from_le_bytes(r.array()?) as f64),
        TAG_FLOAT => Constant::Number(f64::from_le_bytes(r.array()?)),
        TAG_SHORT_STR | TAG_LONG_STR => Constant::String(r.string()?.ok_or(ChunkError::Corrupted)?),
        other => return Err(ChunkError::BadConstantTag(other)),
    })
}

fn read_function(r: &mut Reader<'_>, parent_source: Option<&LuaString>) -> Result<Proto, ChunkError> {
    let mut p = Proto {
        source: r.string()?.or_else(|| parent_source.cloned()),
        line_defined: r.u32_size()?,
        last_line_defined: r.u32_size()?,
        num_params: r.byte()?,
        is_vararg: r.byte()? != 0,
        max_stack_size: r.byte()?,
        ..Proto::default()
    };

    let ncode = r.size()?;
    for pc in 0..ncode {
        let inst = Instruction(u32::from_le_bytes(r.array()?));
        if inst.opcode().is_none() {
            return Err(ChunkError::BadInstruction(pc));
        }
        p.code.push(inst);
    }

    let nk = r.size()?;
    for _ in 0..nk {
        p.constants.push(read_constant(r)?);
    }

    let nup = r.size()?;
    for _ in 0..nup {
        p.upvalues.push(UpvalDesc {
            name: None,
            in_stack: r.byte()? != 0,
            index: r.byte()?,
            kind: r.byte()?,
        });
    }

    let nprotos = r.size()?;
    for _ in 0..nprotos {
        let child = read_function(r, p.source.as_ref())?;
        p.protos.push(Rc::new(child));
    }

    // Relative line info is one signed byte per instruction.
    let nlines = r.size()?;
    r.bytes(nlines)?;
    let nabs = r.size()?;
    for _ in 0..nabs {
        r.size()?;
        r.size()?;
    }

    let nlocals = r.size()?;
    for _ in 0..nlocals {
        let name = r.string()?.unwrap_or_else(|| LuaString::from("?"));
        p.local_vars.push(LocalVar {
            name,
            start_pc: r.u32_size()?,
            end_pc: r.u32_size()?,
        });
    }

    let nnames = r.size()?;
    for i in 0..nnames {
        let name = r.string()?;
        if let Some(uv) = p.upvalues.get_mut(i) {
            uv.name = name;
        }
    }
    Ok(p)
}
