//! `WorldPacket` handles.
//!
//! Packet hooks hand scripts a handle to the host's packet; scripts may also
//! build their own with `CreatePacket` and return it as a replacement.

use super::template::{ElunaGlobal, ElunaRegister, MethodCall, TypeRegistry};
use crate::host::NativeType;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldPacket {
    opcode: u16,
    data: Vec<u8>,
    rpos: usize,
}

impl NativeType for WorldPacket {
    const TYPE_NAME: &'static str = "WorldPacket";
}

impl WorldPacket {
    pub fn new(opcode: u16, data: Vec<u8>) -> Self {
        Self { opcode, data, rpos: 0 }
    }

    pub fn with_capacity(opcode: u16, capacity: usize) -> Self {
        Self::new(opcode, Vec::with_capacity(capacity))
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn read<const N: usize>(&mut self) -> mlua::Result<[u8; N]> {
        let end = self.rpos + N;
        let bytes = self.data.get(self.rpos..end).ok_or_else(|| {
            mlua::Error::runtime(format!(
                "attempted to read {} bytes at position {} of a {} byte packet",
                N,
                self.rpos,
                self.data.len()
            ))
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.rpos = end;
        Ok(out)
    }

    fn read_cstring(&mut self) -> mlua::Result<String> {
        let rest = self.data.get(self.rpos..).unwrap_or_default();
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.rpos = (self.rpos + len + 1).min(self.data.len());
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

fn get_opcode(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    Ok(call.push(packet.opcode))
}

fn set_opcode(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    packet.opcode = call.check(2)?;
    Ok(0)
}

fn get_size(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    Ok(call.push(packet.data.len() as u32))
}

fn read_ubyte(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let [b] = packet.read::<1>()?;
    Ok(call.push(b))
}

fn read_ulong(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let v = u32::from_le_bytes(packet.read::<4>()?);
    Ok(call.push(v))
}

fn read_string(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let text = packet.read_cstring()?;
    Ok(call.push(text))
}

fn write_ubyte(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let v: u8 = call.check(2)?;
    packet.data.push(v);
    Ok(0)
}

fn write_ulong(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let v: u32 = call.check(2)?;
    packet.data.extend_from_slice(&v.to_le_bytes());
    Ok(0)
}

fn write_string(call: &mut MethodCall<'_>, packet: &mut WorldPacket) -> mlua::Result<usize> {
    let v: String = call.check(2)?;
    packet.data.extend_from_slice(v.as_bytes());
    packet.data.push(0);
    Ok(0)
}

pub const PACKET_METHODS: &[ElunaRegister<WorldPacket>] = &[
    ElunaRegister::new("GetOpcode", get_opcode),
    ElunaRegister::new("SetOpcode", set_opcode),
    ElunaRegister::new("GetSize", get_size),
    ElunaRegister::new("ReadUByte", read_ubyte),
    ElunaRegister::new("ReadULong", read_ulong),
    ElunaRegister::new("ReadString", read_string),
    ElunaRegister::new("WriteUByte", write_ubyte),
    ElunaRegister::new("WriteULong", write_ulong),
    ElunaRegister::new("WriteString", write_string),
];

/// `CreatePacket(opcode, size)`
fn create_packet(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let opcode: u16 = call.check(1)?;
    let size: u32 = call.check_or(2, 0)?;
    let value = super::object::push_owned(call.lua(), WorldPacket::with_capacity(opcode, size as usize))?;
    Ok(call.push(value))
}

pub(crate) fn register(registry: &TypeRegistry<'_>) -> mlua::Result<()> {
    registry.register::<WorldPacket>(PACKET_METHODS)?;
    registry.register_globals(&[ElunaGlobal::new("CreatePacket", create_packet)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_past_end() {
        let mut packet = WorldPacket::new(1, vec![7]);
        assert_eq!(packet.read::<1>().unwrap(), [7]);
        assert!(packet.read::<1>().is_err());
    }

    #[test]
    fn test_cstring() {
        let mut packet = WorldPacket::new(1, b"hi\0there".to_vec());
        assert_eq!(packet.read_cstring().unwrap(), "hi");
        assert_eq!(packet.read_cstring().unwrap(), "there");
        assert_eq!(packet.read_cstring().unwrap(), "");
    }
}
