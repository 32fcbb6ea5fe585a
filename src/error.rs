use thiserror::Error;

// Faults that escape the core. Everything else a program can provoke (reads
// of gated regions, writes to rom space, disabled cart ram) is absorbed the
// way the hardware absorbs it and never surfaces.
#[derive(Debug, Error)]
pub enum Error {
    // The byte buffer cannot be a cartridge. Reported at power up; the
    // machine refuses construction.
    #[error("malformed rom: {0}")]
    MalformedRom(String),
    // An undocumented opcode reached the decoder. The hardware locks up, so
    // emulation stops here.
    #[error("illegal opcode {opcode:#04x} at pc {pc:#06x}")]
    IllegalOpcode { pc: u16, opcode: u8 },
}

pub type Result<T> = std::result::Result<T, Error>;
