use nom::bytes::complete::{tag, take};
use nom::combinator::map;
use nom::error::Error;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;

use alloc::vec::Vec;

/// Size of an ELF32 file header.
pub const ELF_HEADER_SIZE: usize = 52;
/// Size of an ELF32 program header.
pub const PROGRAM_HEADER_SIZE: usize = 32;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

// Flags for p_flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfUsage {
    Relocatable,
    Executable,
    Shared,
    Core,
    Other(u16),
}

// Common Architectures from https://wiki.osdev.org/ELF
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfArchitecture {
    X86,
    X8664,
    Arm,
    RiscV,
    Other(u16),
}

/// The identification bytes and the fields the loader needs, read as
/// little endian. The identification is kept raw so the loader can report
/// exactly which byte it refuses.
#[derive(Copy, Clone, Debug)]
pub struct ElfHeader {
    pub class: u8,
    pub data_encoding: u8,
    pub header_version: u8,
    pub usage: ElfUsage,
    pub architecture: ElfArchitecture,
    pub elf_version: u32,
    pub program_entry: u32,
    pub program_headers_offset: u32,
    pub flags: u32,
    pub program_header_entry_size: u16,
    pub program_header_count: u16,
}

impl ElfHeader {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], ElfHeader> {
        let (bytes, _) = tag(&ELF_MAGIC[..])(bytes)?;
        let (bytes, ident) = take(12usize)(bytes)?;
        let (class, data_encoding, header_version) = (ident[0], ident[1], ident[2]);

        let (bytes, usage) = map(le_u16, |value| match value {
            1 => ElfUsage::Relocatable,
            2 => ElfUsage::Executable,
            3 => ElfUsage::Shared,
            4 => ElfUsage::Core,
            other => ElfUsage::Other(other),
        })(bytes)?;

        let (bytes, architecture) = map(le_u16, |value| match value {
            0x03 => ElfArchitecture::X86,
            0x28 => ElfArchitecture::Arm,
            0x3E => ElfArchitecture::X8664,
            0xF3 => ElfArchitecture::RiscV,
            other => ElfArchitecture::Other(other),
        })(bytes)?;

        let (bytes, elf_version) = le_u32(bytes)?;
        let (bytes, program_entry) = le_u32(bytes)?;
        let (bytes, program_headers_offset) = le_u32(bytes)?;
        let (bytes, _section_headers_offset) = le_u32(bytes)?;
        let (bytes, flags) = le_u32(bytes)?;
        let (bytes, _elf_header_size) = le_u16(bytes)?;
        let (bytes, program_header_entry_size) = le_u16(bytes)?;
        let (bytes, program_header_count) = le_u16(bytes)?;
        // Section headers are of no use to the loader.
        let (bytes, _) = take(6usize)(bytes)?;

        Ok((
            bytes,
            ElfHeader {
                class,
                data_encoding,
                header_version,
                usage,
                architecture,
                elf_version,
                program_entry,
                program_headers_offset,
                flags,
                program_header_entry_size,
                program_header_count,
            },
        ))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfProgramType {
    Null,
    Load,
    Dynamic,
    Interpret,
    Note,
    Shlib,
    Phdr,
    Other(u32),
}

/// A program header. Unlike a section's bytes, the segment contents stay
/// in the file; only where they live is recorded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfProgramHeader {
    pub program_type: ElfProgramType,
    pub file_offset: u32,
    pub virtual_address: u32,
    pub file_size: u32,
    pub memory_size: u32,
    pub flags: u32,
    pub alignment: u32,
}

impl ElfProgramHeader {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (bytes, program_type) = map(le_u32, |value| match value {
            0 => ElfProgramType::Null,
            1 => ElfProgramType::Load,
            2 => ElfProgramType::Dynamic,
            3 => ElfProgramType::Interpret,
            4 => ElfProgramType::Note,
            5 => ElfProgramType::Shlib,
            6 => ElfProgramType::Phdr,
            other => ElfProgramType::Other(other),
        })(bytes)?;

        let (bytes, file_offset) = le_u32(bytes)?;
        let (bytes, virtual_address) = le_u32(bytes)?;
        let (bytes, _physical_address) = le_u32(bytes)?;
        let (bytes, file_size) = le_u32(bytes)?;
        let (bytes, memory_size) = le_u32(bytes)?;
        let (bytes, flags) = le_u32(bytes)?;
        let (bytes, alignment) = le_u32(bytes)?;

        Ok((
            bytes,
            ElfProgramHeader {
                program_type,
                file_offset,
                virtual_address,
                file_size,
                memory_size,
                flags,
                alignment,
            },
        ))
    }

    pub fn writable(&self) -> bool {
        self.flags & PF_W != 0
    }
}

/// Parses `count` program headers laid out `entry_size` bytes apart.
pub fn parse_program_headers(
    mut bytes: &[u8],
    count: u16,
    entry_size: u16,
) -> Result<Vec<ElfProgramHeader>, nom::Err<Error<&[u8]>>> {
    let mut program_headers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (_, program_header) = ElfProgramHeader::parse(bytes)?;
        program_headers.push(program_header);
        (bytes, _) = take(entry_size)(bytes)?;
    }
    Ok(program_headers)
}

#[cfg(test)]
pub mod test {
    //! Builds small ELF32 executables in memory.

    use super::*;
    use alloc::vec;
    use zerocopy::little_endian::{U16, U32};
    use zerocopy::AsBytes;

    #[derive(AsBytes)]
    #[repr(C)]
    struct RawHeader {
        ident: [u8; 16],
        usage: U16,
        machine: U16,
        version: U32,
        entry: U32,
        phoff: U32,
        shoff: U32,
        flags: U32,
        ehsize: U16,
        phentsize: U16,
        phnum: U16,
        shentsize: U16,
        shnum: U16,
        shstrndx: U16,
    }

    #[derive(AsBytes)]
    #[repr(C)]
    struct RawProgramHeader {
        program_type: U32,
        offset: U32,
        vaddr: U32,
        paddr: U32,
        filesz: U32,
        memsz: U32,
        flags: U32,
        align: U32,
    }

    /// A segment to place in a built image. `data` lands at `offset`.
    #[derive(Clone, Debug)]
    pub struct Segment {
        pub program_type: u32,
        pub offset: u32,
        pub vaddr: u32,
        pub memsz: u32,
        pub flags: u32,
        pub data: Vec<u8>,
    }

    impl Segment {
        pub fn load(offset: u32, vaddr: u32, memsz: u32, flags: u32, data: Vec<u8>) -> Self {
            Self {
                program_type: 1,
                offset,
                vaddr,
                memsz,
                flags,
                data,
            }
        }
    }

    #[derive(Clone, Debug)]
    pub struct ElfBuilder {
        pub ident: [u8; 16],
        pub usage: u16,
        pub machine: u16,
        pub entry: u32,
        pub phentsize: u16,
        pub segments: Vec<Segment>,
    }

    impl ElfBuilder {
        pub fn new(entry: u32) -> Self {
            let mut ident = [0; 16];
            ident[..4].copy_from_slice(&ELF_MAGIC);
            ident[4..7].copy_from_slice(&[1, 1, 1]);
            Self {
                ident,
                usage: 2,
                machine: 3,
                entry,
                phentsize: PROGRAM_HEADER_SIZE as u16,
                segments: Vec::new(),
            }
        }

        pub fn segment(mut self, segment: Segment) -> Self {
            self.segments.push(segment);
            self
        }

        pub fn build(&self) -> Vec<u8> {
            let phoff = ELF_HEADER_SIZE;
            let header = RawHeader {
                ident: self.ident,
                usage: U16::new(self.usage),
                machine: U16::new(self.machine),
                version: U32::new(1),
                entry: U32::new(self.entry),
                phoff: U32::new(phoff as u32),
                shoff: U32::new(0),
                flags: U32::new(0),
                ehsize: U16::new(ELF_HEADER_SIZE as u16),
                phentsize: U16::new(self.phentsize),
                phnum: U16::new(self.segments.len() as u16),
                shentsize: U16::new(0),
                shnum: U16::new(0),
                shstrndx: U16::new(0),
            };

            let headers_end = phoff + self.segments.len() * self.phentsize as usize;
            let len = self
                .segments
                .iter()
                .filter(|s| !s.data.is_empty())
                .map(|s| s.offset as usize + s.data.len())
                .fold(headers_end, usize::max);
            let mut image = vec![0; len];
            image[..ELF_HEADER_SIZE].copy_from_slice(header.as_bytes());

            for (i, segment) in self.segments.iter().enumerate() {
                let raw = RawProgramHeader {
                    program_type: U32::new(segment.program_type),
                    offset: U32::new(segment.offset),
                    vaddr: U32::new(segment.vaddr),
                    paddr: U32::new(segment.vaddr),
                    filesz: U32::new(segment.data.len() as u32),
                    memsz: U32::new(segment.memsz),
                    flags: U32::new(segment.flags),
                    align: U32::new(0x1000),
                };
                let at = phoff + i * self.phentsize as usize;
                image[at..at + PROGRAM_HEADER_SIZE].copy_from_slice(raw.as_bytes());
            }
            for segment in &self.segments {
                let at = segment.offset as usize;
                // Headers win over segment bytes that overlap them.
                let from = headers_end.saturating_sub(at).min(segment.data.len());
                image[at + from..at + segment.data.len()].copy_from_slice(&segment.data[from..]);
            }
            image
        }
    }

    #[test]
    fn parses_built_header() {
        let image = ElfBuilder::new(0x0804_8080)
            .segment(Segment::load(0, 0x0804_8000, 0x2000, PF_R | PF_X, vec![0; 0x100]))
            .build();
        let (_, header) = ElfHeader::parse(&image).unwrap();
        assert_eq!(header.class, 1);
        assert_eq!(header.data_encoding, 1);
        assert_eq!(header.usage, ElfUsage::Executable);
        assert_eq!(header.architecture, ElfArchitecture::X86);
        assert_eq!(header.program_entry, 0x0804_8080);
        assert_eq!(header.program_headers_offset, ELF_HEADER_SIZE as u32);
        assert_eq!(header.program_header_count, 1);
    }

    #[test]
    fn parses_program_headers() {
        let image = ElfBuilder::new(0x0804_8000)
            .segment(Segment::load(0x1000, 0x0804_8000, 0x1800, PF_R | PF_W, vec![7; 0x20]))
            .segment(Segment {
                program_type: 4,
                offset: 0,
                vaddr: 0,
                memsz: 0,
                flags: 0,
                data: Vec::new(),
            })
            .build();
        let headers = parse_program_headers(&image[ELF_HEADER_SIZE..], 2, 32).unwrap();
        assert_eq!(
            headers[0],
            ElfProgramHeader {
                program_type: ElfProgramType::Load,
                file_offset: 0x1000,
                virtual_address: 0x0804_8000,
                file_size: 0x20,
                memory_size: 0x1800,
                flags: PF_R | PF_W,
                alignment: 0x1000,
            }
        );
        assert!(headers[0].writable());
        assert_eq!(headers[1].program_type, ElfProgramType::Note);
    }

    #[test]
    fn rejects_bad_magic_and_short_input() {
        let mut image = ElfBuilder::new(0).build();
        assert!(ElfHeader::parse(&image[..20]).is_err());
        image[0] = 0;
        assert!(ElfHeader::parse(&image).is_err());
        assert!(parse_program_headers(&[0; 16], 1, 32).is_err());
    }
}
