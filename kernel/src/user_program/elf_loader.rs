//! Loading an executable into a fresh address space.
//!
//! Only the ELF and program headers are read here. Each loadable segment
//! becomes one file-backed descriptor per page, and the bytes arrive on the
//! first fault. The one page that is made resident up front is the top of
//! the stack, which receives the program arguments.

#![allow(clippy::cast_possible_truncation)]

use super::elf::{
    parse_program_headers, ElfArchitecture, ElfHeader, ElfProgramHeader, ElfProgramType,
    ElfUsage, ELF_HEADER_SIZE, ELF_MAGIC, PROGRAM_HEADER_SIZE,
};
use super::process::Process;
use crate::mem::{
    fault::{resolve, FaultError},
    spt::{FileSegment, PageDescriptor},
    user::{UserAccessError, UserMemory},
};
use crate::system::VmSystem;
use crate::vfs::{self, FileRef, FileSystem};
use alloc::{vec, vec::Vec};
use core::fmt;
use pagewright_shared::{
    eprintln,
    mem::{is_user_vaddr, page_offset, page_round_down, page_round_up, OFFSET, PAGE_FRAME_SIZE},
};
use zerocopy::{little_endian::U32, AsBytes};

/// Most program headers an executable may carry.
const MAX_PROGRAM_HEADERS: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    InvalidMagicNumber,
    UnsupportedClass,
    UnsupportedEndianess,
    UnsupportedVersion,
    UnsupportedType,
    UnsupportedMachine,
    BadProgramHeaderSize,
    TooManyProgramHeaders,
    /// The file ends inside a header.
    Truncated,
    /// The image asks for dynamic linking.
    UnsupportedSegment(ElfProgramType),
    SegmentError(ElfSegmentError),
}

// Error types that will arise when we try to validate segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfSegmentError {
    DifferentPageOffset,
    OffsetOutOfRange,
    MemSizeLesserThanFileSize,
    EmptyMemSize,
    VMRegionOutOfRange,
    VMRegionWrapAround,
    PageZeroMapping,
    /// Two segments claim the same page.
    Overlap(usize),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagicNumber => write!(f, "not an ELF file"),
            Self::UnsupportedClass => write!(f, "not a 32-bit ELF"),
            Self::UnsupportedEndianess => write!(f, "not little endian"),
            Self::UnsupportedVersion => write!(f, "unknown ELF version"),
            Self::UnsupportedType => write!(f, "not an executable"),
            Self::UnsupportedMachine => write!(f, "not an x86 executable"),
            Self::BadProgramHeaderSize => write!(f, "unexpected program header size"),
            Self::TooManyProgramHeaders => write!(f, "too many program headers"),
            Self::Truncated => write!(f, "file ends inside its headers"),
            Self::UnsupportedSegment(ty) => write!(f, "unsupported segment {ty:?}"),
            Self::SegmentError(e) => write!(f, "bad segment: {e:?}"),
        }
    }
}

impl core::error::Error for ElfError {}

impl From<ElfSegmentError> for ElfError {
    fn from(e: ElfSegmentError) -> Self {
        Self::SegmentError(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    EmptyCommandLine,
    /// The arguments do not fit in the first stack page.
    CommandLineTooLong,
    Open(vfs::Error),
    Read(vfs::Error),
    Elf(ElfError),
    Stack(UserAccessError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommandLine => write!(f, "empty command line"),
            Self::CommandLineTooLong => write!(f, "arguments do not fit on the stack"),
            Self::Open(e) => write!(f, "open failed: {e}"),
            Self::Read(e) => write!(f, "read failed: {e}"),
            Self::Elf(e) => write!(f, "{e}"),
            Self::Stack(e) => write!(f, "stack setup failed: {e}"),
        }
    }
}

impl core::error::Error for LoadError {}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl From<ElfSegmentError> for LoadError {
    fn from(e: ElfSegmentError) -> Self {
        Self::Elf(e.into())
    }
}

impl From<UserAccessError> for LoadError {
    fn from(e: UserAccessError) -> Self {
        Self::Stack(e)
    }
}

impl From<FaultError> for LoadError {
    fn from(e: FaultError) -> Self {
        Self::Stack(e.into())
    }
}

/// Where a freshly loaded process starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    pub entry: usize,
    pub esp: usize,
}

fn verify_elf_header(header: &ElfHeader) -> Result<(), ElfError> {
    // 1 for 32-bit
    if header.class != 1 {
        return Err(ElfError::UnsupportedClass);
    }
    // 1 for little endian
    if header.data_encoding != 1 {
        return Err(ElfError::UnsupportedEndianess);
    }
    if header.header_version != 1 || header.elf_version != 1 {
        return Err(ElfError::UnsupportedVersion);
    }
    if header.usage != ElfUsage::Executable {
        return Err(ElfError::UnsupportedType);
    }
    if header.architecture != ElfArchitecture::X86 {
        return Err(ElfError::UnsupportedMachine);
    }
    if usize::from(header.program_header_entry_size) != PROGRAM_HEADER_SIZE {
        return Err(ElfError::BadProgramHeaderSize);
    }
    if header.program_header_count > MAX_PROGRAM_HEADERS {
        return Err(ElfError::TooManyProgramHeaders);
    }
    Ok(())
}

fn validate_segment(phdr: &ElfProgramHeader, file_len: u64) -> Result<(), ElfSegmentError> {
    // p_offset and p_vaddr must have the same page offset.
    if page_offset(phdr.file_offset as usize) != page_offset(phdr.virtual_address as usize) {
        return Err(ElfSegmentError::DifferentPageOffset);
    }

    // p_offset must point within the file.
    if u64::from(phdr.file_offset) > file_len {
        return Err(ElfSegmentError::OffsetOutOfRange);
    }

    if phdr.memory_size < phdr.file_size {
        return Err(ElfSegmentError::MemSizeLesserThanFileSize);
    }

    if phdr.memory_size == 0 {
        return Err(ElfSegmentError::EmptyMemSize);
    }

    // The region must start and end in user space without wrapping around.
    let start = phdr.virtual_address as usize;
    let end = start
        .checked_add(phdr.memory_size as usize)
        .ok_or(ElfSegmentError::VMRegionWrapAround)?;
    if !is_user_vaddr(start) || !is_user_vaddr(end - 1) {
        return Err(ElfSegmentError::VMRegionOutOfRange);
    }

    // Page 0 stays unmapped so null dereferences fault.
    if start < PAGE_FRAME_SIZE {
        return Err(ElfSegmentError::PageZeroMapping);
    }

    Ok(())
}

/// Reads exactly `len` bytes at `offset`, or reports the file as truncated.
fn read_exact(file: &FileRef, offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
    let mut buf = vec![0; len];
    let read = file.read_at(offset, &mut buf).map_err(LoadError::Read)?;
    if read != len {
        return Err(ElfError::Truncated.into());
    }
    Ok(buf)
}

fn read_headers(file: &FileRef) -> Result<(ElfHeader, Vec<ElfProgramHeader>), LoadError> {
    let bytes = read_exact(file, 0, ELF_HEADER_SIZE)?;
    if bytes[..ELF_MAGIC.len()] != ELF_MAGIC {
        return Err(ElfError::InvalidMagicNumber.into());
    }
    let (_, header) = ElfHeader::parse(&bytes).map_err(|_| ElfError::Truncated)?;
    verify_elf_header(&header)?;

    let table_len = usize::from(header.program_header_count) * PROGRAM_HEADER_SIZE;
    let table = read_exact(file, u64::from(header.program_headers_offset), table_len)?;
    let program_headers = parse_program_headers(
        &table,
        header.program_header_count,
        header.program_header_entry_size,
    )
    .map_err(|_| ElfError::Truncated)?;
    Ok((header, program_headers))
}

/// Registers one file-backed descriptor per page of `phdr`.
fn load_segment(
    process: &Process,
    file: &FileRef,
    phdr: &ElfProgramHeader,
) -> Result<(), ElfSegmentError> {
    let in_page = page_offset(phdr.virtual_address as usize);
    let mut file_page = u64::from(phdr.file_offset) - in_page as u64;
    let mut upage = page_round_down(phdr.virtual_address as usize);

    let span = page_round_up(in_page + phdr.memory_size as usize)
        .ok_or(ElfSegmentError::VMRegionWrapAround)?;
    let mut read_bytes = if phdr.file_size > 0 {
        in_page + phdr.file_size as usize
    } else {
        0
    };

    let mut spt = process.space().spt().lock();
    for _ in 0..span / PAGE_FRAME_SIZE {
        let page_read = read_bytes.min(PAGE_FRAME_SIZE);
        let segment = FileSegment {
            file: file.clone(),
            offset: file_page,
            read_bytes: page_read,
            zero_bytes: PAGE_FRAME_SIZE - page_read,
        };
        if !spt.insert(PageDescriptor::file_backed(upage, phdr.writable(), segment)) {
            return Err(ElfSegmentError::Overlap(upage));
        }
        read_bytes -= page_read;
        file_page += PAGE_FRAME_SIZE as u64;
        upage += PAGE_FRAME_SIZE;
    }
    Ok(())
}

/// Builds the initial stack below `OFFSET`: the argument strings, a null
/// sentinel, the `argv` array, `argv`, `argc` and a fake return address.
/// Returns the resulting stack pointer.
fn setup_stack(system: &VmSystem, process: &Process, args: &[&str]) -> Result<usize, LoadError> {
    let strings: usize = args.iter().map(|arg| arg.len() + 1).sum();
    let words = args.len() + 4;
    let needed = strings.next_multiple_of(4) + words * 4;
    if needed > PAGE_FRAME_SIZE {
        return Err(LoadError::CommandLineTooLong);
    }

    let space = process.space();
    let stack_page = OFFSET - PAGE_FRAME_SIZE;
    if !space.spt().lock().insert(PageDescriptor::stack(stack_page)) {
        return Err(ElfSegmentError::Overlap(stack_page).into());
    }
    resolve(system, space, stack_page)?;

    let user = UserMemory::new(system, space, OFFSET);
    let mut esp = OFFSET;
    let mut argv = Vec::with_capacity(args.len());
    for arg in args.iter().rev() {
        esp -= arg.len() + 1;
        user.write(esp, arg.as_bytes())?;
        user.write(esp + arg.len(), &[0])?;
        argv.push(esp);
    }
    esp &= !3;

    let push = |esp: &mut usize, word: usize| -> Result<(), UserAccessError> {
        *esp -= 4;
        user.write(*esp, U32::new(word as u32).as_bytes())
    };
    push(&mut esp, 0)?;
    // `argv` was filled last argument first, so pushing in order leaves
    // argv[0] lowest.
    for ptr in argv {
        push(&mut esp, ptr)?;
    }
    let argv_base = esp;
    push(&mut esp, argv_base)?;
    push(&mut esp, args.len())?;
    push(&mut esp, 0)?;

    debug_assert_eq!(OFFSET - esp, needed);
    Ok(esp)
}

/// Loads the program named by the first word of `cmd_line` into
/// `process`, which must have a fresh address space.
///
/// On failure whatever was set up is left in the address space for
/// [`on_process_exit`](super::process::on_process_exit) to release.
pub fn load_executable(
    system: &VmSystem,
    fs: &dyn FileSystem,
    process: &mut Process,
    cmd_line: &str,
) -> Result<UserEntry, LoadError> {
    let args: Vec<&str> = cmd_line.split(' ').filter(|arg| !arg.is_empty()).collect();
    let Some(&name) = args.first() else {
        return Err(LoadError::EmptyCommandLine);
    };

    let result = load(system, fs, process, name, &args);
    if let Err(e) = &result {
        eprintln!("load: {name}: {e}");
    }
    result
}

fn load(
    system: &VmSystem,
    fs: &dyn FileSystem,
    process: &mut Process,
    name: &str,
    args: &[&str],
) -> Result<UserEntry, LoadError> {
    let file = fs.open(name).map_err(LoadError::Open)?;
    let (header, program_headers) = read_headers(&file)?;

    for phdr in &program_headers {
        match phdr.program_type {
            ElfProgramType::Load => {
                validate_segment(phdr, file.len())?;
                load_segment(process, &file, phdr)?;
            }
            ty @ (ElfProgramType::Dynamic
            | ElfProgramType::Interpret
            | ElfProgramType::Shlib) => {
                return Err(ElfError::UnsupportedSegment(ty).into());
            }
            _ => {}
        }
    }

    let esp = setup_stack(system, process, args)?;

    file.deny_write();
    process.set_executable(file);
    process.set_user_esp(esp);

    Ok(UserEntry {
        entry: header.program_entry as usize,
        esp,
    })
}
