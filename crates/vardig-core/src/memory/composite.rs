//! Values assembled from several locations.
//!
//! Optimized code can keep one variable partly in registers and partly on the
//! stack. The debug metadata describes such a variable as a list of pieces;
//! [`CompositeMemory`] concatenates them into one flat image addressed from
//! [`FAKE_ADDRESS_UNRESOLVED`] and routes writes back to the pieces they touch.

use std::sync::{Mutex, PoisonError};

use gimli::Register;

use super::{MemoryReadWriter, SharedMemory};
use crate::error::{Result, VardigError};
use crate::types::{Address, DwarfRegister, DwarfRegisters};

/// Base address of every composite image.
pub const FAKE_ADDRESS_UNRESOLVED: Address = Address::new(0xbeed_0000_0000_0000);

/// Where one piece of a composite value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PieceKind
{
    /// Low bytes of a register.
    Register(Register),
    /// A memory range.
    Memory(Address),
    /// A constant known to the debug metadata.
    Immediate
    {
        /// Integer form of the constant.
        value: u64,
        /// Explicit byte image, overriding `value`.
        bytes: Option<Vec<u8>>,
    },
}

/// One piece of a composite value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece
{
    /// Bytes contributed; 0 on the last piece means "the whole location".
    pub size: usize,
    /// Location of the piece.
    pub kind: PieceKind,
}

impl Piece
{
    /// Register piece.
    pub fn register(register: Register, size: usize) -> Self
    {
        Self {
            size,
            kind: PieceKind::Register(register),
        }
    }

    /// Memory piece.
    pub fn memory(addr: Address, size: usize) -> Self
    {
        Self {
            size,
            kind: PieceKind::Memory(addr),
        }
    }

    /// Immediate piece.
    pub fn immediate(value: u64, size: usize) -> Self
    {
        Self {
            size,
            kind: PieceKind::Immediate { value, bytes: None },
        }
    }
}

/// Callback used to write a changed register back to the stopped thread.
pub type RegisterChangeFn = Box<dyn Fn(Register, &DwarfRegister) -> Result<()> + Send + Sync>;

struct State
{
    regs: DwarfRegisters,
    data: Vec<u8>,
}

/// Flat image of a value split across registers, memory and constants.
pub struct CompositeMemory
{
    real: SharedMemory,
    pieces: Vec<Piece>,
    change_register: Option<RegisterChangeFn>,
    state: Mutex<State>,
}

impl CompositeMemory
{
    /// Assemble the image. `ptr_size` sizes an unsized trailing immediate piece.
    ///
    /// Register pieces larger than the captured register and unreadable memory
    /// pieces are errors.
    pub fn new(real: SharedMemory, regs: DwarfRegisters, mut pieces: Vec<Piece>, ptr_size: usize) -> Result<Self>
    {
        let mut data = Vec::new();
        let last = pieces.len().saturating_sub(1);
        for (i, piece) in pieces.iter_mut().enumerate() {
            match &piece.kind {
                PieceKind::Register(reg) => {
                    let bytes = regs.get(*reg).map(|r| r.bytes.as_slice()).unwrap_or_default();
                    if piece.size == 0 && i == last {
                        piece.size = bytes.len();
                    }
                    if piece.size > bytes.len() {
                        return Err(VardigError::Runtime(format!(
                            "could not read {} bytes from register {} (size: {})",
                            piece.size,
                            reg.0,
                            bytes.len()
                        )));
                    }
                    data.extend_from_slice(&bytes[..piece.size]);
                }
                PieceKind::Memory(addr) => {
                    let mut buf = vec![0u8; piece.size];
                    super::read_exact(real.as_ref(), &mut buf, *addr)?;
                    data.extend_from_slice(&buf);
                }
                PieceKind::Immediate { value, bytes } => {
                    if piece.size == 0 && i == last {
                        piece.size = ptr_size;
                    }
                    let mut buf = match bytes {
                        Some(bytes) => bytes.clone(),
                        None => value.to_le_bytes().to_vec(),
                    };
                    buf.resize(buf.len().max(piece.size), 0);
                    data.extend_from_slice(&buf[..piece.size]);
                }
            }
        }
        Ok(Self {
            real,
            pieces,
            change_register: None,
            state: Mutex::new(State { regs, data }),
        })
    }

    /// Allow writes to register pieces through `change`.
    #[must_use]
    pub fn with_register_writer(mut self, change: RegisterChangeFn) -> Self
    {
        self.change_register = Some(change);
        self
    }

    /// Size of the assembled image.
    pub fn len(&self) -> usize
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).data.len()
    }

    /// `true` if no piece contributed any bytes.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    fn offset(&self, addr: Address, len: usize, data_len: usize) -> Option<usize>
    {
        let off = addr.value().checked_sub(FAKE_ADDRESS_UNRESOLVED.value())?;
        let end = off.checked_add(len as u64)?;
        if off >= data_len as u64 || end > data_len as u64 {
            return None;
        }
        Some(off as usize)
    }
}

impl MemoryReadWriter for CompositeMemory
{
    fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>
    {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(off) = self.offset(addr, buf.len(), state.data.len()) else {
            return Err(VardigError::MemoryRead {
                addr,
                len: buf.len(),
                details: "read out of bounds".into(),
            });
        };
        buf.copy_from_slice(&state.data[off..off + buf.len()]);
        Ok(buf.len())
    }

    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(off) = self.offset(addr, data.len(), state.data.len()) else {
            return Err(VardigError::MemoryWrite {
                addr,
                len: data.len(),
                details: "write out of bounds".into(),
            });
        };
        let Some(change) = &self.change_register else {
            return Err(VardigError::MemoryWrite {
                addr,
                len: data.len(),
                details: "can not write registers".into(),
            });
        };
        state.data[off..off + data.len()].copy_from_slice(data);

        let (start, end) = (off, off + data.len());
        let mut cur = 0usize;
        for piece in &self.pieces {
            if cur < end && start < cur + piece.size {
                let piece_bytes = state.data[cur..cur + piece.size].to_vec();
                match &piece.kind {
                    PieceKind::Register(reg) => {
                        let mut updated = state.regs.get(*reg).cloned().unwrap_or_default();
                        updated.overwrite(0, &piece_bytes);
                        change(*reg, &updated)?;
                        state.regs.set(*reg, updated);
                    }
                    PieceKind::Memory(piece_addr) => {
                        super::write_exact(self.real.as_ref(), *piece_addr, &piece_bytes)?;
                    }
                    PieceKind::Immediate { .. } => {}
                }
            }
            cur += piece.size;
        }
        Ok(data.len())
    }

    fn real_memory(&self) -> Option<SharedMemory>
    {
        Some(self.real.clone())
    }

    fn cacheable(&self) -> bool
    {
        false
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Stack(Mutex<Vec<u8>>);

    impl MemoryReadWriter for Stack
    {
        fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>
        {
            let bytes = self.0.lock().unwrap();
            let start = addr.value() as usize;
            buf.copy_from_slice(&bytes[start..start + buf.len()]);
            Ok(buf.len())
        }

        fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
        {
            let mut bytes = self.0.lock().unwrap();
            let start = addr.value() as usize;
            bytes[start..start + data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    fn setup() -> (Arc<Stack>, CompositeMemory)
    {
        let stack = Arc::new(Stack(Mutex::new(vec![0x11; 32])));
        let mut regs = DwarfRegisters::new();
        regs.set(Register(0), DwarfRegister::from_u64(0x2222_2222_2222_2222));
        let mem = CompositeMemory::new(
            stack.clone(),
            regs,
            vec![Piece::register(Register(0), 8), Piece::memory(Address::new(8), 8)],
            8,
        )
        .unwrap();
        (stack, mem)
    }

    #[test]
    fn test_pieces_are_concatenated()
    {
        let (_, mem) = setup();
        assert_eq!(mem.len(), 16);
        let mut buf = [0u8; 16];
        mem.read_memory(&mut buf, FAKE_ADDRESS_UNRESOLVED).unwrap();
        assert_eq!(&buf[..8], &[0x22; 8]);
        assert_eq!(&buf[8..], &[0x11; 8]);
        assert!(mem.read_memory(&mut buf, FAKE_ADDRESS_UNRESOLVED + 8).is_err());
        assert!(!mem.cacheable());
    }

    #[test]
    fn test_write_without_register_writer_fails()
    {
        let (_, mem) = setup();
        assert!(mem.write_memory(FAKE_ADDRESS_UNRESOLVED, &[1]).is_err());
    }

    #[test]
    fn test_write_routes_to_pieces()
    {
        let (stack, mem) = setup();
        let changed = Arc::new(Mutex::new(Vec::new()));
        let sink = changed.clone();
        let mem = mem.with_register_writer(Box::new(move |reg, value| {
            sink.lock().unwrap().push((reg, value.uint64_val));
            Ok(())
        }));

        mem.write_memory(FAKE_ADDRESS_UNRESOLVED + 8, &[0xaa, 0xbb]).unwrap();
        assert_eq!(&stack.0.lock().unwrap()[8..10], &[0xaa, 0xbb]);
        assert!(changed.lock().unwrap().is_empty());

        mem.write_memory(FAKE_ADDRESS_UNRESOLVED, &7u64.to_le_bytes()).unwrap();
        assert_eq!(changed.lock().unwrap().as_slice(), &[(Register(0), 7)]);
    }

    #[test]
    fn test_oversized_register_piece_is_rejected()
    {
        let mut regs = DwarfRegisters::new();
        regs.set(Register(1), DwarfRegister::from_bytes(&[1, 2]));
        let stack: SharedMemory = Arc::new(Stack::default());
        assert!(CompositeMemory::new(stack, regs, vec![Piece::register(Register(1), 4)], 8).is_err());
    }
}
