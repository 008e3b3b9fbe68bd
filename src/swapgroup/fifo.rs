use {
    crate::{
        connection::ConnectionId,
        events::UnicastEvent,
        surface::{SurfaceId, SurfaceMemory},
        swapgroup::SwapGroupId,
    },
    num_derive::FromPrimitive,
    num_traits::FromPrimitive,
    std::sync::Arc,
    thiserror::Error,
};

linear_ids!(FifoIds, FifoId);

/// The number of request slots and of semaphore slots.
pub const MAX_DEFERRED_REQUESTS: usize = 128;

const PUT_WORD: usize = 0;
const GET_WORD: usize = 1;
const REQUEST_WORDS: usize = 2;
const SEMAPHORE_WORDS: usize = REQUEST_WORDS + MAX_DEFERRED_REQUESTS;
/// Each semaphore slot is `{ data[2], timestamp_lo, timestamp_hi }`. The first word is
/// the payload.
const WORDS_PER_SEMAPHORE: usize = 4;

/// The size of the fifo in bytes.
pub const FIFO_SIZE: usize = (SEMAPHORE_WORDS + MAX_DEFERRED_REQUESTS * WORDS_PER_SEMAPHORE) * 4;

pub const SWAP_GROUP_NOT_READY: u32 = 0x0000_0000;
pub const SWAP_GROUP_READY: u32 = 0xffff_ffff;

const OPCODE_MASK: u32 = 0xff;
const SEMAPHORE_INDEX_SHIFT: u32 = 8;
const SEMAPHORE_INDEX_MASK: u32 = 0xff;
const PER_EYE_STEREO: u32 = 1 << 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum Opcode {
    Nop = 0,
    SwapGroupReady = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub opcode: Opcode,
    pub semaphore: u8,
    pub per_eye_stereo: bool,
}

impl Request {
    pub fn nop() -> Self {
        Self {
            opcode: Opcode::Nop,
            semaphore: 0,
            per_eye_stereo: false,
        }
    }

    pub fn swap_group_ready(semaphore: u8) -> Self {
        Self {
            opcode: Opcode::SwapGroupReady,
            semaphore,
            per_eye_stereo: false,
        }
    }

    pub fn encode(self) -> u32 {
        let mut v = self.opcode as u32 | (self.semaphore as u32) << SEMAPHORE_INDEX_SHIFT;
        if self.per_eye_stereo {
            v |= PER_EYE_STEREO;
        }
        v
    }

    pub fn decode(v: u32) -> Option<Self> {
        Some(Self {
            opcode: Opcode::from_u32(v & OPCODE_MASK)?,
            semaphore: ((v >> SEMAPHORE_INDEX_SHIFT) & SEMAPHORE_INDEX_MASK) as u8,
            per_eye_stereo: v & PER_EYE_STEREO != 0,
        })
    }
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FifoError {
    #[error("The surface is too small to hold a deferred request fifo")]
    TooSmall,
    #[error("Deferred request fifos must live in system memory")]
    NotSysmem,
    #[error("The surface has been unregistered by its owner")]
    Orphaned,
    #[error("The fifo is not a member of a swap group")]
    NotJoined,
    #[error("The fifo is already a member of a swap group")]
    AlreadyJoined,
    #[error("The ring is full")]
    Full,
}

/// A ring of requests in client memory, consumed at vertical blank.
pub struct Fifo {
    pub id: FifoId,
    pub owner: ConnectionId,
    pub surface: SurfaceId,
    pub memory: Arc<SurfaceMemory>,
    pub swap_group: Option<SwapGroupId>,
    /// The semaphore slot of the pending ready request, if the fifo is ready for the
    /// next swap.
    pub ready: Option<u8>,
    pub unicast: Option<Arc<UnicastEvent>>,
}

impl Fifo {
    pub fn new(
        id: FifoId,
        owner: ConnectionId,
        surface: SurfaceId,
        memory: Arc<SurfaceMemory>,
    ) -> Result<Self, FifoError> {
        if memory.len() < FIFO_SIZE {
            return Err(FifoError::TooSmall);
        }
        Ok(Self {
            id,
            owner,
            surface,
            memory,
            swap_group: None,
            ready: None,
            unicast: None,
        })
    }

    /// Executes all requests between the consumer and the producer index.
    ///
    /// The indices are written by the client. Out-of-range values cause the ring to be
    /// ignored until the client repairs them.
    pub fn drain(&mut self) -> usize {
        let (Some(put), Some(get)) = (self.memory.load(PUT_WORD), self.memory.load(GET_WORD))
        else {
            return 0;
        };
        let (put, mut get) = (put as usize, get as usize);
        if put >= MAX_DEFERRED_REQUESTS || get >= MAX_DEFERRED_REQUESTS {
            log::warn!("fifo {}: invalid ring indices {}/{}", self.id, put, get);
            return 0;
        }
        let mut n = 0;
        while get != put {
            let raw = self.memory.load(REQUEST_WORDS + get).unwrap_or(0);
            match Request::decode(raw) {
                Some(req) => self.execute(req),
                None => log::debug!("fifo {}: ignoring unknown request {:#x}", self.id, raw),
            }
            get = (get + 1) % MAX_DEFERRED_REQUESTS;
            n += 1;
        }
        self.memory.store(GET_WORD, get as u32);
        n
    }

    fn execute(&mut self, req: Request) {
        match req.opcode {
            Opcode::Nop => {}
            Opcode::SwapGroupReady => {
                if self.swap_group.is_none() {
                    log::debug!("fifo {}: ready request outside of a swap group", self.id);
                    return;
                }
                if req.semaphore as usize >= MAX_DEFERRED_REQUESTS {
                    log::warn!(
                        "fifo {}: ignoring ready request with invalid semaphore slot {}",
                        self.id,
                        req.semaphore
                    );
                    return;
                }
                self.set_semaphore(req.semaphore, SWAP_GROUP_NOT_READY);
                self.ready = Some(req.semaphore);
            }
        }
    }

    fn set_semaphore(&self, slot: u8, value: u32) {
        if slot as usize >= MAX_DEFERRED_REQUESTS {
            return;
        }
        let word = SEMAPHORE_WORDS + slot as usize * WORDS_PER_SEMAPHORE;
        self.memory.store(word, value);
    }

    /// Releases the member after its swap group swapped.
    pub fn release_ready(&mut self) {
        if let Some(slot) = self.ready.take() {
            self.set_semaphore(slot, SWAP_GROUP_READY);
        }
        if let Some(unicast) = &self.unicast {
            unicast.signal();
        }
    }
}

/// The client side of a fifo.
pub struct FifoWriter {
    memory: Arc<SurfaceMemory>,
}

impl FifoWriter {
    pub fn new(memory: Arc<SurfaceMemory>) -> Self {
        Self { memory }
    }

    pub fn push(&self, req: Request) -> Result<(), FifoError> {
        let put = self.memory.load(PUT_WORD).unwrap_or(0) as usize % MAX_DEFERRED_REQUESTS;
        let get = self.memory.load(GET_WORD).unwrap_or(0) as usize % MAX_DEFERRED_REQUESTS;
        let next = (put + 1) % MAX_DEFERRED_REQUESTS;
        if next == get {
            return Err(FifoError::Full);
        }
        self.memory.store(REQUEST_WORDS + put, req.encode());
        self.memory.store(PUT_WORD, next as u32);
        Ok(())
    }

    pub fn semaphore(&self, slot: u8) -> u32 {
        self.memory
            .load(SEMAPHORE_WORDS + slot as usize * WORDS_PER_SEMAPHORE)
            .unwrap_or(0)
    }

    pub fn set_indices(&self, put: u32, get: u32) {
        self.memory.store(PUT_WORD, put);
        self.memory.store(GET_WORD, get);
    }
}
