/// Operation tags encoded in the upper 8 bits of user_data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpTag {
    /// Single-shot recvmsg on a bound UDP socket.
    RecvMsg = 1,
    /// 8-byte read on the wakeup eventfd.
    EventFdRead = 2,
    /// Async cancel (informational CQE only).
    Cancel = 3,
}

impl OpTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(OpTag::RecvMsg),
            2 => Some(OpTag::EventFdRead),
            3 => Some(OpTag::Cancel),
            _ => None,
        }
    }
}

/// Encoded user_data for io_uring CQE identification.
///
/// Layout (64-bit):
/// ```text
/// Bits 63..56: OpTag (8 bits)
/// Bits 55..32: unused
/// Bits 31..0:  socket index
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(pub u64);

impl UserData {
    const TAG_SHIFT: u64 = 56;
    const INDEX_MASK: u64 = 0xFFFF_FFFF;

    #[inline]
    pub fn encode(tag: OpTag, socket: u32) -> Self {
        UserData(((tag as u64) << Self::TAG_SHIFT) | socket as u64)
    }

    #[inline]
    pub fn tag(self) -> Option<OpTag> {
        OpTag::from_u8((self.0 >> Self::TAG_SHIFT) as u8)
    }

    #[inline]
    pub fn socket(self) -> u32 {
        (self.0 & Self::INDEX_MASK) as u32
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}
