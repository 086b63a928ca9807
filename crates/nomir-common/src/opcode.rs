//! One-byte operation codes of the wire protocol.

/// Operation selector carried in every frame header.
///
/// The numeric values are part of the wire contract and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Reachability and version probe; request payload is Nil.
    Hello = 0x01,
    /// Enumerate the responder's public names.
    List = 0x02,
    /// Look up a public name; replies with a reference.
    Resolve = 0x03,

    GetAttr = 0x10,
    SetAttr = 0x11,
    DelAttr = 0x12,
    GetItem = 0x13,
    SetItem = 0x14,
    DelItem = 0x15,
    Len = 0x16,
    Str = 0x17,
    Repr = 0x18,
    Call = 0x19,

    /// The sender no longer holds a proxy onto the target; fire-and-forget.
    Release = 0x20,
    /// The sender is departing; the receiver forgets the peer. Fire-and-forget.
    Goodbye = 0x21,

    ReplyOk = 0x30,
    ReplyErr = 0x31,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::List),
            0x03 => Some(Self::Resolve),
            0x10 => Some(Self::GetAttr),
            0x11 => Some(Self::SetAttr),
            0x12 => Some(Self::DelAttr),
            0x13 => Some(Self::GetItem),
            0x14 => Some(Self::SetItem),
            0x15 => Some(Self::DelItem),
            0x16 => Some(Self::Len),
            0x17 => Some(Self::Str),
            0x18 => Some(Self::Repr),
            0x19 => Some(Self::Call),
            0x20 => Some(Self::Release),
            0x21 => Some(Self::Goodbye),
            0x30 => Some(Self::ReplyOk),
            0x31 => Some(Self::ReplyErr),
            _ => None,
        }
    }

    /// True for the two reply opcodes.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::ReplyOk | Self::ReplyErr)
    }

    /// False for the fire-and-forget notifications.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::Release | Self::Goodbye | Self::ReplyOk | Self::ReplyErr)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::List => "LIST",
            Self::Resolve => "RESOLVE",
            Self::GetAttr => "GETATTR",
            Self::SetAttr => "SETATTR",
            Self::DelAttr => "DELATTR",
            Self::GetItem => "GETITEM",
            Self::SetItem => "SETITEM",
            Self::DelItem => "DELITEM",
            Self::Len => "LEN",
            Self::Str => "STR",
            Self::Repr => "REPR",
            Self::Call => "CALL",
            Self::Release => "RELEASE",
            Self::Goodbye => "GOODBYE",
            Self::ReplyOk => "REPLY_OK",
            Self::ReplyErr => "REPLY_ERR",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Opcode] = &[
        Opcode::Hello,
        Opcode::List,
        Opcode::Resolve,
        Opcode::GetAttr,
        Opcode::SetAttr,
        Opcode::DelAttr,
        Opcode::GetItem,
        Opcode::SetItem,
        Opcode::DelItem,
        Opcode::Len,
        Opcode::Str,
        Opcode::Repr,
        Opcode::Call,
        Opcode::Release,
        Opcode::Goodbye,
        Opcode::ReplyOk,
        Opcode::ReplyErr,
    ];

    #[test]
    fn byte_round_trip() {
        for op in ALL {
            assert_eq!(Opcode::from_u8(*op as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0xff), None);
    }

    #[test]
    fn reply_classification() {
        for op in ALL {
            match op {
                Opcode::ReplyOk | Opcode::ReplyErr => {
                    assert!(op.is_reply());
                    assert!(!op.expects_reply());
                }
                Opcode::Release | Opcode::Goodbye => {
                    assert!(!op.is_reply());
                    assert!(!op.expects_reply());
                }
                _ => {
                    assert!(!op.is_reply());
                    assert!(op.expects_reply());
                }
            }
        }
    }
}
