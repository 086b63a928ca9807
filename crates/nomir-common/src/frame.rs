//! Datagram framing.
//!
//! One datagram carries exactly one message:
//!
//! ```text
//! [ magic:4 | version:1 | flags:1 | tid:4 (big-endian) | opcode:1 | payload ]
//! ```
//!
//! The receiver parses only this header before routing; payload decoding
//! happens later, on a worker (for requests) or on the initiator's own stack
//! (for replies).

use crate::error::{NomirError, Result};
use crate::opcode::Opcode;

/// Magic bytes identifying the nomir protocol.
pub const WIRE_MAGIC: [u8; 4] = [0x4e, 0x4f, 0x4d, 0x31]; // "NOM1"

/// Current protocol version. Breaking wire changes bump this.
pub const WIRE_VERSION: u8 = 1;

/// Flag bit 0: this frame is a reply.
pub const FLAG_REPLY: u8 = 0b0000_0001;

pub const HEADER_SIZE: usize = 11;

/// Fixed datagram budget; encoding beyond this fails locally with
/// `PayloadTooLarge` instead of fragmenting.
pub const MAX_DATAGRAM: usize = 1400;

/// Payload room left once the header is accounted for.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_SIZE;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub tid: u32,
    pub opcode: Opcode,
}

impl Header {
    pub fn request(tid: u32, opcode: Opcode) -> Self {
        Header {
            version: WIRE_VERSION,
            flags: 0,
            tid,
            opcode,
        }
    }

    pub fn reply(tid: u32, opcode: Opcode) -> Self {
        Header {
            version: WIRE_VERSION,
            flags: FLAG_REPLY,
            tid,
            opcode,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&WIRE_MAGIC);
        buf[4] = self.version;
        buf[5] = self.flags;
        buf[6..10].copy_from_slice(&self.tid.to_be_bytes());
        buf[10] = self.opcode as u8;
        buf
    }

    /// Splits a datagram into its header and payload.
    ///
    /// Rejects short datagrams, wrong magic, and unknown opcode bytes. The
    /// version byte is returned as-is; whether to answer
    /// `UnsupportedVersion` or drop is the caller's policy.
    pub fn parse(datagram: &[u8]) -> Result<(Header, &[u8])> {
        if datagram.len() < HEADER_SIZE {
            return Err(NomirError::malformed(
                datagram.len(),
                "datagram shorter than frame header",
            ));
        }
        if datagram[0..4] != WIRE_MAGIC {
            return Err(NomirError::malformed(0, "bad magic"));
        }
        let version = datagram[4];
        let flags = datagram[5];
        let tid = u32::from_be_bytes([datagram[6], datagram[7], datagram[8], datagram[9]]);
        let opcode = Opcode::from_u8(datagram[10])
            .ok_or_else(|| NomirError::malformed(10, format!("unknown opcode {:#04x}", datagram[10])))?;
        Ok((
            Header {
                version,
                flags,
                tid,
                opcode,
            },
            &datagram[HEADER_SIZE..],
        ))
    }
}

/// Concatenates header and payload into one datagram, enforcing the budget.
pub fn seal(header: Header, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(NomirError::PayloadTooLarge {
            size: HEADER_SIZE + payload.len(),
            limit: MAX_DATAGRAM,
        });
    }
    let mut datagram = Vec::with_capacity(HEADER_SIZE + payload.len());
    datagram.extend_from_slice(&header.encode());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = Header::request(0xDEADBEEF, Opcode::Call);
        let datagram = seal(header, b"payload").unwrap();
        let (parsed, payload) = Header::parse(&datagram).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload, b"payload");
        assert!(!parsed.is_reply());
    }

    #[test]
    fn reply_flag_is_visible() {
        let header = Header::reply(7, Opcode::ReplyOk);
        let (parsed, _) = Header::parse(&seal(header, &[]).unwrap()).unwrap();
        assert!(parsed.is_reply());
        assert_eq!(parsed.tid, 7);
    }

    #[test]
    fn short_datagram_is_malformed() {
        let err = Header::parse(&[0x4e, 0x4f]).unwrap_err();
        assert!(matches!(err, NomirError::MalformedValue { .. }));
    }

    #[test]
    fn bad_magic_is_malformed() {
        let mut datagram = seal(Header::request(1, Opcode::Hello), &[]).unwrap();
        datagram[0] ^= 0xff;
        assert!(Header::parse(&datagram).is_err());
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let mut datagram = seal(Header::request(1, Opcode::Hello), &[]).unwrap();
        datagram[10] = 0x7f;
        let err = Header::parse(&datagram).unwrap_err();
        assert!(matches!(
            err,
            NomirError::MalformedValue { offset: 10, .. }
        ));
    }

    #[test]
    fn oversized_payload_is_rejected_locally() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = seal(Header::request(1, Opcode::SetItem), &payload).unwrap_err();
        assert!(matches!(err, NomirError::PayloadTooLarge { .. }));
    }

    #[test]
    fn budget_boundary_is_inclusive() {
        let payload = vec![0u8; MAX_PAYLOAD];
        let datagram = seal(Header::request(1, Opcode::SetItem), &payload).unwrap();
        assert_eq!(datagram.len(), MAX_DATAGRAM);
    }
}
