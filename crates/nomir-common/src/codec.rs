//! Self-delimiting byte codec for [`Value`] trees.
//!
//! Every variant opens with a one-byte tag. Integers and all length prefixes
//! use a variable-width encoding so small magnitudes cost one byte; signed
//! integers are zig-zag folded first. Containers are prefixed with their
//! element count. Decoding is total: any byte sequence either yields a value
//! or a `MalformedValue` carrying the offset of the first offending byte.
//!
//! The codec does no I/O and holds no tables of its own. Handles, the values
//! with no direct wire form, go through the [`ReferenceCodec`] seam: the
//! encoder asks it to turn the handle into a [`WireRef`], the decoder asks it
//! to materialize one back. The runtime plugs its reference table in here;
//! unit tests plug in small fakes.

use crate::error::{NomirError, Result};
use crate::value::{contains_key, Dict, List, Value};

const TAG_NIL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_TEXT: u8 = 0x06;
const TAG_SEQ: u8 = 0x07;
const TAG_MAP: u8 = 0x08;
const TAG_REF: u8 = 0x09;

/// Nesting bound for both encode and decode. Deeper trees are rejected
/// rather than risking the stack on hostile input.
pub const MAX_DEPTH: usize = 32;

/// Whose export table a wire reference points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefOrigin {
    /// The id lives in the sender's export table.
    Sender = 0,
    /// The id lives in the receiver's export table: the sender is handing an
    /// object back to the peer that owns it.
    Receiver = 1,
}

/// A reference as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireRef {
    pub origin: RefOrigin,
    pub id: u64,
}

/// The pluggable reference fallback.
pub trait ReferenceCodec: Send + Sync {
    /// Gives a handle a wire form, registering it on the sending side if it
    /// is not already exported.
    fn to_reference(&self, value: &Value) -> Result<WireRef>;

    /// Materializes a reference received from the remote peer.
    fn from_reference(&self, reference: WireRef) -> Result<Value>;
}

/// Reference codec for contexts with no peer: any reference in either
/// direction is an error. Useful for encoding pure data.
pub struct NoReferences;

impl ReferenceCodec for NoReferences {
    fn to_reference(&self, value: &Value) -> Result<WireRef> {
        Err(NomirError::Unserializable(format!(
            "{} has no wire form without a reference table",
            value.type_name()
        )))
    }

    fn from_reference(&self, reference: WireRef) -> Result<Value> {
        Err(NomirError::not_found(format!(
            "no reference table to resolve id {}",
            reference.id
        )))
    }
}

/// Encodes a value into a fresh buffer.
pub fn encode(value: &Value, refs: &dyn ReferenceCodec) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(value, &mut out, refs)?;
    Ok(out)
}

/// Encodes a value, appending to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>, refs: &dyn ReferenceCodec) -> Result<()> {
    let mut enc = Encoder {
        out,
        refs,
        path: Vec::new(),
    };
    enc.value(value, 0)
}

/// Decodes exactly one value from `bytes`; trailing bytes are an error.
pub fn decode(bytes: &[u8], refs: &dyn ReferenceCodec) -> Result<Value> {
    let mut dec = Decoder {
        buf: bytes,
        pos: 0,
        refs,
    };
    let value = dec.value(0)?;
    if dec.pos != bytes.len() {
        return Err(NomirError::malformed(
            dec.pos,
            format!("{} trailing bytes after value", bytes.len() - dec.pos),
        ));
    }
    Ok(value)
}

fn put_uvarint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

struct Encoder<'a> {
    out: &'a mut Vec<u8>,
    refs: &'a dyn ReferenceCodec,
    /// Container identities on the current traversal path; a repeat is a
    /// back-edge, i.e. a cycle.
    path: Vec<usize>,
}

impl Encoder<'_> {
    fn enter(&mut self, addr: usize) -> Result<()> {
        if self.path.contains(&addr) {
            return Err(NomirError::Unserializable(
                "container graph contains a cycle".into(),
            ));
        }
        self.path.push(addr);
        Ok(())
    }

    fn leave(&mut self) {
        self.path.pop();
    }

    fn value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(NomirError::Unserializable(format!(
                "nesting exceeds {MAX_DEPTH} levels"
            )));
        }
        match value {
            Value::Nil => self.out.push(TAG_NIL),
            Value::Bool(b) => {
                self.out.push(TAG_BOOL);
                self.out.push(*b as u8);
            }
            Value::Int(n) => {
                self.out.push(TAG_INT);
                put_uvarint(self.out, zigzag(*n));
            }
            Value::Float(x) => {
                self.out.push(TAG_FLOAT);
                self.out.extend_from_slice(&x.to_bits().to_be_bytes());
            }
            Value::Bytes(b) => {
                self.out.push(TAG_BYTES);
                put_uvarint(self.out, b.len() as u64);
                self.out.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.out.push(TAG_TEXT);
                put_uvarint(self.out, s.len() as u64);
                self.out.extend_from_slice(s.as_bytes());
            }
            Value::List(items) => {
                self.enter(items.addr())?;
                let snapshot = items.snapshot();
                self.out.push(TAG_SEQ);
                put_uvarint(self.out, snapshot.len() as u64);
                for item in &snapshot {
                    self.value(item, depth + 1)?;
                }
                self.leave();
            }
            Value::Map(pairs) => {
                self.enter(pairs.addr())?;
                let snapshot = pairs.snapshot();
                self.out.push(TAG_MAP);
                put_uvarint(self.out, snapshot.len() as u64);
                for (k, v) in &snapshot {
                    self.value(k, depth + 1)?;
                    self.value(v, depth + 1)?;
                }
                self.leave();
            }
            Value::Handle(_) => {
                let reference = self.refs.to_reference(value)?;
                self.out.push(TAG_REF);
                self.out.push(reference.origin as u8);
                put_uvarint(self.out, reference.id);
            }
        }
        Ok(())
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    refs: &'a dyn ReferenceCodec,
}

impl Decoder<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.buf.len() - self.pos < n {
            return Err(NomirError::malformed(self.pos, "unexpected end of input"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn uvarint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift == 63 && byte > 1 {
                return Err(NomirError::malformed(start, "varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(NomirError::malformed(start, "varint overflows 64 bits"));
            }
        }
    }

    fn length(&mut self) -> Result<usize> {
        let start = self.pos;
        let raw = self.uvarint()?;
        // An honest length can never exceed what is left in the buffer, so
        // bound preallocation by it.
        if raw > (self.buf.len() - start) as u64 {
            return Err(NomirError::malformed(start, "length prefix exceeds input"));
        }
        Ok(raw as usize)
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(NomirError::malformed(
                self.pos,
                format!("nesting exceeds {MAX_DEPTH} levels"),
            ));
        }
        let tag_at = self.pos;
        let tag = self.byte()?;
        match tag {
            TAG_NIL => Ok(Value::Nil),
            TAG_BOOL => {
                let at = self.pos;
                match self.byte()? {
                    0 => Ok(Value::Bool(false)),
                    1 => Ok(Value::Bool(true)),
                    other => Err(NomirError::malformed(
                        at,
                        format!("boolean byte must be 0 or 1, got {other}"),
                    )),
                }
            }
            TAG_INT => Ok(Value::Int(unzigzag(self.uvarint()?))),
            TAG_FLOAT => {
                let raw = self.take(8)?;
                let mut bits = [0u8; 8];
                bits.copy_from_slice(raw);
                Ok(Value::Float(f64::from_bits(u64::from_be_bytes(bits))))
            }
            TAG_BYTES => {
                let len = self.length()?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_TEXT => {
                let len = self.length()?;
                let at = self.pos;
                let raw = self.take(len)?;
                match std::str::from_utf8(raw) {
                    Ok(s) => Ok(Value::Text(s.to_owned())),
                    Err(e) => Err(NomirError::malformed(
                        at + e.valid_up_to(),
                        "text is not valid UTF-8",
                    )),
                }
            }
            TAG_SEQ => {
                let count = self.length()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::List(List::from_vec(items)))
            }
            TAG_MAP => {
                let count = self.length()?;
                let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_at = self.pos;
                    let key = self.value(depth + 1)?;
                    let val = self.value(depth + 1)?;
                    if contains_key(&pairs, &key) {
                        return Err(NomirError::malformed(key_at, "duplicate mapping key"));
                    }
                    pairs.push((key, val));
                }
                Ok(Value::Map(Dict::from_pairs(pairs)))
            }
            TAG_REF => {
                let at = self.pos;
                let origin = match self.byte()? {
                    0 => RefOrigin::Sender,
                    1 => RefOrigin::Receiver,
                    other => {
                        return Err(NomirError::malformed(
                            at,
                            format!("unknown reference origin {other}"),
                        ))
                    }
                };
                let id = self.uvarint()?;
                self.refs.from_reference(WireRef { origin, id })
            }
            other => Err(NomirError::malformed(
                tag_at,
                format!("unknown value tag {other:#04x}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Handle, MirrorObject};
    use crate::value::{dict, list};
    use std::sync::{Arc, Mutex};

    struct Inert;

    #[async_trait::async_trait]
    impl MirrorObject for Inert {}

    /// Minimal export/import table good enough for codec tests.
    #[derive(Default)]
    struct TableRefs {
        exported: Mutex<Vec<Handle>>,
    }

    impl ReferenceCodec for TableRefs {
        fn to_reference(&self, value: &Value) -> Result<WireRef> {
            let handle = value
                .as_handle()
                .ok_or_else(|| NomirError::Unserializable(value.type_name().into()))?;
            let mut exported = self.exported.lock().unwrap();
            for (i, known) in exported.iter().enumerate() {
                if Arc::ptr_eq(known, handle) {
                    return Ok(WireRef {
                        origin: RefOrigin::Sender,
                        id: i as u64,
                    });
                }
            }
            exported.push(handle.clone());
            Ok(WireRef {
                origin: RefOrigin::Sender,
                id: (exported.len() - 1) as u64,
            })
        }

        fn from_reference(&self, reference: WireRef) -> Result<Value> {
            let exported = self.exported.lock().unwrap();
            exported
                .get(reference.id as usize)
                .cloned()
                .map(Value::Handle)
                .ok_or_else(|| NomirError::not_found(format!("id {}", reference.id)))
        }
    }

    fn round_trip(value: Value) -> Value {
        let bytes = encode(&value, &NoReferences).unwrap();
        decode(&bytes, &NoReferences).unwrap()
    }

    #[test]
    fn primitives_round_trip() {
        for value in [
            Value::Nil,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(0),
            Value::Int(-1),
            Value::Int(63),
            Value::Int(-64),
            Value::Int(i64::MAX),
            Value::Int(i64::MIN),
            Value::Float(0.0),
            Value::Float(-2.5),
            Value::Float(f64::INFINITY),
            Value::Bytes(vec![]),
            Value::Bytes(vec![0, 1, 2, 255]),
            Value::Text(String::new()),
            Value::from("héllo"),
        ] {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn nan_round_trips_bitwise() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(round_trip(nan.clone()), nan);
    }

    #[test]
    fn small_ints_cost_two_bytes() {
        for n in [-64i64, -1, 0, 1, 63] {
            let bytes = encode(&Value::Int(n), &NoReferences).unwrap();
            assert_eq!(bytes.len(), 2, "int {n} took {} bytes", bytes.len());
        }
    }

    #[test]
    fn containers_round_trip() {
        let value = dict([
            ("a", Value::Int(1)),
            ("b", list([Value::Int(2), Value::Int(3)])),
            ("c", dict([("nested", Value::Nil)])),
        ]);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn zigzag_is_self_inverse() {
        for n in [i64::MIN, -2, -1, 0, 1, 2, i64::MAX] {
            assert_eq!(unzigzag(zigzag(n)), n);
        }
    }

    #[test]
    fn duplicate_map_keys_are_malformed() {
        // Construct the bytes by hand; Dict::insert cannot create duplicates.
        let mut bytes = vec![TAG_MAP, 2];
        for _ in 0..2 {
            bytes.extend_from_slice(&[TAG_TEXT, 1, b'k', TAG_NIL]);
        }
        let err = decode(&bytes, &NoReferences).unwrap_err();
        match err {
            NomirError::MalformedValue { reason, .. } => {
                assert!(reason.contains("duplicate"), "{reason}")
            }
            other => panic!("expected MalformedValue, got {other:?}"),
        }
    }

    #[test]
    fn cyclic_sequence_is_unserializable() {
        let l = List::new();
        l.push(Value::Int(1));
        l.push(Value::List(l.clone()));
        let err = encode(&Value::List(l), &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::Unserializable(_)));
    }

    #[test]
    fn cyclic_mapping_is_unserializable() {
        let d = Dict::new();
        d.insert(Value::from("self"), Value::Map(d.clone()));
        let err = encode(&Value::Map(d), &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::Unserializable(_)));
    }

    #[test]
    fn diamond_sharing_is_not_a_cycle() {
        let shared = List::from_vec(vec![Value::Int(9)]);
        let outer = list([Value::List(shared.clone()), Value::List(shared)]);
        assert_eq!(round_trip(outer.clone()), outer);
    }

    #[test]
    fn truncated_input_reports_offset() {
        let bytes = encode(&Value::from("abcdef"), &NoReferences).unwrap();
        let err = decode(&bytes[..3], &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::MalformedValue { .. }));
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let bytes = vec![TAG_TEXT, 2, 0xff, 0xfe];
        let err = decode(&bytes, &NoReferences).unwrap_err();
        match err {
            NomirError::MalformedValue { offset, reason } => {
                assert_eq!(offset, 2);
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("expected MalformedValue, got {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = encode(&Value::Nil, &NoReferences).unwrap();
        bytes.push(0);
        assert!(decode(&bytes, &NoReferences).is_err());
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = decode(&[0x7e], &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::MalformedValue { offset: 0, .. }));
    }

    #[test]
    fn hostile_length_prefix_is_rejected() {
        // Claims u64::MAX elements in a 12-byte buffer.
        let mut bytes = vec![TAG_SEQ];
        put_uvarint(&mut bytes, u64::MAX);
        bytes.push(TAG_NIL);
        assert!(decode(&bytes, &NoReferences).is_err());
    }

    #[test]
    fn nesting_past_the_limit_is_rejected_both_ways() {
        let mut value = Value::Nil;
        for _ in 0..(MAX_DEPTH + 2) {
            value = list([value]);
        }
        assert!(encode(&value, &NoReferences).is_err());

        let mut bytes = Vec::new();
        for _ in 0..(MAX_DEPTH + 2) {
            bytes.extend_from_slice(&[TAG_SEQ, 1]);
        }
        bytes.push(TAG_NIL);
        assert!(decode(&bytes, &NoReferences).is_err());
    }

    #[test]
    fn handle_falls_back_to_exactly_one_export() {
        let refs = TableRefs::default();
        let handle: Handle = Arc::new(Inert);
        let value = list([
            Value::Handle(handle.clone()),
            Value::Handle(handle.clone()),
        ]);

        let bytes = encode(&value, &refs).unwrap();
        assert_eq!(refs.exported.lock().unwrap().len(), 1);

        let decoded = decode(&bytes, &refs).unwrap();
        let items = decoded.as_list().unwrap().snapshot();
        let a = items[0].as_handle().unwrap();
        let b = items[1].as_handle().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert!(Arc::ptr_eq(a, &handle));
    }

    #[test]
    fn reference_to_unknown_id_fails_typed() {
        let refs = TableRefs::default();
        let bytes = vec![TAG_REF, RefOrigin::Sender as u8, 42];
        let err = decode(&bytes, &refs).unwrap_err();
        assert!(matches!(err, NomirError::NotFound(_)));
    }

    #[test]
    fn unknown_reference_origin_is_malformed() {
        let bytes = vec![TAG_REF, 7, 0];
        let err = decode(&bytes, &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::MalformedValue { offset: 1, .. }));
    }

    #[test]
    fn unserializable_without_reference_table() {
        let value = Value::object(Inert);
        let err = encode(&value, &NoReferences).unwrap_err();
        assert!(matches!(err, NomirError::Unserializable(_)));
    }
}
