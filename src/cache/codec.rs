//! Delta-varint encoding of partition records.
//!
//! A record is four passes over the same pair list: the pair count, every
//! id as a ZigZag delta from the previous id, every ref-list length, then
//! every reference as a ZigZag delta from the previous reference. The
//! reference delta chain runs continuously across the whole buffer; it is
//! never reset at id boundaries. Splitting the buffer into parallel passes
//! keeps each pass's deltas small (ids within a partition are at most 63
//! apart, references arrive in near-ascending way order), so most fields
//! are a single byte.
//!
//! Decode reproduces whatever pair order encode was given; callers must
//! not rely on a key's position within a record.

use crate::cache::bunch::{IdRef, RefList};
use crate::error::{CacheError, Result};
use crate::primitives::bytes::var;

/// Serializes `pairs` into one partition record.
pub fn encode_bunch(pairs: &[IdRef]) -> Vec<u8> {
    let ref_count: usize = pairs.iter().map(|pair| pair.refs.len()).sum();
    let mut buf = Vec::with_capacity(10 + pairs.len() * 3 + ref_count * 5);

    var::encode_u64(pairs.len() as u64, &mut buf);

    let mut last_id = 0i64;
    for pair in pairs {
        var::encode_i64(pair.id.wrapping_sub(last_id), &mut buf);
        last_id = pair.id;
    }

    for pair in pairs {
        var::encode_u64(pair.refs.len() as u64, &mut buf);
    }

    let mut last_ref = 0i64;
    for pair in pairs {
        for &way in &pair.refs {
            var::encode_i64(way.wrapping_sub(last_ref), &mut buf);
            last_ref = way;
        }
    }
    buf
}

/// Deserializes a partition record, reconstructing absolute ids and
/// references by cumulative sums over the delta passes.
pub fn decode_bunch(buf: &[u8]) -> Result<Vec<IdRef>> {
    let mut off = 0;
    let count = var::decode_u64(buf, &mut off)?;
    let count = usize::try_from(count)
        .map_err(|_| CacheError::Decode("pair count exceeds usize".into()))?;
    // Each pair needs at least one id byte and one length byte; reject a
    // fabricated count before sizing any allocation from it.
    if count
        .checked_mul(2)
        .map_or(true, |need| need > buf.len() - off)
    {
        return Err(CacheError::Decode(format!(
            "pair count {count} exceeds remaining buffer"
        )));
    }

    let mut pairs = Vec::with_capacity(count);
    let mut last_id = 0i64;
    for _ in 0..count {
        last_id = last_id.wrapping_add(var::decode_i64(buf, &mut off)?);
        pairs.push(IdRef {
            id: last_id,
            refs: RefList::new(),
        });
    }

    let mut lens = Vec::with_capacity(count);
    for _ in 0..count {
        let len = var::decode_u64(buf, &mut off)?;
        let len = usize::try_from(len)
            .map_err(|_| CacheError::Decode("ref count exceeds usize".into()))?;
        if len > buf.len() - off {
            return Err(CacheError::Decode(format!(
                "ref count {len} exceeds remaining buffer"
            )));
        }
        lens.push(len);
    }

    let mut last_ref = 0i64;
    for (pair, &len) in pairs.iter_mut().zip(&lens) {
        pair.refs.reserve(len);
        for _ in 0..len {
            last_ref = last_ref.wrapping_add(var::decode_i64(buf, &mut off)?);
            pair.refs.push(last_ref);
        }
    }

    if off != buf.len() {
        return Err(CacheError::Decode(format!(
            "{} trailing bytes after record",
            buf.len() - off
        )));
    }
    Ok(pairs)
}
