//! Canonical signing bytes for envelopes.
//!
//! Layout (all integers big-endian, `lp(x) = u32(len(x)) || x`):
//!
//! ```text
//! "AIRC-ENV-1" || 0x00 || lp(from) || lp(to) || u8(kind)
//!              || lp(payload) || u64(nonce) || i64(timestamp_ms)
//! ```
//!
//! Field order and widths are fixed; other implementations of the protocol
//! must produce identical bytes for identical fields.

use airc_types::UnsignedEnvelope;

/// Domain separation prefix, followed by a zero byte.
pub const DOMAIN_TAG: &[u8] = b"AIRC-ENV-1";

/// A field too long for its `u32` length prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} is {len} bytes, over the {} byte limit", u32::MAX)]
pub struct FieldTooLong {
    pub field: &'static str,
    pub len: usize,
}

fn length_prefix(field: &'static str, len: usize) -> Result<[u8; 4], FieldTooLong> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| FieldTooLong { field, len })
}

fn push_length_prefixed(
    out: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), FieldTooLong> {
    out.extend_from_slice(&length_prefix(field, bytes.len())?);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Canonical bytes covered by an envelope signature.
pub fn canonical_bytes(header: &UnsignedEnvelope) -> Result<Vec<u8>, FieldTooLong> {
    let mut out = Vec::with_capacity(
        DOMAIN_TAG.len()
            + 1
            + 4 * 3
            + header.from.len()
            + header.to.len()
            + header.payload.len()
            + 1
            + 16,
    );
    out.extend_from_slice(DOMAIN_TAG);
    out.push(0);
    push_length_prefixed(&mut out, "from", header.from.as_bytes())?;
    push_length_prefixed(&mut out, "to", header.to.as_bytes())?;
    out.push(header.kind.tag());
    push_length_prefixed(&mut out, "payload", &header.payload)?;
    out.extend_from_slice(&header.nonce.to_be_bytes());
    out.extend_from_slice(&header.timestamp.to_be_bytes());
    Ok(out)
}
