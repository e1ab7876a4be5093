//! Canonical call-data encoding.
//!
//! Gated calls and operation ids use the Solidity ABI layout: every static
//! value occupies one 32-byte big-endian word, dynamic `bytes` are written
//! as an offset in the head and a length-prefixed, zero-padded tail.

use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::constants::{GRANT_ROLE_SIG, REVOKE_ROLE_SIG, UPDATE_DELAY_SIG, UPGRADE_TO_AND_CALL_SIG};
use crate::operation::Operation;
use crate::types::{Address, RoleId, H256};

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("call data too short: {0} bytes")]
    TooShort(usize),
    #[error("unknown function selector 0x{0}")]
    UnknownSelector(String),
    #[error("malformed argument: {0}")]
    Malformed(&'static str),
}

/// keccak256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First four bytes of keccak256 of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

// ── Words ────────────────────────────────────────────────────────────────────

fn word_address(a: &Address) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

fn word_u128(v: u128) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

fn push_bytes_tail(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&word_u128(data.len() as u128));
    out.extend_from_slice(data);
    let rem = data.len() % WORD;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(WORD - rem));
    }
}

fn read_word(data: &[u8], at: usize) -> Result<&[u8], AbiError> {
    let end = at.checked_add(WORD).ok_or(AbiError::Malformed("word offset overflows"))?;
    data.get(at..end).ok_or(AbiError::TooShort(data.len()))
}

fn read_address(data: &[u8], at: usize) -> Result<Address, AbiError> {
    let w = read_word(data, at)?;
    if w[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::Malformed("address has dirty high bytes"));
    }
    let mut a = [0u8; 20];
    a.copy_from_slice(&w[12..]);
    Ok(Address(a))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, AbiError> {
    let w = read_word(data, at)?;
    if w[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Malformed("integer does not fit in 64 bits"));
    }
    let mut b = [0u8; 8];
    b.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(b))
}

fn read_h256(data: &[u8], at: usize) -> Result<H256, AbiError> {
    let w = read_word(data, at)?;
    let mut b = [0u8; 32];
    b.copy_from_slice(w);
    Ok(H256(b))
}

fn read_bytes(data: &[u8], offset: usize) -> Result<Vec<u8>, AbiError> {
    let len = usize::try_from(read_u64(data, offset)?)
        .map_err(|_| AbiError::Malformed("bytes length overflows"))?;
    let start = offset.checked_add(WORD).ok_or(AbiError::Malformed("bytes offset overflows"))?;
    let end = start.checked_add(len).ok_or(AbiError::Malformed("bytes length overflows"))?;
    data.get(start..end)
        .map(|s| s.to_vec())
        .ok_or(AbiError::Malformed("bytes length exceeds call data"))
}

// ── Gated calls ──────────────────────────────────────────────────────────────

/// A decoded gated call the authority knows how to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatedCall {
    /// Switch a proxy's implementation, then call it with `data` (empty = no call).
    UpgradeToAndCall { implementation: Address, data: Vec<u8> },
    /// Change the authority's minimum delay.
    UpdateDelay { delay: u64 },
    GrantRole { role: RoleId, account: Address },
    RevokeRole { role: RoleId, account: Address },
}

pub fn encode_upgrade_to_and_call(implementation: &Address, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 3 * WORD + data.len());
    out.extend_from_slice(&selector(UPGRADE_TO_AND_CALL_SIG));
    out.extend_from_slice(&word_address(implementation));
    out.extend_from_slice(&word_u128(2 * WORD as u128));
    push_bytes_tail(&mut out, data);
    out
}

pub fn encode_update_delay(delay: u64) -> Vec<u8> {
    let mut out = selector(UPDATE_DELAY_SIG).to_vec();
    out.extend_from_slice(&word_u128(delay as u128));
    out
}

pub fn encode_grant_role(role: &RoleId, account: &Address) -> Vec<u8> {
    let mut out = selector(GRANT_ROLE_SIG).to_vec();
    out.extend_from_slice(role.as_bytes());
    out.extend_from_slice(&word_address(account));
    out
}

pub fn encode_revoke_role(role: &RoleId, account: &Address) -> Vec<u8> {
    let mut out = selector(REVOKE_ROLE_SIG).to_vec();
    out.extend_from_slice(role.as_bytes());
    out.extend_from_slice(&word_address(account));
    out
}

/// Decode call data into a known gated call.
pub fn decode_call(payload: &[u8]) -> Result<GatedCall, AbiError> {
    if payload.len() < 4 {
        return Err(AbiError::TooShort(payload.len()));
    }
    let (sel, args) = payload.split_at(4);

    if sel == selector(UPGRADE_TO_AND_CALL_SIG) {
        let implementation = read_address(args, 0)?;
        let offset = usize::try_from(read_u64(args, WORD)?)
            .map_err(|_| AbiError::Malformed("bytes offset overflows"))?;
        let data = read_bytes(args, offset)?;
        Ok(GatedCall::UpgradeToAndCall { implementation, data })
    } else if sel == selector(UPDATE_DELAY_SIG) {
        Ok(GatedCall::UpdateDelay { delay: read_u64(args, 0)? })
    } else if sel == selector(GRANT_ROLE_SIG) {
        Ok(GatedCall::GrantRole { role: read_h256(args, 0)?, account: read_address(args, WORD)? })
    } else if sel == selector(REVOKE_ROLE_SIG) {
        Ok(GatedCall::RevokeRole { role: read_h256(args, 0)?, account: read_address(args, WORD)? })
    } else {
        Err(AbiError::UnknownSelector(hex::encode(sel)))
    }
}

// ── Operation encoding ───────────────────────────────────────────────────────

/// `abi.encode(target, value, payload, predecessor, salt)`: the byte string
/// an operation id is the digest of.
pub fn encode_operation(op: &Operation) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 * WORD + op.payload.len());
    out.extend_from_slice(&word_address(&op.target));
    out.extend_from_slice(&word_u128(op.value));
    out.extend_from_slice(&word_u128(5 * WORD as u128));
    out.extend_from_slice(op.predecessor.as_bytes());
    out.extend_from_slice(op.salt.as_bytes());
    push_bytes_tail(&mut out, &op.payload);
    out
}
