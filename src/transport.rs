use crate::errors::{Error, Result};
use crate::key::Key;
use crate::proofs::{Proof, ProofCmd, ProofCmdOp, ProofStrand, ProofStrandType};
use crate::sync::SyncRequest;

/// Proof wire encodings. `HashedKeys` ships only key hashes; `FullKeys`
/// ships original keys and lets the verifier recompute the hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingType {
    HashedKeys = 0,
    FullKeys = 1,
}

/// Big-endian LEB128-style varint: most significant 7-bit group first,
/// continuation bit on every byte but the last.
pub fn encode_varint(n: u64) -> Vec<u8> {
    if n == 0 {
        return vec![0];
    }

    let mut out = vec![];
    let mut n = n;
    while n != 0 {
        out.push((n & 0x7F) as u8);
        n >>= 7;
    }
    out.reverse();

    let len = out.len();
    for byte in &mut out[..len - 1] {
        *byte |= 0x80;
    }

    out
}

/// Cursor over an encoded buffer. Every read is bounds-checked; running
/// off the end is a `ProofInvalid`.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn get_byte(&mut self) -> Result<u8> {
        if self.buf.is_empty() {
            return Err(Error::ProofInvalid("encoding ends prematurely".into()));
        }
        let byte = self.buf[0];
        self.buf = &self.buf[1..];
        Ok(byte)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::ProofInvalid("encoding ends prematurely".into()));
        }
        let bytes = &self.buf[..n];
        self.buf = &self.buf[n..];
        Ok(bytes)
    }

    /// Trailing-zero-compressed key hash: one count byte, then the
    /// non-zero prefix.
    pub fn get_key_hash(&mut self) -> Result<Key> {
        let num_trailing_zeros = self.get_byte()? as usize;
        if num_trailing_zeros > 32 {
            return Err(Error::ProofInvalid("bad key hash compression".into()));
        }
        let prefix = self.get_bytes(32 - num_trailing_zeros)?;
        let mut key = Key::null();
        key.0[..prefix.len()].copy_from_slice(prefix);
        Ok(key)
    }

    pub fn get_varint(&mut self) -> Result<u64> {
        let mut res: u64 = 0;
        loop {
            let byte = self.get_byte()?;
            res = (res << 7) | (byte & 0x7F) as u64;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(res)
    }
}

/// Decode a single varint occupying the front of `encoded`.
pub fn decode_varint_bytes(encoded: &[u8]) -> Result<u64> {
    Decoder::new(encoded).get_varint()
}

fn encode_key_hash(out: &mut Vec<u8>, key_hash: &Key) {
    let mut num_trailing_zeros = 0;
    for i in (0..32).rev() {
        if key_hash.0[i] != 0 {
            break;
        }
        num_trailing_zeros += 1;
    }

    out.push(num_trailing_zeros as u8);
    out.extend_from_slice(&key_hash.0[..32 - num_trailing_zeros]);
}

pub fn encode_proof(proof: &Proof, encoding_type: EncodingType) -> Result<Vec<u8>> {
    let mut out = vec![];

    out.push(encoding_type as u8);

    // Strands, terminated by the Invalid sentinel.

    for strand in &proof.strands {
        out.push(strand.strand_type as u8);
        out.push(
            u8::try_from(strand.depth)
                .map_err(|_| Error::ProofInvalid("strand depth exceeds 255".into()))?,
        );

        match strand.strand_type {
            ProofStrandType::Leaf => {
                match encoding_type {
                    EncodingType::HashedKeys => encode_key_hash(&mut out, &strand.key_hash),
                    EncodingType::FullKeys => {
                        if strand.key.is_empty() {
                            return Err(Error::ProofInvalid(
                                "FullKeys encoding requested but key not available".into(),
                            ));
                        }
                        out.extend_from_slice(&encode_varint(strand.key.len() as u64));
                        out.extend_from_slice(&strand.key);
                    }
                }
                out.extend_from_slice(&encode_varint(strand.val.len() as u64));
                out.extend_from_slice(&strand.val);
            }
            ProofStrandType::WitnessLeaf | ProofStrandType::Witness => {
                encode_key_hash(&mut out, &strand.key_hash);
                if strand.val.len() != 32 {
                    return Err(Error::ProofInvalid("witness strand hash not 32 bytes".into()));
                }
                out.extend_from_slice(&strand.val);
            }
            ProofStrandType::WitnessEmpty => {
                encode_key_hash(&mut out, &strand.key_hash);
            }
            ProofStrandType::Invalid => {
                return Err(Error::ProofInvalid("invalid strand type".into()));
            }
        }
    }

    out.push(ProofStrandType::Invalid as u8);

    // Commands: a bytecode over a cursor that starts at the last strand.
    // Byte 0 is Merge; 0xxxxxxx flushes a queue of up to six hash
    // commands (LSB-first flags above a sentinel 1 bit); 1xxxxxxx moves
    // the cursor.

    if proof.strands.is_empty() {
        return Ok(out);
    }

    let mut curr_pos = (proof.strands.len() - 1) as i64;
    let mut hash_queue: Vec<&ProofCmd> = vec![];

    fn flush_hash_queue(out: &mut Vec<u8>, hash_queue: &mut Vec<&ProofCmd>) -> Result<()> {
        if hash_queue.is_empty() {
            return Ok(());
        }

        let mut bits: u8 = 0;
        for (i, cmd) in hash_queue.iter().enumerate() {
            if cmd.op == ProofCmdOp::HashProvided {
                bits |= 1 << i;
            }
        }
        bits = (bits << 1) | 1;
        bits <<= 6 - hash_queue.len();

        out.push(bits);

        for cmd in hash_queue.iter() {
            if cmd.op == ProofCmdOp::HashProvided {
                let hash = cmd
                    .hash
                    .ok_or_else(|| Error::ProofInvalid("missing provided hash".into()))?;
                out.extend_from_slice(hash.as_bytes());
            }
        }

        hash_queue.clear();
        Ok(())
    }

    for cmd in &proof.cmds {
        while cmd.node_offset as i64 != curr_pos {
            flush_hash_queue(&mut out, &mut hash_queue)?;

            let delta = cmd.node_offset as i64 - curr_pos;

            if (1..64).contains(&delta) {
                let distance = delta.min(32);
                out.push(0b1000_0000 | (distance - 1) as u8);
                curr_pos += distance;
            } else if (-63..=-1).contains(&delta) {
                let distance = delta.abs().min(32);
                out.push(0b1010_0000 | (distance - 1) as u8);
                curr_pos -= distance;
            } else {
                let log_distance = 64 - delta.unsigned_abs().leading_zeros() as i64;
                if delta > 0 {
                    out.push(0b1100_0000 | (log_distance - 7) as u8);
                    curr_pos += 1 << (log_distance - 1);
                } else {
                    out.push(0b1110_0000 | (log_distance - 7) as u8);
                    curr_pos -= 1 << (log_distance - 1);
                }
            }
        }

        if cmd.op == ProofCmdOp::Merge {
            flush_hash_queue(&mut out, &mut hash_queue)?;
            out.push(0);
        } else {
            hash_queue.push(cmd);
            if hash_queue.len() == 6 {
                flush_hash_queue(&mut out, &mut hash_queue)?;
            }
        }
    }

    flush_hash_queue(&mut out, &mut hash_queue)?;

    Ok(out)
}

pub fn decode_proof(encoded: &[u8]) -> Result<Proof> {
    let mut dec = Decoder::new(encoded);
    let mut proof = Proof::default();

    let encoding_type = match dec.get_byte()? {
        0 => EncodingType::HashedKeys,
        1 => EncodingType::FullKeys,
        other => {
            return Err(Error::ProofInvalid(format!(
                "unexpected proof encoding type: {}",
                other
            )))
        }
    };

    // Strands

    loop {
        let strand_type = match dec.get_byte()? {
            0 => ProofStrandType::Leaf,
            1 => break,
            2 => ProofStrandType::WitnessLeaf,
            3 => ProofStrandType::WitnessEmpty,
            4 => ProofStrandType::Witness,
            other => {
                return Err(Error::ProofInvalid(format!(
                    "unrecognized strand type: {}",
                    other
                )))
            }
        };

        let depth = dec.get_byte()? as u64;
        let mut key = vec![];
        let key_hash;
        let val;

        match strand_type {
            ProofStrandType::Leaf => {
                match encoding_type {
                    EncodingType::HashedKeys => {
                        key_hash = dec.get_key_hash()?;
                    }
                    EncodingType::FullKeys => {
                        let key_len = dec.get_varint()? as usize;
                        key = dec.get_bytes(key_len)?.to_vec();
                        key_hash = Key::hash(&key);
                    }
                }
                let val_len = dec.get_varint()? as usize;
                val = dec.get_bytes(val_len)?.to_vec();
            }
            ProofStrandType::WitnessLeaf | ProofStrandType::Witness => {
                key_hash = dec.get_key_hash()?;
                val = dec.get_bytes(32)?.to_vec();
            }
            ProofStrandType::WitnessEmpty => {
                key_hash = dec.get_key_hash()?;
                val = vec![];
            }
            ProofStrandType::Invalid => unreachable!(),
        }

        proof.strands.push(ProofStrand {
            strand_type,
            depth,
            key_hash,
            val,
            key,
        });
    }

    // Commands

    if proof.strands.is_empty() {
        return Ok(proof);
    }

    let mut curr_pos = (proof.strands.len() - 1) as i64;

    while !dec.is_empty() {
        let byte = dec.get_byte()?;

        if byte == 0 {
            proof.cmds.push(ProofCmd {
                op: ProofCmdOp::Merge,
                node_offset: curr_pos as u64,
                hash: None,
            });
        } else if byte & 0b1000_0000 == 0 {
            let mut byte = byte;
            let mut started = false;

            for _ in 0..7 {
                if started {
                    if byte & 1 != 0 {
                        let hash = Key::from_bytes(dec.get_bytes(32)?)
                            .map_err(|_| Error::ProofInvalid("bad provided hash".into()))?;
                        proof.cmds.push(ProofCmd {
                            op: ProofCmdOp::HashProvided,
                            node_offset: curr_pos as u64,
                            hash: Some(hash),
                        });
                    } else {
                        proof.cmds.push(ProofCmd {
                            op: ProofCmdOp::HashEmpty,
                            node_offset: curr_pos as u64,
                            hash: None,
                        });
                    }
                } else if byte & 1 != 0 {
                    started = true;
                }
                byte >>= 1;
            }
        } else {
            let action = byte >> 5;
            let distance = (byte & 0b1_1111) as i64;

            match action {
                0b100 => curr_pos += distance + 1,
                0b101 => curr_pos -= distance + 1,
                0b110 => curr_pos += 1 << (distance + 6),
                _ => curr_pos -= 1 << (distance + 6),
            }

            if curr_pos < 0 || curr_pos >= proof.strands.len() as i64 {
                return Err(Error::ProofInvalid("jumped outside of proof strands".into()));
            }
        }
    }

    Ok(proof)
}

pub fn encode_sync_requests(reqs: &[SyncRequest]) -> Result<Vec<u8>> {
    let mut out = vec![];

    for req in reqs {
        encode_key_hash(&mut out, &req.path);
        out.push(
            u8::try_from(req.start_depth)
                .map_err(|_| Error::ProofInvalid("start depth exceeds 255".into()))?,
        );
        out.push(
            u8::try_from(req.depth_limit)
                .map_err(|_| Error::ProofInvalid("depth limit exceeds 255".into()))?,
        );
        // Upper 7 bits reserved.
        out.push(req.expand_leaves as u8);
    }

    Ok(out)
}

pub fn decode_sync_requests(encoded: &[u8]) -> Result<Vec<SyncRequest>> {
    let mut dec = Decoder::new(encoded);
    let mut reqs = vec![];

    while !dec.is_empty() {
        let path = dec.get_key_hash()?;
        let start_depth = dec.get_byte()? as u64;
        let depth_limit = dec.get_byte()? as u64;
        let expand_leaves = dec.get_byte()? & 1 != 0;

        reqs.push(SyncRequest {
            path,
            start_depth,
            depth_limit,
            expand_leaves,
        });
    }

    Ok(reqs)
}

pub fn encode_sync_responses(resps: &[Proof], encoding_type: EncodingType) -> Result<Vec<u8>> {
    let mut out = vec![];

    for resp in resps {
        let proof = encode_proof(resp, encoding_type)?;
        out.extend_from_slice(&encode_varint(proof.len() as u64));
        out.extend_from_slice(&proof);
    }

    Ok(out)
}

pub fn decode_sync_responses(encoded: &[u8]) -> Result<Vec<Proof>> {
    let mut dec = Decoder::new(encoded);
    let mut resps = vec![];

    while !dec.is_empty() {
        let proof_len = dec.get_varint()? as usize;
        resps.push(decode_proof(dec.get_bytes(proof_len)?)?);
    }

    Ok(resps)
}
