//! Delta bodies: two size varints, then a stream of copy/insert opcodes.
//!
//! Copy instruction layout:
//!
//! ```text
//! +----------+---------+---------+---------+---------+-------+-------+-------+
//! | 1xxxxxxx | offset1 | offset2 | offset3 | offset4 | size1 | size2 | size3 |
//! +----------+---------+---------+---------+---------+-------+-------+-------+
//! ```
//!
//! The low seven bits of the opcode are a presence bitmap; absent bytes are
//! zero. Insert instructions (MSB clear) carry their byte count in the opcode
//! itself. Opcode zero is reserved.

use crate::error::{Error, Result};

/// Decodes the little-endian base-128 size varint used for the base and
/// result sizes at the head of a delta. Returns (value, bytes consumed).
pub fn size_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut used = 0;
    loop {
        let Some(&c) = data.get(used) else {
            return Err(Error::corrupt("truncated delta size varint"));
        };
        used += 1;
        value |= ((c & 0x7f) as u64) << shift;
        shift += 7;
        if c & 0x80 == 0 {
            return Ok((value, used));
        }
    }
}

/// Applies one delta to its base, producing the reconstructed object.
///
/// The declared base size must match `base` exactly; the result is checked
/// against the declared result size.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    if delta.len() < 4 {
        return Err(Error::corrupt(format!("delta too small: {} bytes", delta.len())));
    }

    let (expected_base, mut ip) = size_varint(delta)?;
    if expected_base != base.len() as u64 {
        return Err(Error::corrupt(format!(
            "base is {} bytes but delta header says {}",
            base.len(),
            expected_base
        )));
    }
    let (result_size, used) = size_varint(&delta[ip..])?;
    ip += used;

    let mut result = Vec::with_capacity(result_size as usize);

    while ip < delta.len() {
        let cmd = delta[ip];
        ip += 1;
        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;
            for field in 0..7u8 {
                if cmd & (1 << field) == 0 {
                    continue;
                }
                let Some(&byte) = delta.get(ip) else {
                    return Err(Error::corrupt("truncated delta copy instruction"));
                };
                ip += 1;
                if field < 4 {
                    offset |= (byte as usize) << (field * 8);
                } else {
                    size |= (byte as usize) << ((field - 4) * 8);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&e| e <= base.len())
                .ok_or_else(|| {
                    Error::corrupt(format!(
                        "delta copy {offset}+{size} outside base of {} bytes",
                        base.len()
                    ))
                })?;
            result.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let size = cmd as usize;
            let end = ip + size;
            if end > delta.len() {
                return Err(Error::corrupt("truncated delta insert instruction"));
            }
            result.extend_from_slice(&delta[ip..end]);
            ip = end;
        } else {
            return Err(Error::corrupt("reserved delta opcode 0"));
        }
    }

    if result.len() as u64 != result_size {
        return Err(Error::corrupt(format!(
            "delta produced {} bytes, header says {}",
            result.len(),
            result_size
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vectors lifted from real pack data: each delta rewrites one commit
    // into a sibling commit.
    const BASE_1: &[u8] = b"tree 16e3f83e622db3b3a6de764f7d3dcd2888d1146c\nparent aa9384566161a242ad0ca2563e613736edf38fe9\nauthor Felipe Contreras <felipe.contreras@gmail.com> 1367010755 -0500\ncommitter Junio C Hamano <gitster@pobox.com> 1367014827 -0700\n\nremote-hg: use hashlib instead of hg sha1 util\n\nTo be in sync with remote-bzr.\n\nSigned-off-by: Felipe Contreras <felipe.contreras@gmail.com>\nSigned-off-by: Junio C Hamano <gitster@pobox.com>\n";

    const DELTA_1: &[u8] = b"\xa2\x03\x91\x03]tree 0bb83c46690d6b136b1e02c90b91eb7488b6a505\nparent d6bb9136c93baddf0ee5052638591bd881b19f77\x91]?\x014\x91\x9dM5bzr: add support to push URLs\n\nJust like in remote-hg\x930\x01r";

    const EXPECTED_1: &[u8] = b"tree 0bb83c46690d6b136b1e02c90b91eb7488b6a505\nparent d6bb9136c93baddf0ee5052638591bd881b19f77\nauthor Felipe Contreras <felipe.contreras@gmail.com> 1367010754 -0500\ncommitter Junio C Hamano <gitster@pobox.com> 1367014827 -0700\n\nremote-bzr: add support to push URLs\n\nJust like in remote-hg.\n\nSigned-off-by: Felipe Contreras <felipe.contreras@gmail.com>\nSigned-off-by: Junio C Hamano <gitster@pobox.com>\n";

    const BASE_2: &[u8] = b"tree 6e48d1e480899bd1ad8f5512979c27fe4392d7ae\nparent 11ee57bc4c44763b7ea92c5f583e27a5fbbff76b\nauthor Brandon Casey <casey@nrlssc.navy.mil> 1216761811 -0500\ncommitter Junio C Hamano <gitster@pobox.com> 1217657702 -0700\n\nt/t4202-log.sh: add newline at end of file\n\nSome shells hang when parsing the script if the last statement is not\nfollowed by a newline. So add one.\n\nSigned-off-by: Brandon Casey <casey@nrlssc.navy.mil>\nSigned-off-by: Junio C Hamano <gitster@pobox.com>\n";

    const DELTA_2: &[u8] = b"\xd8\x03\xd8\x03]tree e29606187ff772f3cd2cac848d1c139591865898\nparent 09b78bc1fc4e525bc68fa0ce76521457717fe675\x91]o\x076838201\xb1\xd3\x05\x01";

    const EXPECTED_2: &[u8] = b"tree e29606187ff772f3cd2cac848d1c139591865898\nparent 09b78bc1fc4e525bc68fa0ce76521457717fe675\nauthor Brandon Casey <casey@nrlssc.navy.mil> 1216761811 -0500\ncommitter Junio C Hamano <gitster@pobox.com> 1216838201 -0700\n\nt/t4202-log.sh: add newline at end of file\n\nSome shells hang when parsing the script if the last statement is not\nfollowed by a newline. So add one.\n\nSigned-off-by: Brandon Casey <casey@nrlssc.navy.mil>\nSigned-off-by: Junio C Hamano <gitster@pobox.com>\n";

    #[test]
    fn patches_commit_rewrites() {
        assert_eq!(apply(BASE_1, DELTA_1).unwrap(), EXPECTED_1);
        assert_eq!(apply(BASE_2, DELTA_2).unwrap(), EXPECTED_2);
    }

    #[test]
    fn varint_decoding() {
        assert_eq!(size_varint(&[0x00]).unwrap(), (0, 1));
        assert_eq!(size_varint(&[0x7f]).unwrap(), (127, 1));
        assert_eq!(size_varint(&[0xa2, 0x03]).unwrap(), (0x1a2, 2));
        assert_eq!(size_varint(&[0x80, 0x80, 0x01]).unwrap(), (1 << 14, 3));
        assert!(size_varint(&[0x80]).is_err());
        assert!(size_varint(&[]).is_err());
    }

    #[test]
    fn base_size_mismatch_is_fatal() {
        // header claims a 4-byte base; give it 3
        let delta = [0x04, 0x01, 0x01, b'x'];
        match apply(b"abc", &delta) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn opcode_zero_is_reserved() {
        let delta = [0x03, 0x02, 0x01, b'z', 0x00];
        match apply(b"abc", &delta) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn copy_size_zero_means_64k() {
        let base: Vec<u8> = (0..0x10000u32).map(|i| (i % 255) as u8).collect();
        // base size 0x10000 (varint 80 80 04), result the same, then one copy
        // opcode with no offset/size bytes present at all
        let delta = [0x80, 0x80, 0x04, 0x80, 0x80, 0x04, 0x80];
        let result = apply(&base, &delta).unwrap();
        assert_eq!(result, base);
    }

    #[test]
    fn copy_out_of_range_is_corrupt() {
        // base size 3, result size 5, copy offset 2 size 5 overruns the base
        let delta = [0x03, 0x05, 0x91, 0x02, 0x05];
        match apply(b"abc", &delta) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn result_length_checked() {
        // result size says 2 but the single insert provides 1 byte
        let delta = [0x03, 0x02, 0x01, b'z'];
        match apply(b"abc", &delta) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
