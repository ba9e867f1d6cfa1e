use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::{Packet, State};
use crate::reqid::{ReqId, REQ_ID_LEN};
use crate::Error;

/// Encode a packet as a network-endian byte buffer: a 1-byte state tag, a
/// fixed 10-byte req_id, followed by the conditional fields for that state
/// (spec §4.1). Floats are IEEE 754 binary64.
pub fn encode(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    buf.put_u8(packet.state() as u8);
    buf.put_slice(packet.req_id().as_bytes());

    match packet {
        Packet::Hreq {
            attempt_no,
            cos_id,
            ..
        } => {
            buf.put_u32(*attempt_no);
            buf.put_u32(*cos_id);
        }
        Packet::Hres {
            attempt_no,
            cpu_offer,
            ram_offer,
            disk_offer,
            ..
        } => {
            buf.put_u32(*attempt_no);
            buf.put_u32(*cpu_offer);
            buf.put_f64(*ram_offer);
            buf.put_f64(*disk_offer);
        }
        Packet::Dreq {
            attempt_no, data, ..
        }
        | Packet::Dres {
            attempt_no, data, ..
        } => {
            buf.put_u32(*attempt_no);
            buf.put_slice(data);
        }
        Packet::Rreq { .. }
        | Packet::Rres { .. }
        | Packet::Rcan { .. }
        | Packet::Dack { .. }
        | Packet::Dcan { .. }
        | Packet::Dwait { .. } => {}
    }

    buf.freeze()
}

/// Decode a packet from a network-endian byte buffer. Returns an error for
/// any buffer too short for its state's fixed fields, or with an unknown
/// state tag; callers treat both as a malformed packet to drop silently
/// (spec §7).
pub fn decode(mut bytes: &[u8]) -> Result<Packet, Error> {
    require(bytes.len(), 1 + REQ_ID_LEN)?;

    let state = State::try_from(bytes.get_u8())?;

    let mut req_id_bytes = [0u8; REQ_ID_LEN];
    bytes.copy_to_slice(&mut req_id_bytes);
    let req_id = ReqId::from_bytes(req_id_bytes);

    let packet = match state {
        State::Hreq => {
            require(bytes.len(), 8)?;
            Packet::Hreq {
                req_id,
                attempt_no: bytes.get_u32(),
                cos_id: bytes.get_u32(),
            }
        }
        State::Hres => {
            require(bytes.len(), 20)?;
            Packet::Hres {
                req_id,
                attempt_no: bytes.get_u32(),
                cpu_offer: bytes.get_u32(),
                ram_offer: bytes.get_f64(),
                disk_offer: bytes.get_f64(),
            }
        }
        State::Rreq => Packet::Rreq { req_id },
        State::Rres => Packet::Rres { req_id },
        State::Rcan => Packet::Rcan { req_id },
        State::Dreq | State::Dres => {
            require(bytes.len(), 4)?;
            let attempt_no = bytes.get_u32();
            let data = bytes.to_vec();
            if matches!(state, State::Dreq) {
                Packet::Dreq {
                    req_id,
                    attempt_no,
                    data,
                }
            } else {
                Packet::Dres {
                    req_id,
                    attempt_no,
                    data,
                }
            }
        }
        State::Dack => Packet::Dack { req_id },
        State::Dcan => Packet::Dcan { req_id },
        State::Dwait => Packet::Dwait { req_id },
        State::Fail => return Err(Error::UnknownState(0)),
    };

    Ok(packet)
}

fn require(got: usize, need: usize) -> Result<(), Error> {
    if got < need {
        Err(Error::Truncated { need, got })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let encoded = encode(&packet);
        let decoded = decode(&encoded).expect("decode of a just-encoded packet must succeed");
        assert_eq!(packet, decoded);
    }

    #[test]
    fn roundtrips_every_variant() {
        let req_id = ReqId::generate();
        roundtrip(Packet::Hreq {
            req_id,
            attempt_no: 1,
            cos_id: 7,
        });
        roundtrip(Packet::Hres {
            req_id,
            attempt_no: 1,
            cpu_offer: 4,
            ram_offer: 4096.0,
            disk_offer: 40.0,
        });
        roundtrip(Packet::Rreq { req_id });
        roundtrip(Packet::Rres { req_id });
        roundtrip(Packet::Rcan { req_id });
        roundtrip(Packet::Dreq {
            req_id,
            attempt_no: 1,
            data: b"data + program".to_vec(),
        });
        roundtrip(Packet::Dres {
            req_id,
            attempt_no: 1,
            data: b"result".to_vec(),
        });
        roundtrip(Packet::Dack { req_id });
        roundtrip(Packet::Dcan { req_id });
        roundtrip(Packet::Dwait { req_id });
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let err = decode(&[State::Hreq as u8, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn decode_rejects_unknown_state() {
        let mut bytes = vec![200u8];
        bytes.extend_from_slice(ReqId::generate().as_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::UnknownState(200)));
    }

    #[test]
    fn answers_table_matches_spec() {
        let req_id = ReqId::generate();
        let hreq = Packet::Hreq {
            req_id,
            attempt_no: 1,
            cos_id: 1,
        }
        .state();
        let hres = Packet::Hres {
            req_id,
            attempt_no: 1,
            cpu_offer: 1,
            ram_offer: 1.0,
            disk_offer: 1.0,
        };
        assert!(hres.answers(hreq));
        assert!(!hres.answers(State::Dreq));
    }
}
