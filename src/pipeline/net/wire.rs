use arrayref::{array_ref, array_refs};
use byteorder::{ByteOrder, NativeEndian};

use crate::pipeline::model::InputRecord;

/// Single byte closing a stream in either direction. Frames are told apart
/// by length alone, so this can never be mistaken for a data frame.
pub const SENTINEL: u8 = 0xFF;
pub const END_OF_STREAM: [u8; 1] = [SENTINEL];

/// A fixed-width frame. All fields are in native byte order.
pub trait Frame: Sized {
    const LEN: usize;

    fn encode(&self) -> Vec<u8>;

    /// Decodes a frame of exactly `LEN` bytes.
    fn decode(buf: &[u8]) -> Option<Self>;
}

/// A record sent to the worker pool.
///
/// `id (i32) | load (f32) | uptime (i32)`, 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordFrame {
    pub id: i32,
    pub load: f32,
    pub uptime: i32,
}

impl From<&InputRecord> for RecordFrame {
    fn from(record: &InputRecord) -> Self {
        Self {
            id: record.id,
            load: record.load,
            uptime: record.uptime,
        }
    }
}

impl Frame for RecordFrame {
    const LEN: usize = 12;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::LEN];
        NativeEndian::write_i32(&mut buf[0..4], self.id);
        NativeEndian::write_f32(&mut buf[4..8], self.load);
        NativeEndian::write_i32(&mut buf[8..12], self.uptime);
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::LEN {
            return None;
        }
        let (id, load, uptime) = array_refs![array_ref![buf, 0, 12], 4, 4, 4];
        Some(Self {
            id: NativeEndian::read_i32(id),
            load: NativeEndian::read_f32(load),
            uptime: NativeEndian::read_i32(uptime),
        })
    }
}

/// A stability result coming back from the worker pool.
///
/// `id (i32) | stability (f32)`, 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultFrame {
    pub id: i32,
    pub stability: f32,
}

impl Frame for ResultFrame {
    const LEN: usize = 8;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::LEN];
        NativeEndian::write_i32(&mut buf[0..4], self.id);
        NativeEndian::write_f32(&mut buf[4..8], self.stability);
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::LEN {
            return None;
        }
        let (id, stability) = array_refs![array_ref![buf, 0, 8], 4, 4];
        Some(Self {
            id: NativeEndian::read_i32(id),
            stability: NativeEndian::read_f32(stability),
        })
    }
}

/// What a received message turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<F> {
    Data(F),
    EndOfStream,
    /// Neither a data frame nor the sentinel; carries the offending length.
    Malformed(usize),
}

pub fn classify<F: Frame>(buf: &[u8]) -> Inbound<F> {
    if buf == END_OF_STREAM.as_slice() {
        return Inbound::EndOfStream;
    }
    match F::decode(buf) {
        Some(frame) => Inbound::Data(frame),
        None => Inbound::Malformed(buf.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_frame_layout() {
        let frame = RecordFrame {
            id: 42,
            load: 1.25,
            uptime: 86_400,
        };
        let buf = frame.encode();

        assert_eq!(buf.len(), 12);
        assert_eq!(buf[0..4], 42i32.to_ne_bytes());
        assert_eq!(buf[4..8], 1.25f32.to_ne_bytes());
        assert_eq!(buf[8..12], 86_400i32.to_ne_bytes());
    }

    #[test]
    fn record_round_trips_from_input() {
        let record = InputRecord {
            id: -7,
            location: "Alytus".into(),
            uptime: 123_456,
            load: 0.1,
        };
        let decoded = RecordFrame::decode(&RecordFrame::from(&record).encode()).unwrap();

        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.uptime, record.uptime);
        assert_eq!(decoded.load.to_bits(), record.load.to_bits());
    }

    #[test]
    fn result_frame_layout() {
        let buf = ResultFrame {
            id: 3,
            stability: 64.5,
        }
        .encode();

        assert_eq!(buf.len(), 8);
        assert_eq!(buf[0..4], 3i32.to_ne_bytes());
        assert_eq!(buf[4..8], 64.5f32.to_ne_bytes());
    }

    #[test]
    fn sentinel_is_never_data() {
        assert_eq!(classify::<ResultFrame>(&END_OF_STREAM), Inbound::EndOfStream);
        assert_eq!(classify::<RecordFrame>(&[SENTINEL]), Inbound::EndOfStream);
    }

    #[test]
    fn data_frames_full_of_sentinel_bytes_are_data() {
        let result = classify::<ResultFrame>(&[SENTINEL; 8]);
        let record = classify::<RecordFrame>(&[SENTINEL; 12]);

        assert!(matches!(result, Inbound::Data(ResultFrame { id: -1, .. })));
        assert!(matches!(record, Inbound::Data(RecordFrame { id: -1, .. })));
    }

    #[test]
    fn other_lengths_are_malformed() {
        assert_eq!(classify::<ResultFrame>(&[0x00]), Inbound::Malformed(1));
        assert_eq!(classify::<ResultFrame>(&[]), Inbound::Malformed(0));
        assert_eq!(classify::<ResultFrame>(&[SENTINEL, SENTINEL]), Inbound::Malformed(2));
        assert_eq!(classify::<ResultFrame>(&[0u8; 12]), Inbound::Malformed(12));
        assert_eq!(classify::<RecordFrame>(&[0u8; 8]), Inbound::Malformed(8));
    }
}
