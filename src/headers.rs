//! Stream header and SEI extraction from encoded packets.
//!
//! Hosts need the codec's parameter sets ("extra data") before the first
//! packet is muxed, and some want the SEI messages separately. Encoders
//! either expose the headers out of band (codec extradata) or repeat them in
//! band on keyframes; both cases end up in [`SideData`].

use bytes::Bytes;
use ffenc_codec::CodecId;

/// H.264 NAL unit type constants.
pub mod h264_nal {
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
}

/// HEVC NAL unit type constants.
pub mod hevc_nal {
    /// Video parameter set
    pub const VPS: u8 = 32;
    /// Sequence parameter set
    pub const SPS: u8 = 33;
    /// Picture parameter set
    pub const PPS: u8 = 34;
    /// Prefix SEI
    pub const PREFIX_SEI: u8 = 39;
    /// Suffix SEI
    pub const SUFFIX_SEI: u8 = 40;
}

/// AV1 OBU type constants.
pub mod obu_type {
    pub const SEQUENCE_HEADER: u8 = 1;
}

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Headers and SEI found in one packet, each re-framed as Annex B (or raw
/// OBUs for AV1).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketHeaders {
    /// Parameter sets (SPS/PPS, VPS/SPS/PPS) or the AV1 sequence header.
    pub parameter_sets: Option<Vec<u8>>,
    /// SEI NAL units.
    pub sei: Option<Vec<u8>>,
}

/// Split Annex B data on 3-byte (0x000001) and 4-byte (0x00000001) start
/// codes, returning the NAL unit payloads without start codes.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    // (start code position, payload start)
    let mut boundaries = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if i + 3 < data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            // 4-byte start code
            boundaries.push((i, i + 4));
            i += 4;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            // 3-byte start code
            boundaries.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(boundaries.len());
    for (idx, &(_, start)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(idx + 1)
            .map_or(data.len(), |&(next_code, _)| next_code);
        if start < end {
            nals.push(&data[start..end]);
        }
    }
    nals
}

/// Extract parameter sets and SEI from an H.264 or HEVC packet.
pub fn parse_annex_b_headers(codec: CodecId, data: &[u8]) -> PacketHeaders {
    let mut parameter_sets = Vec::new();
    let mut sei = Vec::new();

    for nal in split_annex_b(data) {
        let (is_parameter_set, is_sei) = match codec {
            CodecId::H264 => {
                let nal_type = nal[0] & 0x1F;
                (
                    matches!(nal_type, h264_nal::SPS | h264_nal::PPS),
                    nal_type == h264_nal::SEI,
                )
            }
            CodecId::Hevc => {
                let nal_type = (nal[0] >> 1) & 0x3F;
                (
                    matches!(nal_type, hevc_nal::VPS | hevc_nal::SPS | hevc_nal::PPS),
                    matches!(nal_type, hevc_nal::PREFIX_SEI | hevc_nal::SUFFIX_SEI),
                )
            }
            _ => (false, false),
        };
        let target = if is_parameter_set {
            &mut parameter_sets
        } else if is_sei {
            &mut sei
        } else {
            continue;
        };
        target.extend_from_slice(&START_CODE);
        target.extend_from_slice(nal);
    }

    PacketHeaders {
        parameter_sets: (!parameter_sets.is_empty()).then_some(parameter_sets),
        sei: (!sei.is_empty()).then_some(sei),
    }
}

/// Read a LEB128 (unsigned) value from data at the given offset.
/// Returns (value, bytes_consumed).
fn read_leb128(data: &[u8], offset: usize) -> (u64, usize) {
    let mut value: u64 = 0;
    let mut bytes_read = 0;
    for i in 0..8 {
        if offset + i >= data.len() {
            break;
        }
        let byte = data[offset + i];
        value |= ((byte & 0x7F) as u64) << (i * 7);
        bytes_read += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    (value, bytes_read)
}

/// Find the sequence header OBU (header included) in an AV1 packet.
pub fn find_av1_sequence_header(data: &[u8]) -> Option<&[u8]> {
    let mut offset = 0;
    while offset < data.len() {
        let header_byte = data[offset];
        let obu_type = (header_byte >> 3) & 0x0F;
        let has_extension = (header_byte >> 2) & 1 == 1;
        let has_size = (header_byte >> 1) & 1 == 1;

        let mut header_size = 1 + usize::from(has_extension);
        let end = if has_size {
            let (obu_size, leb_bytes) = read_leb128(data, offset + header_size);
            header_size += leb_bytes;
            (offset + header_size + obu_size as usize).min(data.len())
        } else {
            // No size field, rest of data is this OBU
            data.len()
        };

        if obu_type == obu_type::SEQUENCE_HEADER {
            return Some(&data[offset..end]);
        }
        offset = end;
    }
    None
}

/// Extract headers from a packet of any supported bitstream.
pub fn parse_packet_headers(codec: CodecId, data: &[u8]) -> PacketHeaders {
    match codec {
        CodecId::H264 | CodecId::Hevc => parse_annex_b_headers(codec, data),
        CodecId::Av1 => PacketHeaders {
            parameter_sets: find_av1_sequence_header(data).map(<[u8]>::to_vec),
            sei: None,
        },
        _ => PacketHeaders::default(),
    }
}

/// Extra data and SEI of one encode session.
///
/// Extra data is captured at most once and never changes afterwards. SEI
/// follows the latest packet that carried any; packets without SEI leave the
/// previous value in place.
#[derive(Debug, Clone)]
pub struct SideData {
    codec: CodecId,
    extra: Option<Bytes>,
    sei: Option<Bytes>,
}

impl SideData {
    pub fn new(codec: CodecId) -> Self {
        Self {
            codec,
            extra: None,
            sei: None,
        }
    }

    /// Inspect a received packet. `codec_extradata` is consulted when the
    /// packet itself carries no headers.
    pub fn observe(&mut self, packet: &[u8], codec_extradata: Option<&[u8]>) {
        let headers = parse_packet_headers(self.codec, packet);

        if self.extra.is_none() {
            let extra = headers
                .parameter_sets
                .or_else(|| codec_extradata.filter(|d| !d.is_empty()).map(<[u8]>::to_vec));
            if let Some(extra) = extra {
                tracing::debug!("captured {} bytes of extra data", extra.len());
                self.extra = Some(Bytes::from(extra));
            }
        }

        if let Some(sei) = headers.sei {
            self.sei = Some(Bytes::from(sei));
        }
    }

    pub fn extra_data(&self) -> Option<Bytes> {
        self.extra.clone()
    }

    pub fn sei_data(&self) -> Option<Bytes> {
        self.sei.clone()
    }
}
