//! H.264 Annex B helpers.
//!
//! Encoders emit Annex B byte streams (NAL units separated by `00 00 01` or
//! `00 00 00 01` start codes). Containers want parameter sets out of band and
//! samples as 4-byte length-prefixed NAL units.

/// H.264 NAL unit type constants.
pub mod nal_unit_type {
    /// Non-IDR slice (P/B frame)
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// A single H.264 NAL unit.
#[derive(Debug, Clone)]
pub struct NalUnit {
    /// The raw NAL unit data (without length prefix, without start code).
    pub data: Vec<u8>,
    /// NAL unit type (from first byte & 0x1F).
    pub nal_type: u8,
}

impl NalUnit {
    pub fn is_idr(&self) -> bool {
        self.nal_type == nal_unit_type::IDR_SLICE
    }

    /// Returns true if this NAL unit is a video slice (IDR or non-IDR).
    pub fn is_slice(&self) -> bool {
        self.nal_type == nal_unit_type::IDR_SLICE || self.nal_type == nal_unit_type::NON_IDR_SLICE
    }

    /// Convert NAL unit to Annex B format (with 0x00000001 start code).
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(4 + self.data.len());
        result.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        result.extend_from_slice(&self.data);
        result
    }
}

/// A parsed Annex B access unit with parameter sets separated out.
#[derive(Debug, Default)]
pub struct ParsedFrame {
    /// Non-parameter-set NAL units, in stream order.
    pub nals: Vec<NalUnit>,
    /// SPS data if present (without start code).
    pub sps: Option<Vec<u8>>,
    /// PPS data if present (without start code).
    pub pps: Option<Vec<u8>>,
    /// Whether this access unit contains an IDR slice.
    pub is_keyframe: bool,
}

/// NAL unit type of a NAL unit without start code.
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1F)
}

/// Split an Annex B byte stream into NAL unit payloads.
///
/// Returns an empty list when the data contains no start code.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    // (start of the start code, start of the payload)
    let mut marks = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            marks.push((code_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(marks.len());
    for (idx, &(_, start)) in marks.iter().enumerate() {
        let end = marks.get(idx + 1).map_or(data.len(), |&(code_start, _)| code_start);
        if start < end {
            nals.push(&data[start..end]);
        }
    }
    nals
}

/// Parse raw Annex B H.264 data into structured NAL units.
pub fn parse_annex_b(data: &[u8]) -> ParsedFrame {
    let mut parsed = ParsedFrame::default();

    for nal in split_annex_b(data) {
        let nal_type = nal_type(nal);
        match nal_type {
            nal_unit_type::SPS => parsed.sps = Some(nal.to_vec()),
            nal_unit_type::PPS => parsed.pps = Some(nal.to_vec()),
            _ => {
                if nal_type == nal_unit_type::IDR_SLICE {
                    parsed.is_keyframe = true;
                }
                parsed.nals.push(NalUnit {
                    data: nal.to_vec(),
                    nal_type,
                });
            }
        }
    }

    parsed
}

/// Rewrite one Annex B access unit as 4-byte length-prefixed NAL units.
///
/// Parameter sets and access unit delimiters are dropped since they travel in
/// the sample description. Data without any start code is assumed to be
/// length-prefixed already and is returned unchanged.
pub fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    let nals = split_annex_b(data);
    if nals.is_empty() {
        return data.to_vec();
    }

    let keep = |nal: &&[u8]| {
        !matches!(
            nal_type(nal),
            nal_unit_type::SPS | nal_unit_type::PPS | nal_unit_type::AUD
        )
    };
    let total: usize = nals.iter().copied().filter(keep).map(|n| 4 + n.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for nal in nals.iter().copied().filter(keep) {
        buf.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        buf.extend_from_slice(nal);
    }
    buf
}
