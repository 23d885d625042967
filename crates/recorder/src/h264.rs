//! Splits a raw H.264 Annex-B byte stream into access units.
//!
//! ffmpeg's `-f h264` output arrives as an unframed byte stream. The parser
//! cuts it on start codes, groups NAL units into one access unit per picture,
//! and keeps SPS/PPS out of the picture data: they are emitted as a separate
//! codec-config unit whenever they change, just before the next picture.

use common::PacketFlags;
use common::log::{debug, trace};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_SLICE: u8 = 1;
const NAL_IDR_SLICE: u8 = 5;
const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// One picture (or one codec configuration block) in Annex-B form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub flags: PacketFlags,
}

#[derive(Default)]
pub struct H264Parser {
    pending: Vec<u8>,
    unit: Vec<u8>,
    unit_has_slice: bool,
    unit_is_key: bool,
    sps: Vec<u8>,
    pps: Vec<u8>,
    config_changed: bool,
}

impl H264Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more bytes and returns every access unit completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        self.pending.extend_from_slice(data);
        let pending = std::mem::take(&mut self.pending);
        let mut out = Vec::new();

        let Some((first, len)) = find_start_code(&pending, 0) else {
            self.pending = pending;
            return out;
        };
        let mut current = first;
        let mut nal_start = first + len;
        while let Some((next, len)) = find_start_code(&pending, nal_start) {
            self.process_nal(&pending[nal_start..next], &mut out);
            current = next;
            nal_start = next + len;
        }

        self.pending = pending[current..].to_vec();
        out
    }

    /// Emits whatever is still buffered, treating the end of input as the end
    /// of the last NAL unit.
    pub fn flush(&mut self) -> Vec<AccessUnit> {
        let pending = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        if let Some((first, len)) = find_start_code(&pending, 0) {
            self.process_nal(&pending[first + len..], &mut out);
        }
        self.finish_unit(&mut out);
        out
    }

    /// SPS and PPS in Annex-B form, empty until both have been seen.
    pub fn codec_config(&self) -> Vec<u8> {
        if self.sps.is_empty() || self.pps.is_empty() {
            return Vec::new();
        }
        let mut config = Vec::with_capacity(self.sps.len() + self.pps.len() + 8);
        config.extend_from_slice(&START_CODE);
        config.extend_from_slice(&self.sps);
        config.extend_from_slice(&START_CODE);
        config.extend_from_slice(&self.pps);
        config
    }

    fn process_nal(&mut self, nal: &[u8], out: &mut Vec<AccessUnit>) {
        let nal = trim_trailing_zeros(nal);
        let Some(&header) = nal.first() else {
            return;
        };

        match header & 0x1f {
            NAL_SPS | NAL_PPS => {
                self.finish_unit(out);
                let slot = if header & 0x1f == NAL_SPS {
                    &mut self.sps
                } else {
                    &mut self.pps
                };
                if slot.as_slice() != nal {
                    *slot = nal.to_vec();
                    self.config_changed = true;
                }
            }
            NAL_AUD | NAL_SEI => {
                if self.unit_has_slice {
                    self.finish_unit(out);
                }
                self.append(nal);
            }
            kind @ (NAL_SLICE | NAL_IDR_SLICE) => {
                // first_mb_in_slice is ue(v); a leading 1 bit means it is 0.
                let first_slice = nal.get(1).is_some_and(|b| b & 0x80 != 0);
                if first_slice && self.unit_has_slice {
                    self.finish_unit(out);
                }
                if self.config_changed && !self.sps.is_empty() && !self.pps.is_empty() {
                    let config = self.codec_config();
                    debug!("[h264] codec config ({} bytes)", config.len());
                    out.push(AccessUnit {
                        data: config,
                        flags: PacketFlags::CODEC_CONFIG,
                    });
                    self.config_changed = false;
                }
                self.append(nal);
                self.unit_has_slice = true;
                self.unit_is_key |= kind == NAL_IDR_SLICE;
            }
            _ => self.append(nal),
        }
    }

    fn append(&mut self, nal: &[u8]) {
        self.unit.extend_from_slice(&START_CODE);
        self.unit.extend_from_slice(nal);
    }

    fn finish_unit(&mut self, out: &mut Vec<AccessUnit>) {
        if !self.unit_has_slice {
            self.unit.clear();
            return;
        }
        let flags = if self.unit_is_key {
            PacketFlags::KEY_FRAME
        } else {
            PacketFlags::NONE
        };
        trace!("[h264] access unit {} bytes {:?}", self.unit.len(), flags);
        out.push(AccessUnit {
            data: std::mem::take(&mut self.unit),
            flags,
        });
        self.unit_has_slice = false;
        self.unit_is_key = false;
    }
}

/// Position and length of the next 3- or 4-byte start code at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > from && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &nal[..end]
}
