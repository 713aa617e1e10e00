//! Media format description, enumeration, and negotiation primitives
//! used by `Port`/`Link`.
//!
//! Grounded on `spa/plugins/alsa/alsa-sink.c`'s format handling: formats
//! are described as a small set of sample encodings plus inclusive
//! rate/channel ranges (`spa_pod_builder` there builds a CHOICE_RANGE of
//! min/max/default for rate and channels); negotiation intersects two
//! such descriptions down to a single concrete `MediaFormat`.

use crate::error::{Error, Result};

/// Sample encoding a port can produce or accept. Mirrors the small,
/// fixed set ALSA exposes (S16/S32 interleaved) generalized to the
/// encodings a software node might use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S16LE,
    S32LE,
    F32LE,
}

/// An inclusive range, used for rate/channel negotiation the way
/// `alsa-sink.c` builds `SPA_POD_CHOICE_RANGE` entries (min, max,
/// default all present; default must fall within [min, max]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl Range {
    pub fn fixed(value: u32) -> Self {
        Self {
            min: value,
            max: value,
            default: value,
        }
    }

    pub fn new(min: u32, max: u32, default: u32) -> Result<Self> {
        if min > max || default < min || default > max {
            return Err(Error::InvalidArguments(format!(
                "invalid range: min={min} max={max} default={default}"
            )));
        }
        Ok(Self { min, max, default })
    }

    fn intersect(&self, other: &Range) -> Option<Range> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min > max {
            return None;
        }
        let default = self.default.clamp(min, max);
        Some(Range { min, max, default })
    }
}

/// A format candidate as enumerated by a port, or the concrete format a
/// port/link negotiates down to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub encodings: Vec<SampleFormat>,
    pub rate: Range,
    pub channels: Range,
}

/// Fully negotiated format, one concrete value per field: the result
/// carried in a Link's state once negotiation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFormat {
    pub encoding: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

impl FormatSpec {
    /// Restartable index-based enumeration over this spec's concrete
    /// combinations; no generator/iterator state is kept across calls.
    pub fn enumerate(&self, index: usize) -> Option<MediaFormat> {
        self.encodings.get(index).map(|&encoding| MediaFormat {
            encoding,
            rate: self.rate.default,
            channels: self.channels.default,
        })
    }

    /// Intersect two format specs the way `spa_format_filter` narrows an
    /// output format against an input's accepted set: encodings must
    /// overlap, rate/channel ranges must overlap, and the result is the
    /// specs' clamped default.
    pub fn intersect(&self, other: &FormatSpec) -> Result<FormatSpec> {
        let encodings: Vec<SampleFormat> = self
            .encodings
            .iter()
            .copied()
            .filter(|enc| other.encodings.contains(enc))
            .collect();
        if encodings.is_empty() {
            return Err(Error::NoCommonFormat("no overlapping sample encoding".into()));
        }
        let rate = self
            .rate
            .intersect(&other.rate)
            .ok_or_else(|| Error::NoCommonFormat("no overlapping sample rate".into()))?;
        let channels = self
            .channels
            .intersect(&other.channels)
            .ok_or_else(|| Error::NoCommonFormat("no overlapping channel count".into()))?;
        Ok(FormatSpec {
            encodings,
            rate,
            channels,
        })
    }

    /// Collapse an intersected spec (still possibly a range) down to one
    /// concrete `MediaFormat`, choosing each field's default — the final
    /// step of Link negotiation.
    pub fn resolve(&self) -> MediaFormat {
        MediaFormat {
            encoding: self.encodings[0],
            rate: self.rate.default,
            channels: self.channels.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(encodings: &[SampleFormat], rate: Range, channels: Range) -> FormatSpec {
        FormatSpec {
            encodings: encodings.to_vec(),
            rate,
            channels,
        }
    }

    #[test]
    fn intersect_finds_common_encoding_and_clamps_rate() {
        let out = spec(
            &[SampleFormat::S16LE, SampleFormat::F32LE],
            Range::new(44100, 48000, 48000).unwrap(),
            Range::fixed(2),
        );
        let inp = spec(
            &[SampleFormat::S16LE],
            Range::new(8000, 44100, 44100).unwrap(),
            Range::fixed(2),
        );
        let negotiated = out.intersect(&inp).unwrap();
        let resolved = negotiated.resolve();
        assert_eq!(resolved.encoding, SampleFormat::S16LE);
        assert_eq!(resolved.rate, 44100);
        assert_eq!(resolved.channels, 2);
    }

    #[test]
    fn intersect_rejects_disjoint_encodings() {
        let out = spec(&[SampleFormat::S32LE], Range::fixed(48000), Range::fixed(2));
        let inp = spec(&[SampleFormat::S16LE], Range::fixed(48000), Range::fixed(2));
        assert!(matches!(out.intersect(&inp), Err(Error::NoCommonFormat(_))));
    }

    #[test]
    fn intersect_rejects_disjoint_rate_ranges() {
        let out = spec(
            &[SampleFormat::S16LE],
            Range::new(44100, 48000, 44100).unwrap(),
            Range::fixed(2),
        );
        let inp = spec(
            &[SampleFormat::S16LE],
            Range::new(8000, 16000, 8000).unwrap(),
            Range::fixed(2),
        );
        assert!(matches!(out.intersect(&inp), Err(Error::NoCommonFormat(_))));
    }

    #[test]
    fn enumerate_is_restartable_by_index() {
        let s = spec(
            &[SampleFormat::S16LE, SampleFormat::S32LE],
            Range::fixed(48000),
            Range::fixed(2),
        );
        assert_eq!(s.enumerate(0).unwrap().encoding, SampleFormat::S16LE);
        assert_eq!(s.enumerate(1).unwrap().encoding, SampleFormat::S32LE);
        assert!(s.enumerate(2).is_none());
    }
}
