//! Packed-timecode extraction from frame metadata.

use super::frame::TIMECODE_NONE;

/// Even-field indicator, set when the timecode came from the secondary
/// (VITC2) source.
const FLAG_EVEN_FIELD: u32 = 0x80;

/// Set when the source reports drop-frame counting.
const FLAG_DROP_FRAME: u32 = 0x40;

/// One embedded timecode as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    /// Time of day in binary-coded decimal (HHMMSSFF).
    pub bcd: u32,
    pub drop_frame: bool,
}

/// The timecode sources a frame may carry. The primary source wins; the
/// secondary (even-field) source is only consulted when the primary is
/// absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimecodeSources {
    pub primary: Option<Timecode>,
    pub secondary: Option<Timecode>,
}

/// Pack the frame's timecode into a single word.
///
/// Returns [`TIMECODE_NONE`] when neither source is present. Otherwise the
/// BCD time value, with bit 0x80 marking the even field and bit 0x40 the
/// drop-frame flag.
pub fn decode_timecode(sources: &TimecodeSources) -> u32 {
    let (tc, mut packed) = match (sources.primary, sources.secondary) {
        (Some(tc), _) => (tc, 0),
        (None, Some(tc)) => (tc, FLAG_EVEN_FIELD),
        (None, None) => return TIMECODE_NONE,
    };

    packed |= tc.bcd;
    if tc.drop_frame {
        packed |= FLAG_DROP_FRAME;
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc(bcd: u32, drop_frame: bool) -> Timecode {
        Timecode { bcd, drop_frame }
    }

    #[test]
    fn primary_source_keeps_even_field_clear() {
        let sources = TimecodeSources {
            primary: Some(tc(0x12_34_56_00, false)),
            secondary: Some(tc(0x00_00_00_01, false)),
        };
        let packed = decode_timecode(&sources);
        assert_eq!(packed & FLAG_EVEN_FIELD, 0);
        assert_eq!(packed, 0x12_34_56_00);
    }

    #[test]
    fn secondary_source_sets_even_field() {
        let sources = TimecodeSources {
            primary: None,
            secondary: Some(tc(0x10_20_30_00, false)),
        };
        let packed = decode_timecode(&sources);
        assert_eq!(packed & FLAG_EVEN_FIELD, FLAG_EVEN_FIELD);
        assert_eq!(packed, 0x10_20_30_00 | FLAG_EVEN_FIELD);
    }

    #[test]
    fn drop_frame_sets_flag_bit() {
        let sources = TimecodeSources {
            primary: Some(tc(0x01_00_00_00, true)),
            secondary: None,
        };
        assert_eq!(decode_timecode(&sources) & FLAG_DROP_FRAME, FLAG_DROP_FRAME);
    }

    #[test]
    fn no_source_yields_sentinel() {
        assert_eq!(decode_timecode(&TimecodeSources::default()), TIMECODE_NONE);
    }
}
