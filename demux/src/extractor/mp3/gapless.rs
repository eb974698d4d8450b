use super::id3::Id3Tag;

const GAPLESS_DESCRIPTION: &str = "iTunSMPB";

/// Encoder delay and padding, in samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaplessInfo {
    pub encoder_delay: u32,
    pub encoder_padding: u32,
}

impl GaplessInfo {
    fn new(encoder_delay: u32, encoder_padding: u32) -> Option<Self> {
        (encoder_delay > 0 || encoder_padding > 0).then_some(Self {
            encoder_delay,
            encoder_padding,
        })
    }

    /// From the 24 bits following the LAME encoder version in a Xing frame:
    /// 12 bits of delay, then 12 bits of padding.
    pub fn from_xing_header_value(value: u32) -> Option<Self> {
        Self::new((value >> 12) & 0x0FFF, value & 0x0FFF)
    }

    /// From an iTunes `iTunSMPB` comment of the form
    /// `" XXXXXXXX DDDDDDDD PPPPPPPP ..."` in hexadecimal.
    pub fn from_comment(text: &str) -> Option<Self> {
        let fields = text.strip_prefix(' ')?;
        let mut parts = fields.split(' ');
        let mut field = || -> Option<u32> {
            let part = parts.next()?;
            if part.len() != 8 {
                return None;
            }
            u32::from_str_radix(part, 16).ok()
        };
        let _ = field()?;
        let delay = field()?;
        let padding = field()?;
        // Values past i32 are considered invalid.
        if delay > i32::MAX as u32 || padding > i32::MAX as u32 {
            return None;
        }
        Self::new(delay, padding)
    }

    pub fn from_tag(tag: &Id3Tag) -> Option<Self> {
        tag.comments()
            .filter(|comment| comment.description == GAPLESS_DESCRIPTION)
            .find_map(|comment| Self::from_comment(&comment.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::mp3::id3::{decode, tests};

    #[test]
    fn xing_header_value() {
        assert_eq!(
            GaplessInfo::from_xing_header_value(0x02_400C),
            Some(GaplessInfo {
                encoder_delay: 36,
                encoder_padding: 12
            })
        );
        assert_eq!(
            GaplessInfo::from_xing_header_value(0x240_3C0),
            Some(GaplessInfo {
                encoder_delay: 576,
                encoder_padding: 960
            })
        );
        assert_eq!(GaplessInfo::from_xing_header_value(0), None);
    }

    #[test]
    fn itunes_comment() -> anyhow::Result<()> {
        assert_eq!(
            GaplessInfo::from_comment(" 00000000 00000210 000003C4 0000000000000000"),
            Some(GaplessInfo {
                encoder_delay: 528,
                encoder_padding: 964
            })
        );
        assert_eq!(GaplessInfo::from_comment("00000000 00000210 000003C4"), None);
        assert_eq!(GaplessInfo::from_comment(" 00000000 0210 000003C4"), None);
        assert_eq!(GaplessInfo::from_comment(" 00000000 00000000 00000000"), None);
        assert_eq!(GaplessInfo::from_comment(" 00000000 FFFFFFFF 00000000"), None);

        let data = tests::tag(&[
            (b"COMM", &tests::comment("other", " 00000000 00000001 00000001")),
            (b"COMM", &tests::comment("iTunSMPB", " 00000000 00000210 000003C4")),
        ]);
        let tag = decode(&data, None)?.expect("tag");
        assert_eq!(GaplessInfo::from_tag(&tag).map(|g| g.encoder_delay), Some(528));
        Ok(())
    }
}
