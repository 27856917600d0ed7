const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Encoding parameters for a video preview.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPlan {
    /// Maximum preview length in seconds; `None` keeps the whole video.
    pub trim_secs: Option<u32>,
    pub crf: u8,
    pub width: u32,
    pub audio_bitrate: &'static str,
}

/// Pick trim and quality for a source of the given duration and size.
///
/// | duration       | size      | trim  |
/// |----------------|-----------|-------|
/// | > 10 min       | > 1 GiB   | 5 min |
/// | > 20 min       | > 500 MiB | 10 min|
/// | > 30 min       | any       | 15 min|
/// | unknown        | > 500 MiB | 10 min|
pub fn plan_video(duration_secs: Option<f64>, size: u64) -> VideoPlan {
    let trim_secs = match duration_secs {
        Some(d) if d > 600.0 && size > GIB => Some(300),
        Some(d) if d > 1200.0 && size > 500 * MIB => Some(600),
        Some(d) if d > 1800.0 => Some(900),
        Some(_) => None,
        None if size > 500 * MIB => Some(600),
        None => None,
    };
    VideoPlan {
        trim_secs,
        crf: 23,
        width: 1280,
        audio_bitrate: "128k",
    }
}

impl VideoPlan {
    /// The single, more aggressive pass used when the first preview came out
    /// above the size ceiling.
    pub fn fallback(&self) -> VideoPlan {
        VideoPlan {
            trim_secs: Some(self.trim_secs.map_or(300, |t| t / 2)),
            crf: 28,
            width: 854,
            audio_bitrate: "96k",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MIN: f64 = 60.0;

    #[test]
    fn decision_table() {
        assert_eq!(plan_video(Some(15.0 * MIN), 2 * GIB).trim_secs, Some(300));
        assert_eq!(plan_video(Some(25.0 * MIN), 600 * MIB).trim_secs, Some(600));
        assert_eq!(plan_video(Some(35.0 * MIN), 10 * MIB).trim_secs, Some(900));
        assert_eq!(plan_video(Some(15.0 * MIN), 600 * MIB).trim_secs, None);
        assert_eq!(plan_video(None, 600 * MIB).trim_secs, Some(600));
        assert_eq!(plan_video(None, 100 * MIB).trim_secs, None);
    }

    #[test]
    fn first_matching_tier_wins() {
        // long and huge: the 5 minute tier applies before the 15 minute one
        assert_eq!(plan_video(Some(40.0 * MIN), 2 * GIB).trim_secs, Some(300));
    }

    #[test]
    fn fallback_halves_trim_and_lowers_quality() {
        let plan = plan_video(Some(25.0 * MIN), 600 * MIB);
        let fb = plan.fallback();
        assert_eq!(fb.trim_secs, Some(300));
        assert_eq!(fb.crf, 28);
        assert_eq!(fb.width, 854);

        let untrimmed = plan_video(Some(5.0 * MIN), 50 * MIB);
        assert_eq!(untrimmed.fallback().trim_secs, Some(300));
    }
}
