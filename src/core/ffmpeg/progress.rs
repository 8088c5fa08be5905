//! Progress Parsing Module
//!
//! Parses the key=value blocks ffmpeg writes to stdout when invoked with
//! `-progress pipe:1`. Fields accumulate line by line; a `progress=` line
//! terminates a block and produces one [`ProgressSample`].

use crate::core::TimeSec;

/// One parsed progress update
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    /// Progress percentage (0.0 - 100.0), clamped. 0 when duration unknown.
    pub percent: f64,
    /// Current output timestamp in seconds
    pub timemark: TimeSec,
    /// Current processing speed (frames per second)
    pub fps: f64,
    /// Current output bitrate in kbits/s (if reported)
    pub bitrate_kbps: Option<f64>,
    /// Bytes written so far (if reported)
    pub output_bytes: Option<u64>,
}

/// Stateful parser for one encoder run.
///
/// Feed it each stdout line via [`ProgressParser::push_line`]; it returns a
/// sample whenever a block completes. Malformed values fall back to the
/// previous value rather than failing the run.
#[derive(Debug)]
pub struct ProgressParser {
    duration_sec: Option<TimeSec>,
    timemark: TimeSec,
    fps: f64,
    bitrate_kbps: Option<f64>,
    output_bytes: Option<u64>,
}

impl ProgressParser {
    /// Create a parser. `duration_sec` comes from the media probe; when the
    /// probe failed or reported zero, percent stays at 0 and consumers fall
    /// back to the raw timemark.
    pub fn new(duration_sec: Option<TimeSec>) -> Self {
        Self {
            duration_sec: duration_sec.filter(|d| *d > 0.0),
            timemark: 0.0,
            fps: 0.0,
            bitrate_kbps: None,
            output_bytes: None,
        }
    }

    /// Consume one line of `-progress pipe:1` output. Returns a sample when
    /// the line terminates a progress block.
    pub fn push_line(&mut self, line: &str) -> Option<ProgressSample> {
        let line = line.trim();

        if let Some(value) = line.strip_prefix("out_time_ms=") {
            // Despite the name, ffmpeg reports this field in microseconds.
            if let Ok(us) = value.trim().parse::<i64>() {
                self.timemark = (us.max(0) as f64) / 1_000_000.0;
            }
        } else if let Some(value) = line.strip_prefix("fps=") {
            if let Ok(fps) = value.trim().parse::<f64>() {
                self.fps = fps;
            }
        } else if let Some(value) = line.strip_prefix("bitrate=") {
            // Reported as e.g. "1432.1kbits/s", or "N/A" early in the run.
            self.bitrate_kbps = value
                .trim()
                .trim_end_matches("kbits/s")
                .parse::<f64>()
                .ok();
        } else if let Some(value) = line.strip_prefix("total_size=") {
            self.output_bytes = value.trim().parse::<u64>().ok();
        } else if line.starts_with("progress=") {
            return Some(self.sample());
        }

        None
    }

    fn sample(&self) -> ProgressSample {
        let percent = match self.duration_sec {
            Some(duration) => (self.timemark / duration * 100.0).clamp(0.0, 100.0),
            None => 0.0,
        };

        ProgressSample {
            percent,
            timemark: self.timemark,
            fps: self.fps,
            bitrate_kbps: self.bitrate_kbps,
            output_bytes: self.output_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ProgressParser, lines: &[&str]) -> Vec<ProgressSample> {
        lines
            .iter()
            .filter_map(|line| parser.push_line(line))
            .collect()
    }

    #[test]
    fn test_block_emits_single_sample() {
        let mut parser = ProgressParser::new(Some(10.0));
        let samples = feed(
            &mut parser,
            &[
                "frame=120",
                "fps=60.02",
                "bitrate=1432.1kbits/s",
                "total_size=524288",
                "out_time_ms=5000000",
                "progress=continue",
            ],
        );

        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert!((sample.percent - 50.0).abs() < f64::EPSILON);
        assert!((sample.timemark - 5.0).abs() < f64::EPSILON);
        assert!((sample.fps - 60.02).abs() < f64::EPSILON);
        assert_eq!(sample.bitrate_kbps, Some(1432.1));
        assert_eq!(sample.output_bytes, Some(524_288));
    }

    #[test]
    fn test_percent_clamped_at_100() {
        let mut parser = ProgressParser::new(Some(4.0));
        let samples = feed(&mut parser, &["out_time_ms=9000000", "progress=end"]);
        assert_eq!(samples[0].percent, 100.0);
    }

    #[test]
    fn test_unknown_duration_reports_zero_percent() {
        let mut parser = ProgressParser::new(None);
        let samples = feed(&mut parser, &["out_time_ms=3000000", "progress=continue"]);
        assert_eq!(samples[0].percent, 0.0);
        assert!((samples[0].timemark - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_duration_treated_as_unknown() {
        let parser = ProgressParser::new(Some(0.0));
        assert!(parser.duration_sec.is_none());
    }

    #[test]
    fn test_malformed_values_keep_previous() {
        let mut parser = ProgressParser::new(Some(10.0));
        let samples = feed(
            &mut parser,
            &[
                "out_time_ms=2000000",
                "progress=continue",
                "out_time_ms=garbage",
                "fps=N/A",
                "bitrate=N/A",
                "progress=continue",
            ],
        );

        assert_eq!(samples.len(), 2);
        // Bad values leave the last good timemark in place.
        assert_eq!(samples[1].timemark, samples[0].timemark);
        assert_eq!(samples[1].bitrate_kbps, None);
    }

    #[test]
    fn test_non_progress_lines_ignored() {
        let mut parser = ProgressParser::new(Some(10.0));
        assert!(parser.push_line("stream_0_0_q=28.0").is_none());
        assert!(parser.push_line("").is_none());
    }
}
