//! Live recognition loop: capture → downscale → encode → match → status.

use anyhow::{Context, Result};
use facegate_core::{Encoder, FaceRegion, Gallery, MatchDecision, Matcher};
use facegate_hw::FrameSource;
use std::sync::atomic::{AtomicBool, Ordering};

/// Knobs for [`run_loop`].
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub frame_scale: f32,
    pub max_frames: Option<u64>,
    /// End the loop on the first accepted match.
    pub stop_on_match: bool,
}

/// Per-frame recognition result, face regions in full-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStatus {
    pub sequence: u32,
    pub faces: Vec<(FaceRegion, MatchDecision)>,
}

impl FrameStatus {
    /// First accepted face in scan order, if any.
    pub fn first_match(&self) -> Option<&MatchDecision> {
        self.faces.iter().map(|(_, d)| d).find(|d| d.is_match())
    }

    /// Overlay text: the matched identity or "Unknown".
    pub fn overlay(&self) -> String {
        match self.first_match() {
            Some(MatchDecision::Match { identity, distance }) => {
                format!("{identity} ({distance:.2})")
            }
            _ => "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// Quit was requested.
    Stopped { frames: u64 },
    /// `max_frames` reached.
    Exhausted { frames: u64 },
    /// A match ended the loop (`stop_on_match`).
    Matched {
        identity: String,
        distance: f32,
        frames: u64,
    },
}

/// Run the capture loop until quit, frame budget, or (optionally) a match.
///
/// Capture errors end the loop with an error. Encoder errors only drop the
/// current frame. A dimension mismatch between encoder and gallery is fatal.
pub fn run_loop<S, E, M>(
    source: &mut S,
    encoder: &mut E,
    matcher: &M,
    gallery: &Gallery,
    options: &LoopOptions,
    stop: &AtomicBool,
    mut on_status: impl FnMut(&FrameStatus),
) -> Result<LoopOutcome>
where
    S: FrameSource,
    E: Encoder,
    M: Matcher,
{
    let mut frames = 0u64;
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(LoopOutcome::Stopped { frames });
        }
        if options.max_frames.is_some_and(|max| frames >= max) {
            return Ok(LoopOutcome::Exhausted { frames });
        }

        let frame = source.next_frame().context("camera capture failed")?;
        frames += 1;

        if frame.is_dark() {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let small = frame.downscaled(options.frame_scale);
        let detected = match encoder.faces(&small) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "encoder failed; dropping frame");
                continue;
            }
        };

        let upscale = 1.0 / options.frame_scale.min(1.0);
        let mut faces = Vec::with_capacity(detected.len());
        for face in detected {
            let decision = matcher
                .decide(&face.encoding, gallery)
                .context("encoder output does not fit the gallery")?;
            faces.push((face.region.rescale(upscale), decision));
        }

        let status = FrameStatus {
            sequence: frame.sequence,
            faces,
        };
        on_status(&status);

        if options.stop_on_match {
            if let Some(MatchDecision::Match { identity, distance }) = status.first_match() {
                return Ok(LoopOutcome::Matched {
                    identity: identity.clone(),
                    distance: *distance,
                    frames,
                });
            }
        }
    }
}

/// Open `url` in the desktop's default browser.
pub fn open_url(url: &str) -> Result<()> {
    let status = std::process::Command::new("xdg-open")
        .arg(url)
        .status()
        .context("failed to run xdg-open")?;
    if !status.success() {
        anyhow::bail!("xdg-open exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{DetectedFace, EncoderError, Encoding, MatchPolicy, ToleranceMatcher};
    use facegate_hw::{CameraError, Frame};
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;

    /// Frames whose colour encodes the scene: red = faces, green = position.
    struct ScriptedCamera {
        frames: VecDeque<Frame>,
    }

    impl ScriptedCamera {
        fn new(pixels: &[[u8; 3]]) -> Self {
            let frames = pixels
                .iter()
                .enumerate()
                .map(|(i, &p)| Frame {
                    image: RgbImage::from_pixel(64, 48, Rgb(p)),
                    timestamp: std::time::Instant::now(),
                    sequence: i as u32,
                })
                .collect();
            Self { frames }
        }
    }

    impl FrameSource for ScriptedCamera {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("end of script".into()))
        }
    }

    /// Red channel = face count (1 → one face, 2 → encoder error),
    /// green channel = first encoding component.
    struct ScriptedEncoder {
        dim: usize,
        calls: usize,
    }

    impl Encoder for ScriptedEncoder {
        fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
            self.calls += 1;
            let Rgb([r, g, _]) = *image.get_pixel(0, 0);
            match r {
                200 => Err(EncoderError::Io(std::io::Error::other("flaky"))),
                100 => {
                    let mut values = vec![0.0; self.dim];
                    values[0] = g as f32 / 100.0;
                    Ok(vec![DetectedFace {
                        region: FaceRegion { top: 2, right: 6, bottom: 8, left: 1 },
                        encoding: Encoding::new(values),
                    }])
                }
                _ => Ok(Vec::new()),
            }
        }
    }

    fn gallery() -> Gallery {
        let mut g = Gallery::new();
        g.push("alice", Encoding::new(vec![0.0, 0.0])).unwrap();
        g.push("bob", Encoding::new(vec![2.0, 0.0])).unwrap();
        g
    }

    fn options(max_frames: Option<u64>, stop_on_match: bool) -> LoopOptions {
        LoopOptions {
            frame_scale: 0.25,
            max_frames,
            stop_on_match,
        }
    }

    fn matcher() -> ToleranceMatcher {
        ToleranceMatcher::new(MatchPolicy::new(0.5, None).unwrap())
    }

    const EMPTY_SCENE: [u8; 3] = [50, 50, 50];
    const DARK: [u8; 3] = [0, 0, 0];
    const ALICE: [u8; 3] = [100, 10, 90];
    const STRANGER: [u8; 3] = [100, 120, 90];
    const FLAKY: [u8; 3] = [200, 0, 90];

    #[test]
    fn test_loop_reports_unknown_then_match() {
        let mut camera = ScriptedCamera::new(&[EMPTY_SCENE, STRANGER, ALICE]);
        let mut encoder = ScriptedEncoder { dim: 2, calls: 0 };
        let stop = AtomicBool::new(false);
        let mut overlays = Vec::new();

        let outcome = run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(Some(3), false),
            &stop,
            |s| overlays.push(s.overlay()),
        )
        .unwrap();

        assert_eq!(outcome, LoopOutcome::Exhausted { frames: 3 });
        assert_eq!(overlays, vec!["Unknown", "Unknown", "alice (0.10)"]);
    }

    #[test]
    fn test_loop_stops_on_match() {
        let mut camera = ScriptedCamera::new(&[STRANGER, ALICE, ALICE]);
        let mut encoder = ScriptedEncoder { dim: 2, calls: 0 };
        let stop = AtomicBool::new(false);

        let outcome = run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(None, true),
            &stop,
            |_| {},
        )
        .unwrap();

        match outcome {
            LoopOutcome::Matched { identity, frames, .. } => {
                assert_eq!(identity, "alice");
                assert_eq!(frames, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_loop_skips_dark_and_failed_frames() {
        let mut camera = ScriptedCamera::new(&[DARK, FLAKY, ALICE]);
        let mut encoder = ScriptedEncoder { dim: 2, calls: 0 };
        let stop = AtomicBool::new(false);
        let mut statuses = Vec::new();

        run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(Some(3), false),
            &stop,
            |s| statuses.push(s.clone()),
        )
        .unwrap();

        // Dark frame never reaches the encoder; flaky frame yields no status.
        assert_eq!(encoder.calls, 2);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].sequence, 2);
        // Region found on the quarter-size frame maps back to full size.
        assert_eq!(
            statuses[0].faces[0].0,
            FaceRegion { top: 8, right: 24, bottom: 32, left: 4 }
        );
    }

    #[test]
    fn test_loop_honours_stop_flag() {
        let mut camera = ScriptedCamera::new(&[ALICE]);
        let mut encoder = ScriptedEncoder { dim: 2, calls: 0 };
        let stop = AtomicBool::new(true);

        let outcome = run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(None, true),
            &stop,
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome, LoopOutcome::Stopped { frames: 0 });
        assert_eq!(encoder.calls, 0);
    }

    #[test]
    fn test_loop_capture_failure_is_error() {
        let mut camera = ScriptedCamera::new(&[]);
        let mut encoder = ScriptedEncoder { dim: 2, calls: 0 };
        let stop = AtomicBool::new(false);
        let result = run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(None, false),
            &stop,
            |_| {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_loop_dimension_mismatch_is_fatal() {
        let mut camera = ScriptedCamera::new(&[ALICE]);
        let mut encoder = ScriptedEncoder { dim: 3, calls: 0 };
        let stop = AtomicBool::new(false);
        let result = run_loop(
            &mut camera,
            &mut encoder,
            &matcher(),
            &gallery(),
            &options(Some(1), false),
            &stop,
            |_| {},
        );
        assert!(result.is_err());
    }
}
