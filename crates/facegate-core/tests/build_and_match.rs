use facegate_core::{
    DetectedFace, Encoder, EncoderError, Encoding, FaceRegion, GalleryBuilder, GalleryStore,
    MatchDecision, MatchPolicy, Matcher, SkipReason, ToleranceMatcher,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

/// Stand-in for the external encoder: the image colour is the scenario.
/// Red is the number of faces, green/blue place the face in a 2-D space.
struct ColourEncoder;

impl Encoder for ColourEncoder {
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        let Rgb([count, x, y]) = *image.get_pixel(0, 0);
        Ok((0..count)
            .map(|_| DetectedFace {
                region: FaceRegion { top: 0, right: image.width(), bottom: image.height(), left: 0 },
                encoding: Encoding::new(vec![x as f32 / 10.0, y as f32 / 10.0]),
            })
            .collect())
    }
}

fn write_png(dir: &Path, name: &str, pixel: [u8; 3]) {
    RgbImage::from_pixel(3, 3, Rgb(pixel))
        .save_with_format(dir.join(name), ImageFormat::Png)
        .unwrap();
}

#[test]
fn batch_build_skips_bad_images_and_matches_after_reload() {
    let images = tempfile::tempdir().unwrap();
    write_png(images.path(), "alice.png", [1, 0, 0]);
    write_png(images.path(), "bob.png", [1, 30, 0]);
    write_png(images.path(), "pair.png", [2, 10, 10]);
    // Duplicate of an already accepted identity.
    write_png(images.path(), "bob.PNG", [1, 90, 90]);

    let mut builder = GalleryBuilder::new(ColourEncoder);
    builder.enroll_dir(images.path()).unwrap();
    let report = builder.finish();

    assert_eq!(report.gallery.identities().collect::<Vec<_>>(), vec!["alice", "bob"]);
    assert_eq!(report.skipped.len(), 2);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.identity == "pair" && s.reason == SkipReason::AmbiguousImage { faces: 2 }));
    assert!(report
        .skipped
        .iter()
        .any(|s| s.identity == "bob" && s.reason == SkipReason::DuplicateIdentity));

    let out = tempfile::tempdir().unwrap();
    let store = GalleryStore::new(out.path().join("encodings.json"));
    store.save(&report.gallery).unwrap();
    let gallery = store.load().unwrap();
    assert_eq!(gallery, report.gallery);

    let matcher = ToleranceMatcher::new(MatchPolicy::new(0.5, Some(0.55)).unwrap());

    // Upper-case bob.PNG sorted first, so bob sits at (9.0, 9.0).
    let near_alice = Encoding::new(vec![0.3, 0.0]);
    let decision = matcher.decide(&near_alice, &gallery).unwrap();
    assert_eq!(decision.identity(), Some("alice"));

    let near_bob = Encoding::new(vec![9.0, 8.8]);
    let decision = matcher.decide(&near_bob, &gallery).unwrap();
    assert_eq!(decision.identity(), Some("bob"));

    let stranger = Encoding::new(vec![5.0, 5.0]);
    assert_eq!(matcher.decide(&stranger, &gallery).unwrap(), MatchDecision::NoMatch);
}

#[test]
fn empty_images_directory_yields_empty_gallery() {
    let images = tempfile::tempdir().unwrap();
    let mut builder = GalleryBuilder::new(ColourEncoder);
    assert_eq!(builder.enroll_dir(images.path()).unwrap(), 0);
    let report = builder.finish();
    assert!(report.gallery.is_empty());

    let decision = ToleranceMatcher::default()
        .decide(&Encoding::new(vec![0.0, 0.0]), &report.gallery)
        .unwrap();
    assert_eq!(decision, MatchDecision::NoMatch);
}
