use anyhow::Result;
use image::{GrayImage, Luma};
use linerec::seg::{max_label, recolor, runs_from_cseg};
use linerec::{decode, Decoded, Fst, LineRecognizer, Segmentation};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Draw black boxes on a white line and color them in a character
/// segmentation, one color per entry of `chars` (boxes with the same
/// color form one character).
fn draw_line(w: u32, h: u32, chars: &[(u32, (u32, u32, u32, u32))]) -> (GrayImage, Segmentation) {
    let mut image = GrayImage::from_pixel(w, h, Luma([255]));
    let mut cseg = Segmentation::new(w, h);
    for &(color, (x0, y0, x1, y1)) in chars {
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, Luma([0]));
                cseg.put_pixel(x, y, Luma([color]));
            }
        }
    }
    (image, cseg)
}

fn hi_line() -> (GrayImage, Segmentation) {
    draw_line(60, 30, &[(1, (5, 5, 17, 25)), (2, (30, 10, 36, 25))])
}

/// A language model accepting any string over `alphabet`.
fn free_lm(alphabet: &str) -> Fst {
    let mut lm = Fst::new();
    let s = lm.add_state();
    lm.set_start(s);
    lm.set_final(s, 0.0);
    for c in alphabet.chars() {
        lm.add_transition(s, s, c as i32, c as i32, 0.0);
    }
    lm
}

fn trained_hi() -> Result<LineRecognizer> {
    let (image, cseg) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    recognizer.start_training()?;
    recognizer.add_training_line(&cseg, &image, "Hi")?;
    recognizer.finish_training()?;
    Ok(recognizer)
}

#[test]
fn test_train_and_recognize_hi() -> Result<()> {
    init();
    let (image, cseg) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    recognizer.start_training()?;
    let stats = recognizer.add_training_line(&cseg, &image, "Hi")?;
    assert_eq!(stats.trained, 2);
    assert_eq!(stats.junk, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.mismatched, 0);
    assert_eq!(recognizer.counts().get(&('H' as i32)), Some(&1));
    assert_eq!(recognizer.counts().get(&('i' as i32)), Some(&1));
    recognizer.finish_training()?;

    let recognition = recognizer.recognize_line(&image)?;
    assert_eq!(max_label(&recognition.segmentation), 2);
    let path = recognition.lattice.best_path().expect("lattice has a path");
    assert_eq!(path.text(), "Hi");

    match decode(&recognition.lattice, &free_lm("Hi"), 100, 1e10) {
        Decoded::Text(path) => {
            assert_eq!(path.text(), "Hi");
            // the chosen runs recolor the atomic segmentation and can be
            // recovered from it
            let cseg = recolor(&recognition.segmentation, &path.inputs)?;
            let runs: Vec<i32> = path.inputs.iter().copied().filter(|&i| i != 0).collect();
            assert_eq!(runs_from_cseg(&cseg, &recognition.segmentation), runs);
        }
        Decoded::Unrecognized(cost) => panic!("unrecognized at {:?}", cost),
    }
    Ok(())
}

#[test]
fn test_untrained_recognizer_falls_back() -> Result<()> {
    init();
    let (image, _) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    let recognition = recognizer.recognize_line(&image)?;
    let path = recognition.lattice.best_path().expect("lattice has a path");
    assert_eq!(path.text(), "##");
    // box widths 12 and 6 over the nominal x-height, times 100
    assert!((path.total_cost() - 180.0).abs() < 1e-3);
    Ok(())
}

#[test]
fn test_skipped_groups_cost_as_noise() -> Result<()> {
    init();
    // five touching-distance blocks; groups of four or five of them are
    // too high once squared and padded with context
    let blocks: Vec<(u32, (u32, u32, u32, u32))> = (0..5)
        .map(|k| (k + 1, (5 + 42 * k, 10, 45 + 42 * k, 50)))
        .collect();
    let (image, _) = draw_line(220, 60, &blocks);
    let mut recognizer = LineRecognizer::new()?;
    let recognition = recognizer.recognize_line(&image)?;
    assert_eq!(max_label(&recognition.segmentation), 5);
    assert_eq!(recognition.skipped, 3);
    let path = recognition.lattice.best_path().expect("lattice has a path");
    assert_eq!(path.text(), "#####");
    // each block is 40 px wide over the nominal x-height, times 100
    assert!((path.total_cost() - 2000.0).abs() < 1e-2);
    Ok(())
}

#[test]
fn test_split_character_trains_junk() -> Result<()> {
    init();
    // one character drawn as two pieces close enough to be grouped
    let (image, cseg) = draw_line(40, 30, &[(1, (5, 10, 10, 25)), (1, (13, 10, 18, 25))]);
    let mut recognizer = LineRecognizer::new()?;
    let stats = recognizer.add_training_line(&cseg, &image, "n")?;
    assert_eq!(stats.trained, 1);
    assert_eq!(stats.junk, 2);
    assert_eq!(recognizer.counts().get(&('n' as i32)), Some(&1));

    let mut recognizer = LineRecognizer::new()?;
    recognizer.set("use_reject", "false")?;
    let stats = recognizer.add_training_line(&cseg, &image, "n")?;
    assert_eq!(stats.junk, 2);
    Ok(())
}

#[test]
fn test_short_transcript_is_mismatched() -> Result<()> {
    init();
    let (image, cseg) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    let stats = recognizer.add_training_line(&cseg, &image, "H")?;
    assert_eq!(stats.trained, 1);
    assert_eq!(stats.mismatched, 1);
    Ok(())
}

#[test]
fn test_failed_add_is_not_counted() -> Result<()> {
    init();
    let (image, cseg) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    recognizer.add_training_line(&cseg, &image, "Hi")?;
    // without the shape properties the feature vectors get shorter
    recognizer.set("cfmap.use_props", "false")?;
    assert!(matches!(
        recognizer.add_training_line(&cseg, &image, "Hi"),
        Err(linerec::Error::FeatureDimension { .. })
    ));
    assert_eq!(recognizer.counts().get(&('H' as i32)), Some(&1));
    assert_eq!(recognizer.counts().get(&('i' as i32)), Some(&1));
    Ok(())
}

#[test]
fn test_train_from_segmentation() -> Result<()> {
    init();
    let (_, cseg) = hi_line();
    let mut recognizer = LineRecognizer::new()?;
    let stats = recognizer.add_training_segmentation(&cseg, "Hi")?;
    assert_eq!(stats.trained, 2);
    Ok(())
}

#[test]
fn test_save_and_load() -> Result<()> {
    init();
    let recognizer = trained_hi()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hi.linerec");
    recognizer.save_file(&path)?;

    let mut loaded = LineRecognizer::load_file(&path)?;
    assert_eq!(loaded.counts(), recognizer.counts());
    let (image, _) = hi_line();
    let recognition = loaded.recognize_line(&image)?;
    let path = recognition.lattice.best_path().expect("lattice has a path");
    assert_eq!(path.text(), "Hi");
    Ok(())
}

#[test]
fn test_preload_continues_training() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hi.linerec");
    trained_hi()?.save_file(&path)?;

    let mut recognizer = LineRecognizer::new()?;
    recognizer.set("cpreload", &path.to_string_lossy())?;
    recognizer.start_training()?;
    assert_eq!(recognizer.counts().get(&('H' as i32)), Some(&1));
    let (image, cseg) = hi_line();
    recognizer.add_training_line(&cseg, &image, "Hi")?;
    recognizer.finish_training()?;
    assert_eq!(recognizer.counts().get(&('H' as i32)), Some(&2));
    Ok(())
}

#[test]
fn test_priors_keep_recognition() -> Result<()> {
    init();
    let mut recognizer = trained_hi()?;
    recognizer.set("use_priors", "true")?;
    let (image, _) = hi_line();
    let recognition = recognizer.recognize_line(&image)?;
    let path = recognition.lattice.best_path().expect("lattice has a path");
    assert_eq!(path.text(), "Hi");
    Ok(())
}
