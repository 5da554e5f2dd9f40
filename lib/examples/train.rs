use anyhow::{Context, Result};
use linerec::batch::{train_dir, BatchOptions};
use linerec::bookstore::BookStore;
use linerec::LineRecognizer;

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let model = args.next().expect("Usage: train MODEL BOOKDIR...");
    let options = BatchOptions::from_env();
    let mut recognizer = LineRecognizer::new()?;
    for book in args {
        let store = BookStore::new(&book);
        let (summary, stats) = train_dir(&store, &mut recognizer, &options)
            .with_context(|| format!("Failed to train on {}", book))?;
        eprintln!("{}: {:?} {:?}", book, summary, stats);
    }
    recognizer
        .save_file(&model)
        .with_context(|| format!("Failed to save {}", model))?;
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
