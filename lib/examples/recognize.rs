use anyhow::{Context, Result};
use linerec::batch::{recognize_dir, BatchOptions};
use linerec::bookstore::BookStore;
use linerec::LineRecognizer;
use std::time::Instant;

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let model = args.next().expect("Usage: recognize MODEL BOOKDIR");
    let book = args.next().expect("Usage: recognize MODEL BOOKDIR");
    let mut recognizer = LineRecognizer::load_file(&model)
        .with_context(|| format!("Failed to load {}", model))?;
    let t0 = Instant::now();
    let store = BookStore::new(&book);
    let summary = recognize_dir(&store, &mut recognizer, &BatchOptions::from_env())?;
    println!("recognize took {:?}", t0.elapsed());
    println!("{:?}", summary);
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
