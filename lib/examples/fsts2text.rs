use anyhow::Result;
use linerec::batch::{fsts2text_dir, load_language_model, BatchOptions};
use linerec::bookstore::BookStore;
use std::time::Instant;

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let lm = args.next().expect("Usage: fsts2text LANGMOD BOOKDIR");
    let book = args.next().expect("Usage: fsts2text LANGMOD BOOKDIR");
    let lm = load_language_model(&lm)?;
    let t0 = Instant::now();
    let summary = fsts2text_dir(&BookStore::new(&book), &lm, &BatchOptions::from_env())?;
    println!("fsts2text took {:?}", t0.elapsed());
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
