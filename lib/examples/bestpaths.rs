use anyhow::Result;
use linerec::batch::{bestpaths_dir, BatchOptions};
use linerec::bookstore::BookStore;

fn run() -> Result<()> {
    let book = std::env::args().nth(1).expect("Usage: bestpaths BOOKDIR");
    let summary = bestpaths_dir(&BookStore::new(&book), &BatchOptions::from_env())?;
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
