//! Remove the background of a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example remove_background -- input.jpg [output.png]
//! ```

use std::env;
use std::path::PathBuf;
use std::process;

use nobg::{default_output_path, process_file, ProcessOptions};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input> [output.png]", args[0]);
        process::exit(1);
    }

    let input = PathBuf::from(&args[1]);
    let output = args
        .get(2)
        .map_or_else(|| default_output_path(&input), PathBuf::from);

    let result = process_file(&input, &output, &ProcessOptions::default());

    if result.success {
        println!("Done: {} -> {}", result.message, output.display());
    } else {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    }
}
