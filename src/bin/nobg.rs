use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use nobg::shell::EXTENSIONS;
use nobg::{
    default_output_path, is_supported_image, process_file, AssociationEntry, DirectoryStore,
    ProcessOptions, ProcessResult, Rect, ShellIntegration, DEFAULT_ITERATIONS, DEFAULT_MARGIN,
};

#[derive(Parser)]
#[command(
    name = "nobg",
    about = "Remove the background of an image and save it as a transparent PNG",
    version,
    group(ArgGroup::new("mode").required(true).args(["input", "install", "uninstall"])),
    after_help = "Simple usage: nobg <image>  (writes <image>_nobg.png next to the input)\n\n\
                  Use --install once to add \"Remove Background\" to the context menu of\n\
                  .jpg, .jpeg, .png and .webp files."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file
    input: Option<PathBuf>,

    /// Register the "Remove Background" context-menu entry for the current user
    #[arg(long)]
    install: bool,

    /// Remove the context-menu entry
    #[arg(long)]
    uninstall: bool,

    /// Output PNG path (default: {name}_nobg.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of segmentation refinement rounds
    #[arg(short = 'n', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,

    /// Initialization rectangle inset from each border, as a fraction (0.0-0.5)
    #[arg(short, long, default_value_t = DEFAULT_MARGIN)]
    margin: f32,

    /// Explicit initialization rectangle as x,y,width,height
    #[arg(long, value_parser = parse_rect, conflicts_with = "margin")]
    rect: Option<Rect>,

    /// Icon shown next to the context-menu entry
    #[arg(long, requires = "install")]
    icon: Option<PathBuf>,

    /// Directory holding the context-menu associations (default: per-user data dir)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if cli.install || cli.uninstall {
        run_shell(&cli);
        return;
    }

    let Some(input_path) = cli.input.as_deref() else {
        eprintln!("Error: No input file given");
        process::exit(1);
    };

    if !(0.0..0.5).contains(&cli.margin) {
        eprintln!("Error: Margin must be at least 0.0 and below 0.5");
        process::exit(1);
    }

    if !input_path.is_file() {
        eprintln!("Error: Input file does not exist: {}", input_path.display());
        process::exit(1);
    }

    if !is_supported_image(input_path) && !cli.quiet {
        eprintln!(
            "WARNING: {} does not have a .jpg/.jpeg/.png/.webp extension, trying anyway",
            input_path.display()
        );
    }

    let opts = ProcessOptions {
        iterations: cli.iterations,
        margin: cli.margin,
        rect: cli.rect,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input_path));
    let result = process_file(input_path, &output_path, &opts);
    print_result(&result, &opts);

    if !result.success {
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_shell(cli: &Cli) {
    let store = match &cli.store {
        Some(dir) => DirectoryStore::new(dir),
        None => match DirectoryStore::user_default() {
            Ok(store) => store,
            Err(e) => {
                eprintln!("[FAIL] {e}");
                process::exit(1);
            }
        },
    };
    tracing::debug!(root = %store.root().display(), "association store");

    let executable = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("[FAIL] Cannot locate the nobg executable: {e}");
            process::exit(1);
        }
    };

    let entry = AssociationEntry::for_executable(&executable, cli.icon.clone());
    let mut shell = ShellIntegration::new(store, entry);
    let extensions = EXTENSIONS.join(", ");

    if cli.install {
        match shell.install() {
            Ok(()) => {
                if !cli.quiet {
                    eprintln!("[OK] Context menu installed for {extensions}");
                }
            }
            Err(e) => {
                eprintln!("[FAIL] Could not install context menu: {e}");
                process::exit(1);
            }
        }
    } else {
        match shell.uninstall() {
            Ok(0) => {
                if !cli.quiet {
                    eprintln!("[OK] Context menu was not installed; nothing to remove");
                }
            }
            Ok(n) => {
                if !cli.quiet {
                    eprintln!("[OK] Context menu removed ({n} of {extensions})");
                }
            }
            Err(e) => {
                eprintln!("[FAIL] Could not remove context menu: {e}");
                process::exit(1);
            }
        }
    }
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got {s:?}"));
    };
    let num = |v: &str| {
        v.parse::<u32>()
            .map_err(|e| format!("invalid rectangle component {v:?}: {e}"))
    };
    let rect = Rect::new(num(*x)?, num(*y)?, num(*w)?, num(*h)?);
    if rect.width == 0 || rect.height == 0 {
        return Err("rectangle width and height must be positive".to_string());
    }
    Ok(rect)
}

fn print_result(result: &ProcessResult, opts: &ProcessOptions) {
    if opts.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.success {
        let written = result
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if result.fallback {
            eprintln!("[OK] {filename} -> {written} (unrefined)");
        } else {
            eprintln!("[OK] {filename} -> {written}");
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if opts.verbose && !result.message.is_empty() {
        eprintln!("  -> {}", result.message);
    }
}
