use anyhow::{Context, Result};
use clap::Parser;
use pdf_anatomy::{OpenOptions, PDFDocument};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "pdf-inspect",
    about = "Inspect the object structure of a PDF file",
    version
)]
struct Cli {
    /// PDF file to inspect
    file: PathBuf,

    /// List every object with its label, location and container
    #[arg(long)]
    objects: bool,

    /// Print the decoded text of one object
    #[arg(long, value_name = "NUM")]
    object: Option<u32>,

    /// List page object numbers in reading order
    #[arg(long)]
    pages: bool,

    /// Print the merged trailer dictionary
    #[arg(long)]
    trailer: bool,

    /// Chunk size in bytes for reading the file
    #[arg(long, default_value_t = 65536)]
    chunk_size: usize,

    /// Number of chunks kept in memory
    #[arg(long = "cache-chunks", default_value_t = 10)]
    cache_chunks: usize,

    /// Report recovery-scan progress on stderr
    #[arg(long)]
    progress: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut options = OpenOptions::new()
        .chunk_size(cli.chunk_size)
        .max_cached_chunks(cli.cache_chunks);
    if cli.progress {
        options = options.progress(|percent| eprintln!("scanning: {:3}%", percent));
    }

    let mut doc = PDFDocument::open_with(&cli.file, options)
        .with_context(|| format!("failed to open {}", cli.file.display()))?;

    print_summary(&cli, &doc);

    if cli.trailer {
        println!("═══════════════ TRAILER ═══════════════");
        let mut keys: Vec<&String> = doc.trailer().keys().collect();
        keys.sort();
        for key in keys {
            println!("/{} {}", key, doc.trailer()[key]);
        }
        println!();
    }

    if cli.pages {
        println!("═══════════════ PAGES ═══════════════");
        for (i, num) in doc.pages().iter().enumerate() {
            println!("{:>5}  {} 0 R", i + 1, num);
        }
        println!();
    }

    if cli.objects {
        print_objects(&mut doc)?;
    }

    if let Some(num) = cli.object {
        println!("═══════════════ OBJECT {} ═══════════════", num);
        let text = doc
            .read_decoded_text(num)
            .with_context(|| format!("failed to read object {}", num))?;
        println!("{}", text);
    }

    doc.close();
    Ok(())
}

fn print_summary(cli: &Cli, doc: &PDFDocument) {
    println!("File: {}", cli.file.display());
    println!("Objects: {}", doc.object_numbers().len());
    println!("Pages: {}", doc.page_count());
    match doc.root() {
        Some(root) => println!("Root: {} 0 R", root),
        None => println!("Root: (none)"),
    }
    println!();
}

/// Prints the object list: label, number, offset, container and index.
fn print_objects(doc: &mut PDFDocument) -> Result<()> {
    println!("═══════════════ OBJECTS ═══════════════");
    println!(
        "{:<12} {:>7} {:>10} {:>8} {:>9} {:>6}  Type",
        "Details", "Number", "Offset", "Hex", "Container", "Index"
    );

    for num in doc.object_numbers() {
        let info = doc.describe(num)?;
        let (offset, hex) = match info.offset() {
            Some(offset) => (offset.to_string(), format!("{:x}", offset)),
            None => (String::new(), String::new()),
        };
        let (container, index) = match info.container() {
            Some((container, index)) => (container.to_string(), index.to_string()),
            None => (String::new(), String::new()),
        };
        let kind = match (&info.obj_type, &info.error) {
            (_, Some(error)) => format!("error: {}", error),
            (Some(obj_type), None) => format!("/{}", obj_type),
            (None, None) => String::new(),
        };

        println!(
            "{:<12} {:>7} {:>10} {:>8} {:>9} {:>6}  {}",
            info.label.as_deref().unwrap_or(""),
            num,
            offset,
            hex,
            container,
            index,
            kind
        );
    }
    println!();
    Ok(())
}
