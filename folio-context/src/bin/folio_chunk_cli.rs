use clap::Parser;
use folio_context::chunker::{Chunk, ChunkingEngine, FileCategory, estimate_tokens};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk documents into JSON output using folio-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Project the chunks belong to.
    #[arg(short = 'P', long, default_value = "")]
    project: String,

    /// Document path recorded on each chunk. Defaults to the input path.
    #[arg(short, long)]
    path: Option<String>,

    /// Maximum estimated tokens per chunk.
    #[arg(short, long, default_value_t = 400)]
    max_tokens: usize,

    /// Fraction of each packed chunk repeated at the start of the next one.
    #[arg(short, long, default_value_t = 0.1)]
    overlap_ratio: f64,

    /// File category: content or settings.
    #[arg(short, long, default_value = "content")]
    category: FileCategory,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let path = args
        .path
        .or(args.input)
        .unwrap_or_else(|| "stdin.md".to_string());

    let engine = ChunkingEngine::new(args.max_tokens, args.overlap_ratio);
    let chunks: Vec<Chunk> = engine
        .chunk_document(&file_content, &path)
        .into_iter()
        .map(|c| c.with_owner(args.project.clone(), args.category))
        .collect();

    #[derive(Serialize)]
    struct SerializableChunk<'a> {
        #[serde(flatten)]
        chunk: &'a Chunk,
        estimated_tokens: usize,
    }

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .map(|chunk| SerializableChunk {
            chunk,
            estimated_tokens: estimate_tokens(&chunk.body),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
