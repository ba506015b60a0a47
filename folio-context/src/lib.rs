pub mod chunker;
pub mod tokenizer;

// Re-export the main chunking and tokenizing types for external use
pub use chunker::{Chunk, ChunkingEngine, FileCategory, chunk, estimate_tokens};
pub use tokenizer::{PartOfSpeech, Token, TokenizeError, Tokenizer, WordTokenizer};
