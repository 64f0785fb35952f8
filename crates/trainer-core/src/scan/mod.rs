mod pattern;
mod scanner;
mod signature;

pub use pattern::{Pattern, read_static_int};
pub use scanner::{DEFAULT_CHUNK_SIZE, ScanFlow, ScanHit, ScanState, SignatureScanner};
pub use signature::{
    CodeSignature, ResolvedOffsets, SignatureSet, load_signatures, save_signatures,
};
