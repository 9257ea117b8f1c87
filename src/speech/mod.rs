//! Speech input/output orchestration around injected platform engines.

pub mod input;
pub mod output;
pub mod sanitize;

pub use input::{DictationBridge, DictationUpdate, RecognitionEngine};
pub use output::{SpeakOutcome, SpeechOutput, SynthesisEngine, Utterance, Voice};
pub use sanitize::{MAX_CHUNK_LEN, chunk, sanitize};
