pub mod hrr;
pub mod llm;
pub mod stt;
pub mod traits;
pub mod tts;
pub(crate) mod sse;
pub mod util;

pub use hrr::HttpHrrAdapter;
pub use llm::OpenAiCompatLlm;
pub use stt::HttpSttAdapter;
pub use traits::{
    GenerateRequest, HrrAdapter, HrrRecognition, HrrSession, LlmAdapter, SttAdapter, Stroke,
    StrokePoint, TtsAdapter,
};
pub use tts::HttpTtsAdapter;
