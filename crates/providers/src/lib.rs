pub mod gemini;
pub mod sse;
