//! Capability adapters (model servers reached over the network).

#[cfg(feature = "http")]
pub mod gemini;
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use gemini::GeminiGenerator;
#[cfg(feature = "http")]
pub use http::HttpCapabilityClient;
