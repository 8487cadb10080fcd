//! Client for AUTOMATIC1111-style Stable Diffusion servers, plus a normal-map
//! synthesizer for turning generated textures into materials.

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod material;
pub mod models;
pub mod normal_map;
pub mod transport;

pub use client::{ClientState, SdClient};
pub use config::{Config, Endpoint, Endpoints, GenerationDefaults, RequestSettings, ServerConfig};
pub use error::{Result, SdError};
pub use material::{GeneratedMaterial, MaterialSettings, SettingsChange};
pub use models::*;
pub use normal_map::{EdgeMode, NormalMapSynthesizer};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
