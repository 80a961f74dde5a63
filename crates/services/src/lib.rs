//! voxbot-services – HTTP-Clients fuer die externen Dienste
//!
//! ## Module
//! - [`stt`] – Transkription (WAV-Upload, Sprach-Fallback)
//! - [`llm`] – Antwort-Generierung (`/dev/llm_reply`)
//! - [`tts`] – Sprachsynthese (WAV -> PCM)
//! - [`wav`] – WAV-Kodierung

pub mod llm;
pub mod stt;
pub mod tts;
pub mod wav;

pub use llm::{GeneratorConfig, HttpAntwortGenerator};
pub use stt::{HttpTranskriptor, TranskriptionConfig};
pub use tts::{HttpSynthesizer, SyntheseConfig};
