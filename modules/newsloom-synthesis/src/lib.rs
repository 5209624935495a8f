pub mod continuity;
pub mod context;
pub mod generator;
pub mod persister;
pub mod persona;

pub use continuity::{ContinuityDecider, ContinuityDecision};
pub use context::{ClusterContext, ContextBuilder};
pub use generator::SynthesisGenerator;
pub use persister::SynthesisPersister;
pub use persona::{quality_accepts, score_quality, KeywordTable, Persona, PersonaSelector, NEUTRAL};
